//! Unified particle physics: a real-time Position Based Dynamics solver
//! unifying rigid-body, granular and fluid matter on a compute device, in
//! the style of Macklin et al.'s "Unified Particle Physics for Real-Time
//! Applications". See [`solver::UnifiedParticleSolver`] for the entry point.
//!
//! Windowing, input, rendering and mesh loading are out of scope: a front
//! end constructs a [`solver::UnifiedParticleSolver`] from a
//! [`scene::SceneConfig`], calls [`solver::UnifiedParticleSolver::update`]
//! once per frame, and maps [`solver::UnifiedParticleSolver::position_buffer`]
//! read-only to draw the result.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate more_asserts;

pub mod device;
pub mod error;
pub mod grid;
pub mod math;
pub mod scene;
pub mod solver;
pub mod wgpu_utils;

pub use error::SolverError;
pub use scene::SceneConfig;
pub use solver::{SolverConfig, UnifiedParticleSolver};
