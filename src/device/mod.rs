pub mod counters;
pub mod particle_buffers;

pub use counters::ParticleCounters;
pub use particle_buffers::{ParticleBuffers, RigidBodyTable};
