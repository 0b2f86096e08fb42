//! Pure, device-independent bookkeeping for the buffer owner's append
//! operations: capacity checks, phase-id assignment, rigid-body slot
//! assignment. Split out from [`super::particle_buffers::ParticleBuffers`]
//! so the invariants (N ≤ C, R ≤ R_max, phase partitioning) are testable
//! without a `wgpu::Device`.

use crate::error::SolverError;
use cgmath::{InnerSpace, Vector3};
use std::ops::Range;

const OFF_CENTER_EPSILON: f32 = 1e-5;

/// Tracks live particle/rigid-body counts and the monotonically increasing
/// phase counter assigned to each new granular particle or group.
pub struct ParticleCounters {
    capacity: u32,
    max_rigid_bodies: u32,
    n: u32,
    r: u32,
    next_phase: i32,
}

impl ParticleCounters {
    pub fn new(capacity: u32, max_rigid_bodies: u32) -> Self {
        ParticleCounters {
            capacity,
            max_rigid_bodies,
            n: 0,
            r: 0,
            next_phase: 1,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn max_rigid_bodies(&self) -> u32 {
        self.max_rigid_bodies
    }

    pub fn len(&self) -> u32 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn rigid_body_count(&self) -> u32 {
        self.r
    }

    /// Bumps `N` by `count`, returning the half-open `[old_n, old_n+count)`
    /// range the caller should write into. Fails with `CapacityExceeded`
    /// without mutating state if the append would overflow `C`.
    pub fn reserve_particles(&mut self, count: u32) -> Result<Range<u32>, SolverError> {
        let new_n = self.n.checked_add(count).ok_or(SolverError::CapacityExceeded {
            requested: count,
            available: self.capacity.saturating_sub(self.n),
        })?;
        if new_n > self.capacity {
            return Err(SolverError::CapacityExceeded {
                requested: count,
                available: self.capacity - self.n,
            });
        }
        let range = self.n..new_n;
        self.n = new_n;
        Ok(range)
    }

    /// Bumps `R` by one, returning the fresh rigid-body index. Fails with
    /// `CapacityExceeded` if `R+1 > R_max`.
    pub fn reserve_rigid_body(&mut self) -> Result<u32, SolverError> {
        if self.r + 1 > self.max_rigid_bodies {
            return Err(SolverError::CapacityExceeded {
                requested: 1,
                available: self.max_rigid_bodies - self.r,
            });
        }
        let id = self.r;
        self.r += 1;
        Ok(id)
    }

    /// Returns a fresh strictly-positive phase id and advances the counter.
    /// A rigid body draws one id shared by its whole particle range; a
    /// granular group draws one id per particle.
    pub fn allocate_phase(&mut self) -> i32 {
        let phase = self.next_phase;
        self.next_phase += 1;
        phase
    }

    /// The fixed phase id reserved for fluid particles.
    pub const fn fluid_phase() -> i32 {
        -1
    }
}

/// Validates the "zero centroid" precondition of shape matching: a rigid
/// body's reference positions must already be centered on their own center
/// of mass before insertion.
pub fn validate_centered_reference(reference_positions: &[Vector3<f32>]) -> Result<(), SolverError> {
    if reference_positions.is_empty() {
        return Ok(());
    }
    let sum: Vector3<f32> = reference_positions.iter().fold(Vector3::new(0.0, 0.0, 0.0), |acc, p| acc + p);
    let centroid = sum / reference_positions.len() as f32;
    let magnitude = centroid.magnitude();
    if magnitude >= OFF_CENTER_EPSILON {
        return Err(SolverError::OffCenterReference { centroid_magnitude: magnitude });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::vec3;

    #[test]
    fn reserve_particles_bumps_n_and_returns_range() {
        let mut counters = ParticleCounters::new(10, 4);
        let range = counters.reserve_particles(3).unwrap();
        assert_eq!(range, 0..3);
        assert_eq!(counters.len(), 3);
        let range2 = counters.reserve_particles(2).unwrap();
        assert_eq!(range2, 3..5);
        assert_eq!(counters.len(), 5);
    }

    #[test]
    fn reserve_particles_fails_on_overflow_without_mutating() {
        let mut counters = ParticleCounters::new(4, 4);
        counters.reserve_particles(3).unwrap();
        let err = counters.reserve_particles(2).unwrap_err();
        match err {
            SolverError::CapacityExceeded { requested, available } => {
                assert_eq!(requested, 2);
                assert_eq!(available, 1);
            }
            _ => panic!("wrong error variant"),
        }
        assert_eq!(counters.len(), 3, "failed reservation must not mutate N");
    }

    #[test]
    fn reserve_rigid_body_respects_r_max() {
        let mut counters = ParticleCounters::new(100, 1);
        assert_eq!(counters.reserve_rigid_body().unwrap(), 0);
        assert!(counters.reserve_rigid_body().is_err());
        assert_eq!(counters.rigid_body_count(), 1);
    }

    #[test]
    fn phase_counter_is_monotonic_and_positive() {
        let mut counters = ParticleCounters::new(100, 10);
        let a = counters.allocate_phase();
        let b = counters.allocate_phase();
        let c = counters.allocate_phase();
        assert!(a > 0 && b > a && c > b);
    }

    #[test]
    fn fluid_phase_is_negative_one() {
        assert_eq!(ParticleCounters::fluid_phase(), -1);
    }

    #[test]
    fn validate_centered_reference_accepts_zero_centroid() {
        let points = vec![vec3(1.0, 0.0, 0.0), vec3(-1.0, 0.0, 0.0), vec3(0.0, 1.0, -1.0), vec3(0.0, -1.0, 1.0)];
        assert!(validate_centered_reference(&points).is_ok());
    }

    #[test]
    fn validate_centered_reference_rejects_off_center() {
        let points = vec![vec3(1.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0)];
        let err = validate_centered_reference(&points).unwrap_err();
        match err {
            SolverError::OffCenterReference { centroid_magnitude } => assert!(centroid_magnitude >= 1e-5),
            _ => panic!("wrong error variant"),
        }
    }
}
