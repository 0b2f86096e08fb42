use thiserror::Error;

/// Fatal, construction-time failures raised by the device buffer owner and
/// the solver's device-resource setup. Runtime substep kernels never raise:
/// numerical anomalies are absorbed by the next stabilization/projection
/// pass rather than surfaced as errors.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("capacity exceeded: requested {requested} particles, {available} available")]
    CapacityExceeded { requested: u32, available: u32 },

    #[error("rigid body reference positions are not centered: centroid magnitude {centroid_magnitude} >= 1e-5")]
    OffCenterReference { centroid_magnitude: f32 },

    #[error("device allocation failed: {0}")]
    DeviceAllocationFailure(String),

    #[error("compute kernel dispatch failed: {0}")]
    KernelDispatchFailure(String),
}
