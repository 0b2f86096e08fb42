pub mod binding_builder;
pub mod binding_glsl;
pub mod pipelines;
pub mod shader;
pub mod uniformbuffer;

/// Rounds `total` work items up into the number of workgroups needed at `local_size`.
pub fn compute_group_size_1d(total: u32, local_size: u32) -> u32 {
    (total + local_size - 1) / local_size
}
