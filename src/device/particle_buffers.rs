//! Device buffer owner: allocates every per-particle and per-rigid-body
//! array at construction and never reallocates. Append operations
//! assemble the new particles' data host-side into a `Vec`, then
//! `queue.write_buffer` the slice at the current tail offset — the same
//! pattern `HybridFluid::add_fluid_cube` uses to stream particles into a
//! fixed-capacity GPU buffer.

use super::counters::{validate_centered_reference, ParticleCounters};
use crate::error::SolverError;
use crate::wgpu_utils::binding_glsl;
use cgmath::{InnerSpace, Point3, Vector3, Zero};
use log::{error, info};

fn storage_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsage::STORAGE | wgpu::BufferUsage::COPY_DST | wgpu::BufferUsage::COPY_SRC,
        mapped_at_creation: false,
    })
}

#[repr(C)]
#[derive(Clone, Copy)]
struct GpuVec4 {
    x: f32,
    y: f32,
    z: f32,
    w: f32,
}
unsafe impl bytemuck::Pod for GpuVec4 {}
unsafe impl bytemuck::Zeroable for GpuVec4 {}

impl From<Point3<f32>> for GpuVec4 {
    fn from(p: Point3<f32>) -> Self {
        GpuVec4 { x: p.x, y: p.y, z: p.z, w: 0.0 }
    }
}
impl From<Vector3<f32>> for GpuVec4 {
    fn from(v: Vector3<f32>) -> Self {
        GpuVec4 { x: v.x, y: v.y, z: v.z, w: 0.0 }
    }
}
impl GpuVec4 {
    fn zero() -> Self {
        GpuVec4 { x: 0.0, y: 0.0, z: 0.0, w: 0.0 }
    }
}

/// Owns the per-particle GPU arrays: positions, velocities, masses, phase
/// tags, and the fluid/vorticity scratch fields.
/// Fixed-capacity, bump-appended; the host-side counters in
/// [`ParticleCounters`] gate every append before a byte reaches the device.
pub struct ParticleBuffers {
    counters: ParticleCounters,

    pub position: wgpu::Buffer,
    pub predicted_position: wgpu::Buffer,
    pub temp_position: wgpu::Buffer,
    pub velocity: wgpu::Buffer,
    pub velocity_scratch: wgpu::Buffer,
    pub mass: wgpu::Buffer,
    pub inv_mass: wgpu::Buffer,
    pub inv_scaled_mass: wgpu::Buffer,
    pub phase: wgpu::Buffer,
    pub omega: wgpu::Buffer,
    pub fluid_lambda: wgpu::Buffer,
    pub fluid_density: wgpu::Buffer,
    pub fluid_normal: wgpu::Buffer,
}

impl ParticleBuffers {
    pub fn new(device: &wgpu::Device, capacity: u32, max_rigid_bodies: u32) -> Self {
        let vec4_size = capacity as u64 * std::mem::size_of::<GpuVec4>() as u64;
        let scalar_size = capacity as u64 * std::mem::size_of::<f32>() as u64;
        let phase_size = capacity as u64 * std::mem::size_of::<i32>() as u64;

        ParticleBuffers {
            counters: ParticleCounters::new(capacity, max_rigid_bodies),
            position: storage_buffer(device, "Buffer: particle position", vec4_size),
            predicted_position: storage_buffer(device, "Buffer: particle predictedPosition", vec4_size),
            temp_position: storage_buffer(device, "Buffer: particle tempPosition", vec4_size),
            velocity: storage_buffer(device, "Buffer: particle velocity", vec4_size),
            velocity_scratch: storage_buffer(device, "Buffer: particle velocity scratch", vec4_size),
            mass: storage_buffer(device, "Buffer: particle mass", scalar_size),
            inv_mass: storage_buffer(device, "Buffer: particle invMass", scalar_size),
            inv_scaled_mass: storage_buffer(device, "Buffer: particle invScaledMass", scalar_size),
            phase: storage_buffer(device, "Buffer: particle phase", phase_size),
            omega: storage_buffer(device, "Buffer: particle omega", vec4_size),
            fluid_lambda: storage_buffer(device, "Buffer: particle fluidLambda", scalar_size),
            fluid_density: storage_buffer(device, "Buffer: particle fluidDensity", scalar_size),
            fluid_normal: storage_buffer(device, "Buffer: particle fluidNormal", vec4_size),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.counters.capacity()
    }

    pub fn num_particles(&self) -> u32 {
        self.counters.len()
    }

    pub fn num_rigid_bodies(&self) -> u32 {
        self.counters.rigid_body_count()
    }

    fn write_common(
        &self,
        queue: &wgpu::Queue,
        range: std::ops::Range<u32>,
        positions: &[Point3<f32>],
        mass_per_particle: f32,
        phases: &[i32],
    ) {
        let vec4_stride = std::mem::size_of::<GpuVec4>() as u64;
        let scalar_stride = std::mem::size_of::<f32>() as u64;
        let phase_stride = std::mem::size_of::<i32>() as u64;
        let offset = range.start as u64;

        let position_data: Vec<GpuVec4> = positions.iter().map(|&p| GpuVec4::from(p)).collect();
        queue.write_buffer(&self.position, offset * vec4_stride, bytemuck::cast_slice(&position_data));
        queue.write_buffer(&self.predicted_position, offset * vec4_stride, bytemuck::cast_slice(&position_data));
        queue.write_buffer(&self.temp_position, offset * vec4_stride, bytemuck::cast_slice(&position_data));

        let zero_vec4s = vec![GpuVec4::zero(); positions.len()];
        queue.write_buffer(&self.velocity, offset * vec4_stride, bytemuck::cast_slice(&zero_vec4s));
        queue.write_buffer(&self.velocity_scratch, offset * vec4_stride, bytemuck::cast_slice(&zero_vec4s));
        queue.write_buffer(&self.omega, offset * vec4_stride, bytemuck::cast_slice(&zero_vec4s));
        queue.write_buffer(&self.fluid_normal, offset * vec4_stride, bytemuck::cast_slice(&zero_vec4s));

        let masses = vec![mass_per_particle; positions.len()];
        let inv_masses = vec![1.0 / mass_per_particle; positions.len()];
        queue.write_buffer(&self.mass, offset * scalar_stride, bytemuck::cast_slice(&masses));
        queue.write_buffer(&self.inv_mass, offset * scalar_stride, bytemuck::cast_slice(&inv_masses));
        queue.write_buffer(&self.inv_scaled_mass, offset * scalar_stride, bytemuck::cast_slice(&inv_masses));

        let zero_scalars = vec![0.0f32; positions.len()];
        queue.write_buffer(&self.fluid_lambda, offset * scalar_stride, bytemuck::cast_slice(&zero_scalars));
        queue.write_buffer(&self.fluid_density, offset * scalar_stride, bytemuck::cast_slice(&zero_scalars));

        queue.write_buffer(&self.phase, offset * phase_stride, bytemuck::cast_slice(phases));
    }

    /// Appends a rigid body's particles: fails with `CapacityExceeded` if the
    /// append would overflow `C` or `R_max`; fails with `OffCenterReference`
    /// if `referencePositions` is not centered on its own centroid.
    pub fn add_rigid_body(
        &mut self,
        queue: &wgpu::Queue,
        world_positions: &[Point3<f32>],
        reference_positions: &[Vector3<f32>],
        mass_per_particle: f32,
    ) -> Result<(u32, std::ops::Range<u32>), SolverError> {
        assert_eq!(world_positions.len(), reference_positions.len());
        validate_centered_reference(reference_positions)?;

        let rigid_body_id = self.counters.reserve_rigid_body()?;
        let range = match self.counters.reserve_particles(world_positions.len() as u32) {
            Ok(range) => range,
            Err(err) => {
                error!(
                    "can't add rigid body with {} particles: capacity {} exceeded",
                    world_positions.len(),
                    self.counters.capacity()
                );
                return Err(err);
            }
        };

        let phase = self.counters.allocate_phase();
        let phases = vec![phase; world_positions.len()];
        self.write_common(queue, range.clone(), world_positions, mass_per_particle, &phases);

        info!(
            "added rigid body #{} with {} particles (phase {})",
            rigid_body_id,
            world_positions.len(),
            phase
        );
        Ok((rigid_body_id, range))
    }

    /// Appends a group of granular particles: each particle receives a
    /// fresh positive phase id (its own singleton phase group).
    pub fn add_granulars(&mut self, queue: &wgpu::Queue, positions: &[Point3<f32>], mass_per_particle: f32) -> Result<(), SolverError> {
        let range = match self.counters.reserve_particles(positions.len() as u32) {
            Ok(range) => range,
            Err(err) => {
                error!("can't add {} granular particles: capacity {} exceeded", positions.len(), self.counters.capacity());
                return Err(err);
            }
        };
        let phases: Vec<i32> = (0..positions.len()).map(|_| self.counters.allocate_phase()).collect();
        self.write_common(queue, range, positions, mass_per_particle, &phases);
        info!("added {} granular particles", positions.len());
        Ok(())
    }

    /// Appends a group of fluid particles: phase = -1 for every appended particle.
    pub fn add_fluids(&mut self, queue: &wgpu::Queue, positions: &[Point3<f32>], mass_per_particle: f32) -> Result<(), SolverError> {
        let range = match self.counters.reserve_particles(positions.len() as u32) {
            Ok(range) => range,
            Err(err) => {
                error!("can't add {} fluid particles: capacity {} exceeded", positions.len(), self.counters.capacity());
                return Err(err);
            }
        };
        let phases = vec![ParticleCounters::fluid_phase(); positions.len()];
        self.write_common(queue, range, positions, mass_per_particle, &phases);
        info!("added {} fluid particles", positions.len());
        Ok(())
    }

    pub fn storage_binding_type(read_only: bool) -> wgpu::BindingType {
        binding_glsl::buffer(read_only)
    }
}

/// Per-rigid-body reference shape, orientation and particle range. The
/// `particleIdRange` columns stay index-based — no
/// pointer is stored — since shape matching launches one thread block per
/// body and addresses the shared particle arrays by offset.
pub struct RigidBodyTable {
    pub particle_range: wgpu::Buffer,
    pub reference_positions: wgpu::Buffer,
    pub rotation: wgpu::Buffer,
    pub center_of_mass: wgpu::Buffer,
    max_rigid_bodies: u32,
}

impl RigidBodyTable {
    pub fn new(device: &wgpu::Device, max_rigid_bodies: u32, particle_capacity: u32) -> Self {
        RigidBodyTable {
            particle_range: storage_buffer(device, "Buffer: rigid body particleIdRange", max_rigid_bodies as u64 * 8),
            reference_positions: storage_buffer(
                device,
                "Buffer: rigid body initialPositionsCM",
                particle_capacity as u64 * std::mem::size_of::<GpuVec4>() as u64,
            ),
            rotation: storage_buffer(device, "Buffer: rigid body rotation", max_rigid_bodies as u64 * std::mem::size_of::<GpuVec4>() as u64),
            center_of_mass: storage_buffer(device, "Buffer: rigid body centerOfMass", max_rigid_bodies as u64 * std::mem::size_of::<GpuVec4>() as u64),
            max_rigid_bodies,
        }
    }

    pub fn write_body(&self, queue: &wgpu::Queue, rigid_body_id: u32, particle_range: std::ops::Range<u32>, reference_positions: &[Vector3<f32>]) {
        assert!(rigid_body_id < self.max_rigid_bodies);

        let range_data = [particle_range.start, particle_range.end];
        queue.write_buffer(&self.particle_range, rigid_body_id as u64 * 8, bytemuck::cast_slice(&range_data));

        let ref_data: Vec<GpuVec4> = reference_positions.iter().map(|&v| GpuVec4::from(v)).collect();
        queue.write_buffer(
            &self.reference_positions,
            particle_range.start as u64 * std::mem::size_of::<GpuVec4>() as u64,
            bytemuck::cast_slice(&ref_data),
        );

        // identity quaternion (x, y, z, w) and a placeholder centroid; the
        // first shape-matching pass recomputes the true centroid from
        // predicted positions before the quaternion is ever read downstream.
        let identity_quat = [GpuVec4 { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }];
        queue.write_buffer(&self.rotation, rigid_body_id as u64 * std::mem::size_of::<GpuVec4>() as u64, bytemuck::cast_slice(&identity_quat));

        let zero_com = [GpuVec4::zero()];
        queue.write_buffer(&self.center_of_mass, rigid_body_id as u64 * std::mem::size_of::<GpuVec4>() as u64, bytemuck::cast_slice(&zero_com));
    }
}
