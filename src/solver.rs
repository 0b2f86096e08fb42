//! The solver driver: owns every device buffer, pipeline and bind group, and
//! issues the per-substep pass ordering to a single in-order command queue,
//! mirroring `HybridFluid::step`'s one-encoder submission per frame.

use crate::device::{ParticleBuffers, RigidBodyTable};
use crate::error::SolverError;
use crate::grid::{self, GridDimensions, UniformGrid};
use crate::scene::SceneConfig;
use crate::wgpu_utils::{
    self,
    binding_builder::{BindGroupBuilder, BindGroupLayoutBuilder, BindGroupLayoutWithDesc},
    binding_glsl,
    pipelines::{ComputePipelineCreationDesc, ComputePipelineHandle, PipelineManager},
    shader::ShaderDirectory,
    uniformbuffer::UniformBuffer,
};
use cgmath::{InnerSpace, Point3, Vector3};
use log::info;
use std::path::Path;
use wgpu_profiler::{wgpu_profiler, GpuProfiler};

const MAX_PLANES: usize = 8;
/// Must match `NUM_MAX_PARTICLE_PER_RIGID_BODY` in `shaders/shape_matching.comp`.
const NUM_MAX_PARTICLE_PER_RIGID_BODY: u32 = 64;
const COMPUTE_LOCAL_SIZE: u32 = 64;

/// Solver-wide tunables, exposed so a front end can override any default
/// without touching the solver's source.
#[derive(Clone, Copy, Debug)]
pub struct SolverConfig {
    pub gravity: Vector3<f32>,
    pub substeps: u32,
    pub constraint_iters: u32,
    pub grid_iters: u32,
    pub stabilize_iters: u32,
    pub s_corr_k: f32,
    pub s_corr_n: f32,
    pub pbf_epsilon: f32,
    pub vorticity_epsilon: f32,
    pub cohesion_strength: f32,
    pub xsph_c: f32,
    pub mass_scaling_k: f32,
    pub sleep_epsilon: f32,
    pub cohesion_enabled: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            gravity: Vector3::new(0.0, -9.8, 0.0),
            substeps: 2,
            constraint_iters: 2,
            grid_iters: 1,
            stabilize_iters: 2,
            s_corr_k: 1e-4,
            s_corr_n: 4.0,
            pbf_epsilon: 300.0,
            vorticity_epsilon: 1e-3,
            cohesion_strength: 0.6,
            xsph_c: 2e-4,
            mass_scaling_k: 1.0,
            sleep_epsilon: 1e-5,
            cohesion_enabled: true,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PlaneGpu {
    origin_and_radius: [f32; 4],
    normal: [f32; 4],
}
unsafe impl bytemuck::Pod for PlaneGpu {}
unsafe impl bytemuck::Zeroable for PlaneGpu {}

#[repr(C)]
#[derive(Clone, Copy)]
struct SimulationUniformsGpu {
    delta_time: f32,
    particle_radius: f32,
    rest_density: f32,
    s_corr_k: f32,

    s_corr_n: f32,
    pbf_epsilon: f32,
    vorticity_epsilon: f32,
    cohesion_strength: f32,

    xsph_c: f32,
    mass_scaling_k: f32,
    sleep_epsilon_sq: f32,
    num_planes: u32,

    frame_delta_time: [f32; 4],
    gravity: [f32; 4],
    planes: [PlaneGpu; MAX_PLANES],
}
unsafe impl bytemuck::Pod for SimulationUniformsGpu {}
unsafe impl bytemuck::Zeroable for SimulationUniformsGpu {}

#[repr(C)]
#[derive(Clone, Copy)]
struct GridUniformsGpu {
    origin: [f32; 4],
    dims: [f32; 4],
}
unsafe impl bytemuck::Pod for GridUniformsGpu {}
unsafe impl bytemuck::Zeroable for GridUniformsGpu {}

struct Pipelines {
    integrate: ComputePipelineHandle,
    stabilize: ComputePipelineHandle,
    grid_clear: ComputePipelineHandle,
    grid_assign_count: ComputePipelineHandle,
    grid_scan: ComputePipelineHandle,
    grid_rewrite: ComputePipelineHandle,
    plane_collision: ComputePipelineHandle,
    particle_particle_collision: ComputePipelineHandle,
    fluid_density_lambda: ComputePipelineHandle,
    fluid_position_correction: ComputePipelineHandle,
    shape_matching: ComputePipelineHandle,
    velocity_update: ComputePipelineHandle,
    vorticity: ComputePipelineHandle,
    vorticity_force: ComputePipelineHandle,
    cohesion_normals: ComputePipelineHandle,
    cohesion_force: ComputePipelineHandle,
    xsph_viscosity: ComputePipelineHandle,
}

/// The solver instance: owns every device buffer, every compute pipeline,
/// and the substep loop. No process-wide state; two instances can coexist
/// on the same device.
pub struct UnifiedParticleSolver {
    config: SolverConfig,
    particles: ParticleBuffers,
    rigid_bodies: RigidBodyTable,
    grid: UniformGrid,

    simulation_uniforms: UniformBuffer<SimulationUniformsGpu>,
    grid_uniforms: UniformBuffer<GridUniformsGpu>,
    cell_count: wgpu::Buffer,
    cell_write_cursor: wgpu::Buffer,

    bind_group_particles: wgpu::BindGroup,
    bind_group_grid: wgpu::BindGroup,
    bind_group_rigid_bodies: wgpu::BindGroup,
    bind_group_uniforms: wgpu::BindGroup,
    bind_group_grid_scratch: wgpu::BindGroup,

    pipeline_manager: PipelineManager,
    pipelines: Pipelines,

    particle_radius: f32,
    kernel_radius: f32,
    rest_density: f32,
    planes: Vec<(Point3<f32>, Vector3<f32>)>,
}

impl UnifiedParticleSolver {
    /// Builds the solver from a scene description, allocating every buffer
    /// at the declared capacities and appending the scene's planes, rigid
    /// bodies, granular groups and fluid groups. Capacity/centering
    /// failures from any `addX` call abort construction.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, shader_dir: &ShaderDirectory, scene: &SceneConfig) -> Result<Self, SolverError> {
        let particle_radius = scene.particle_radius;
        let kernel_radius = grid::CELL_SIZE_TO_RADIUS_RATIO * particle_radius;

        let mut particles = ParticleBuffers::new(device, scene.max_particles, scene.max_rigid_bodies);
        let rigid_bodies = RigidBodyTable::new(device, scene.max_rigid_bodies, scene.max_particles);

        let world_extent = Vector3::new(8.0, 8.0, 8.0);
        let dims = grid::dimensions_for_extent(world_extent, kernel_radius);
        let grid_origin = Point3::new(-world_extent.x, -world_extent.y, -world_extent.z);
        let uniform_grid = UniformGrid::new(device, dims, kernel_radius, grid_origin, scene.max_particles);

        let simulation_uniforms = UniformBuffer::new(device);
        let grid_uniforms = UniformBuffer::new(device);
        let cell_count = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Buffer: grid cellCount"),
            size: dims.cell_count() as u64 * 4,
            usage: wgpu::BufferUsage::STORAGE | wgpu::BufferUsage::COPY_DST,
            mapped_at_creation: false,
        });
        let cell_write_cursor = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Buffer: grid cellWriteCursor"),
            size: dims.cell_count() as u64 * 4,
            usage: wgpu::BufferUsage::STORAGE | wgpu::BufferUsage::COPY_DST,
            mapped_at_creation: false,
        });

        let layout_particles = Self::layout_particles(device);
        let layout_grid = Self::layout_grid(device);
        let layout_rigid_bodies = Self::layout_rigid_bodies(device);
        let layout_uniforms = Self::layout_uniforms(device);
        let layout_grid_scratch = Self::layout_grid_scratch(device);

        let bind_group_particles = BindGroupBuilder::new(&layout_particles)
            .buffer(&particles.position)
            .buffer(&particles.predicted_position)
            .buffer(&particles.temp_position)
            .buffer(&particles.velocity)
            .buffer(&particles.velocity_scratch)
            .buffer(&particles.mass)
            .buffer(&particles.inv_mass)
            .buffer(&particles.inv_scaled_mass)
            .buffer(&particles.phase)
            .buffer(&particles.omega)
            .buffer(&particles.fluid_lambda)
            .buffer(&particles.fluid_density)
            .buffer(&particles.fluid_normal)
            .create(device, "BindGroup: particle buffers");

        let bind_group_grid = BindGroupBuilder::new(&layout_grid)
            .buffer(&uniform_grid.cell_start)
            .buffer(&uniform_grid.sorted_particle_id)
            .resource(grid_uniforms.binding_resource())
            .buffer(&uniform_grid.cell_id)
            .buffer(&uniform_grid.particle_id)
            .create(device, "BindGroup: uniform grid");

        let bind_group_rigid_bodies = BindGroupBuilder::new(&layout_rigid_bodies)
            .buffer(&rigid_bodies.particle_range)
            .buffer(&rigid_bodies.reference_positions)
            .buffer(&rigid_bodies.rotation)
            .buffer(&rigid_bodies.center_of_mass)
            .create(device, "BindGroup: rigid body table");

        let bind_group_uniforms = BindGroupBuilder::new(&layout_uniforms)
            .resource(simulation_uniforms.binding_resource())
            .create(device, "BindGroup: simulation uniforms");

        let bind_group_grid_scratch = BindGroupBuilder::new(&layout_grid_scratch)
            .buffer(&cell_count)
            .buffer(&cell_write_cursor)
            .create(device, "BindGroup: grid scratch");

        // Every pipeline shares one pipeline layout over the same five bind
        // group slots (particles, grid, rigid bodies, uniforms, grid
        // scratch) even when a given shader only touches a subset of them.
        // Sharing one push constant range across all pipelines improves
        // internal Vulkan pipeline compatibility, and sharing the bind
        // group layouts too collapses sixteen bespoke layouts into one.
        use std::rc::Rc;
        let shared_layout = Rc::new(device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("PipelineLayout: solver (shared)"),
            bind_group_layouts: &[
                &layout_particles.layout,
                &layout_grid.layout,
                &layout_rigid_bodies.layout,
                &layout_uniforms.layout,
                &layout_grid_scratch.layout,
            ],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStage::COMPUTE,
                range: 0..8,
            }],
        }));

        let mut pipeline_manager = PipelineManager::new();
        let mut make = |label: &'static str, path: &str| {
            pipeline_manager.create_compute_pipeline(
                device,
                shader_dir,
                ComputePipelineCreationDesc::new(label, shared_layout.clone(), Path::new(path)),
            )
        };

        let pipelines = Pipelines {
            integrate: make("integrate", "integrate.comp"),
            stabilize: make("stabilize", "stabilize.comp"),
            grid_clear: make("grid clear", "grid_clear.comp"),
            grid_assign_count: make("grid assign+count", "grid_assign_count.comp"),
            grid_scan: make("grid scan", "grid_scan.comp"),
            grid_rewrite: make("grid rewrite", "grid_rewrite.comp"),
            plane_collision: make("plane collision", "plane_collision.comp"),
            particle_particle_collision: make("particle-particle collision", "particle_particle_collision.comp"),
            fluid_density_lambda: make("fluid density/lambda", "fluid_density_lambda.comp"),
            fluid_position_correction: make("fluid position correction", "fluid_position_correction.comp"),
            shape_matching: make("shape matching", "shape_matching.comp"),
            velocity_update: make("velocity update & commit", "velocity_update.comp"),
            vorticity: make("vorticity", "vorticity.comp"),
            vorticity_force: make("vorticity confinement", "vorticity_force.comp"),
            cohesion_normals: make("cohesion normals", "cohesion_normals.comp"),
            cohesion_force: make("cohesion force", "cohesion_force.comp"),
            xsph_viscosity: make("xsph viscosity", "xsph_viscosity.comp"),
        };

        let mut solver = UnifiedParticleSolver {
            config: SolverConfig {
                gravity: scene.gravity,
                cohesion_enabled: scene.cohesion_enabled,
                ..SolverConfig::default()
            },
            particles,
            rigid_bodies,
            grid: uniform_grid,
            simulation_uniforms,
            grid_uniforms,
            cell_count,
            cell_write_cursor,
            bind_group_particles,
            bind_group_grid,
            bind_group_rigid_bodies,
            bind_group_uniforms,
            bind_group_grid_scratch,
            pipeline_manager,
            pipelines,
            particle_radius,
            kernel_radius,
            rest_density: scene.rest_density,
            planes: scene.planes.iter().map(|p| (p.origin, p.normal)).collect(),
        };

        solver.write_grid_uniforms(queue);

        for rb in &scene.rigid_bodies {
            solver.add_rigid_body(queue, &rb.world_positions, &rb.reference_positions, rb.mass_per_particle)?;
        }
        for g in &scene.granular_groups {
            solver.add_granulars(queue, &g.positions, g.mass_per_particle)?;
        }
        for f in &scene.fluid_groups {
            solver.add_fluids(queue, &f.positions, f.mass_per_particle)?;
        }

        info!(
            "solver constructed: {} particles, {} rigid bodies, grid {}x{}x{}",
            solver.particles.num_particles(),
            solver.particles.num_rigid_bodies(),
            dims.x,
            dims.y,
            dims.z
        );

        Ok(solver)
    }

    fn layout_particles(device: &wgpu::Device) -> BindGroupLayoutWithDesc {
        let mut b = BindGroupLayoutBuilder::new();
        for _ in 0..13 {
            b = b.next_binding_compute(binding_glsl::buffer(false));
        }
        b.create(device, "BindGroupLayout: particle buffers")
    }

    fn layout_grid(device: &wgpu::Device) -> BindGroupLayoutWithDesc {
        BindGroupLayoutBuilder::new()
            .next_binding_compute(binding_glsl::buffer(false)) // cellStart
            .next_binding_compute(binding_glsl::buffer(false)) // sortedParticleId
            .next_binding_compute(binding_glsl::uniform()) // gridUniforms
            .next_binding_compute(binding_glsl::buffer(false)) // cellId
            .next_binding_compute(binding_glsl::buffer(false)) // particleId
            .create(device, "BindGroupLayout: uniform grid")
    }

    fn layout_rigid_bodies(device: &wgpu::Device) -> BindGroupLayoutWithDesc {
        BindGroupLayoutBuilder::new()
            .next_binding_compute(binding_glsl::buffer(false)) // particleRange
            .next_binding_compute(binding_glsl::buffer(false)) // referencePosition
            .next_binding_compute(binding_glsl::buffer(false)) // rotation
            .next_binding_compute(binding_glsl::buffer(false)) // centerOfMass
            .create(device, "BindGroupLayout: rigid body table")
    }

    fn layout_uniforms(device: &wgpu::Device) -> BindGroupLayoutWithDesc {
        BindGroupLayoutBuilder::new()
            .next_binding_compute(binding_glsl::uniform())
            .create(device, "BindGroupLayout: simulation uniforms")
    }

    fn layout_grid_scratch(device: &wgpu::Device) -> BindGroupLayoutWithDesc {
        BindGroupLayoutBuilder::new()
            .next_binding_compute(binding_glsl::buffer(false)) // cellCount
            .next_binding_compute(binding_glsl::buffer(false)) // cellWriteCursor
            .create(device, "BindGroupLayout: grid scratch")
    }

    fn write_grid_uniforms(&self, queue: &wgpu::Queue) {
        let origin = self.grid.origin;
        self.grid_uniforms.update_content(
            queue,
            GridUniformsGpu {
                origin: [origin.x, origin.y, origin.z, 0.0],
                dims: [self.grid.dims.x as f32, self.grid.dims.y as f32, self.grid.dims.z as f32, self.grid.cell_size],
            },
        );
    }

    /// Appends a rigid body's particles, forwarded to the buffer owner and
    /// the rigid-body table together so both stay consistent.
    pub fn add_rigid_body(
        &mut self,
        queue: &wgpu::Queue,
        world_positions: &[Point3<f32>],
        reference_positions: &[Vector3<f32>],
        mass_per_particle: f32,
    ) -> Result<u32, SolverError> {
        if world_positions.len() as u32 > NUM_MAX_PARTICLE_PER_RIGID_BODY {
            return Err(SolverError::CapacityExceeded {
                requested: world_positions.len() as u32,
                available: NUM_MAX_PARTICLE_PER_RIGID_BODY,
            });
        }
        let (id, range) = self.particles.add_rigid_body(queue, world_positions, reference_positions, mass_per_particle)?;
        self.rigid_bodies.write_body(queue, id, range, reference_positions);
        Ok(id)
    }

    /// Appends a group of granular particles.
    pub fn add_granulars(&mut self, queue: &wgpu::Queue, positions: &[Point3<f32>], mass_per_particle: f32) -> Result<(), SolverError> {
        self.particles.add_granulars(queue, positions, mass_per_particle)
    }

    /// Appends a group of fluid particles. Rest density is a solver-wide
    /// constant set once from the scene at construction, not per-group.
    pub fn add_fluids(&mut self, queue: &wgpu::Queue, positions: &[Point3<f32>], mass_per_particle: f32) -> Result<(), SolverError> {
        self.particles.add_fluids(queue, positions, mass_per_particle)
    }

    pub fn num_particles(&self) -> u32 {
        self.particles.num_particles()
    }

    /// The renderer-visible committed position buffer: tightly packed
    /// 4-vectors, read-only from the renderer's perspective, updated only at
    /// the end of `update`.
    pub fn position_buffer(&self) -> &wgpu::Buffer {
        &self.particles.position
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SolverConfig {
        &mut self.config
    }

    /// Recompiles any pipeline whose shader changed on disk, same hot-reload
    /// contract as `PipelineManager::reload_changed_pipelines`.
    pub fn reload_changed_shaders(&mut self, device: &wgpu::Device, shader_dir: &ShaderDirectory) {
        self.pipeline_manager.reload_changed_pipelines(device, shader_dir);
    }

    fn write_uniforms(&self, queue: &wgpu::Queue, delta_time: f32, frame_delta_time: f32) {
        let mut planes = [PlaneGpu { origin_and_radius: [0.0; 4], normal: [0.0; 4] }; MAX_PLANES];
        let num_planes = self.planes.len().min(MAX_PLANES);
        for (slot, (origin, normal)) in planes.iter_mut().zip(self.planes.iter()) {
            slot.origin_and_radius = [origin.x, origin.y, origin.z, self.particle_radius];
            slot.normal = [normal.normalize().x, normal.normalize().y, normal.normalize().z, 0.0];
        }

        self.simulation_uniforms.update_content(
            queue,
            SimulationUniformsGpu {
                delta_time,
                particle_radius: self.particle_radius,
                rest_density: self.rest_density,
                s_corr_k: self.config.s_corr_k,

                s_corr_n: self.config.s_corr_n,
                pbf_epsilon: self.config.pbf_epsilon,
                vorticity_epsilon: self.config.vorticity_epsilon,
                cohesion_strength: self.config.cohesion_strength,

                xsph_c: self.config.xsph_c,
                mass_scaling_k: self.config.mass_scaling_k,
                sleep_epsilon_sq: self.config.sleep_epsilon * self.config.sleep_epsilon,
                num_planes: num_planes as u32,

                frame_delta_time: [frame_delta_time, 0.0, 0.0, 0.0],
                gravity: [self.config.gravity.x, self.config.gravity.y, self.config.gravity.z, 0.0],
                planes,
            },
        );
    }

    fn dispatch(&self, cpass: &mut wgpu::ComputePass, handle: &ComputePipelineHandle, push_constants: &[u32], count: u32, local_size: u32) {
        cpass.set_pipeline(self.pipeline_manager.get_compute(handle));
        cpass.set_push_constants(0, bytemuck::cast_slice(push_constants));
        let groups = wgpu_utils::compute_group_size_1d(count, local_size);
        cpass.dispatch(groups, 1, 1);
    }

    /// Advances the simulation one frame: runs `S` substeps of integration,
    /// stabilization, grid rebuild, constraint projection, velocity
    /// reconstruction/commit, and fluid post-processing, in that exact
    /// order, submitting one command buffer to the queue. Scopes are
    /// timed the same way `HybridFluid::step` times its own passes, so a
    /// front end can surface per-pass GPU timings from the same `profiler`
    /// across frames.
    pub fn update(&mut self, device: &wgpu::Device, profiler: &mut GpuProfiler, queue: &wgpu::Queue, total_delta_time: f32) {
        let substeps = self.config.substeps.max(1);
        let delta_time = total_delta_time / substeps as f32;
        let n = self.particles.num_particles();
        if n == 0 {
            return;
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("solver substep") });

        for substep in 0..substeps {
            self.write_uniforms(queue, delta_time, total_delta_time);

            wgpu_profiler!(&format!("substep {}", substep), profiler, &mut encoder, device, {
                wgpu_profiler!("integrate", profiler, &mut encoder, device, {
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("integrate") });
                    self.bind_all(&mut cpass);
                    self.dispatch(&mut cpass, &self.pipelines.integrate, &[n, 0], n, COMPUTE_LOCAL_SIZE);
                });

                wgpu_profiler!("stabilize", profiler, &mut encoder, device, {
                    for _ in 0..self.config.stabilize_iters {
                        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("stabilize") });
                        self.bind_all(&mut cpass);
                        self.dispatch(&mut cpass, &self.pipelines.stabilize, &[n, 0], n, COMPUTE_LOCAL_SIZE);
                    }
                });

                wgpu_profiler!("constraint projection", profiler, &mut encoder, device, {
                    for _ in 0..self.config.grid_iters {
                        wgpu_profiler!("build grid", profiler, &mut encoder, device, {
                            self.build_grid(&mut encoder, n);
                        });

                        for _ in 0..self.config.constraint_iters {
                            {
                                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("plane collision") });
                                self.bind_all(&mut cpass);
                                self.dispatch(&mut cpass, &self.pipelines.plane_collision, &[n, 0], n, COMPUTE_LOCAL_SIZE);
                            }

                            {
                                let mut cpass =
                                    encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("particle-particle collision") });
                                self.bind_all(&mut cpass);
                                self.dispatch(&mut cpass, &self.pipelines.particle_particle_collision, &[n, 0], n, COMPUTE_LOCAL_SIZE);
                            }
                            self.copy_scratch_positions(&mut encoder, n);

                            {
                                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("fluid density/lambda") });
                                self.bind_all(&mut cpass);
                                self.dispatch(
                                    &mut cpass,
                                    &self.pipelines.fluid_density_lambda,
                                    &[n, self.kernel_radius.to_bits()],
                                    n,
                                    COMPUTE_LOCAL_SIZE,
                                );
                            }
                            {
                                let mut cpass =
                                    encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("fluid position correction") });
                                self.bind_all(&mut cpass);
                                self.dispatch(
                                    &mut cpass,
                                    &self.pipelines.fluid_position_correction,
                                    &[n, self.kernel_radius.to_bits()],
                                    n,
                                    COMPUTE_LOCAL_SIZE,
                                );
                            }
                            self.copy_scratch_positions(&mut encoder, n);

                            if self.particles.num_rigid_bodies() > 0 {
                                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("shape matching") });
                                self.bind_all(&mut cpass);
                                cpass.set_pipeline(self.pipeline_manager.get_compute(&self.pipelines.shape_matching));
                                cpass.set_push_constants(0, bytemuck::cast_slice(&[n, 0]));
                                // One workgroup per rigid body; the workgroup's NUM_MAX_PARTICLE_PER_RIGID_BODY
                                // lanes cover the body's particle range (validated not to exceed it in `add_rigid_body`).
                                cpass.dispatch(self.particles.num_rigid_bodies(), 1, 1);
                            }
                        }
                    }
                });

                {
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("velocity update & commit") });
                    self.bind_all(&mut cpass);
                    self.dispatch(&mut cpass, &self.pipelines.velocity_update, &[n, 0], n, COMPUTE_LOCAL_SIZE);
                }

                wgpu_profiler!("fluid post-processing", profiler, &mut encoder, device, {
                    {
                        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("vorticity") });
                        self.bind_all(&mut cpass);
                        self.dispatch(&mut cpass, &self.pipelines.vorticity, &[n, self.kernel_radius.to_bits()], n, COMPUTE_LOCAL_SIZE);
                    }
                    {
                        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("vorticity confinement") });
                        self.bind_all(&mut cpass);
                        self.dispatch(&mut cpass, &self.pipelines.vorticity_force, &[n, self.kernel_radius.to_bits()], n, COMPUTE_LOCAL_SIZE);
                    }

                    if self.config.cohesion_enabled {
                        {
                            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("cohesion normals") });
                            self.bind_all(&mut cpass);
                            self.dispatch(&mut cpass, &self.pipelines.cohesion_normals, &[n, self.kernel_radius.to_bits()], n, COMPUTE_LOCAL_SIZE);
                        }
                        {
                            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("cohesion force") });
                            self.bind_all(&mut cpass);
                            self.dispatch(&mut cpass, &self.pipelines.cohesion_force, &[n, self.kernel_radius.to_bits()], n, COMPUTE_LOCAL_SIZE);
                        }
                        self.copy_scratch_velocity(&mut encoder, n);
                    }

                    {
                        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("xsph viscosity") });
                        self.bind_all(&mut cpass);
                        self.dispatch(&mut cpass, &self.pipelines.xsph_viscosity, &[n, self.kernel_radius.to_bits()], n, COMPUTE_LOCAL_SIZE);
                    }
                    self.copy_scratch_velocity(&mut encoder, n);
                });
            });
        }

        profiler.resolve_queries(&mut encoder);
        queue.submit(Some(encoder.finish()));
        profiler.end_frame().unwrap();
    }

    fn bind_all(&self, cpass: &mut wgpu::ComputePass) {
        cpass.set_bind_group(0, &self.bind_group_particles, &[]);
        cpass.set_bind_group(1, &self.bind_group_grid, &[]);
        cpass.set_bind_group(2, &self.bind_group_rigid_bodies, &[]);
        cpass.set_bind_group(3, &self.bind_group_uniforms, &[]);
        cpass.set_bind_group(4, &self.bind_group_grid_scratch, &[]);
    }

    /// Rebuilds the uniform grid from predicted positions: reset,
    /// assign+count, scan, rewrite, in that order — every pass is a
    /// kernel-launch boundary apart, so the scan never races the count.
    fn build_grid(&self, encoder: &mut wgpu::CommandEncoder, n: u32) {
        let num_cells = self.grid.dims.cell_count();
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("grid clear") });
            self.bind_all(&mut cpass);
            self.dispatch(&mut cpass, &self.pipelines.grid_clear, &[num_cells, 0], num_cells, COMPUTE_LOCAL_SIZE);
        }
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("grid assign+count") });
            self.bind_all(&mut cpass);
            self.dispatch(&mut cpass, &self.pipelines.grid_assign_count, &[n, 0], n, COMPUTE_LOCAL_SIZE);
        }
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("grid scan") });
            self.bind_all(&mut cpass);
            self.dispatch(&mut cpass, &self.pipelines.grid_scan, &[num_cells, 0], 1, 1);
        }
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("grid rewrite") });
            self.bind_all(&mut cpass);
            self.dispatch(&mut cpass, &self.pipelines.grid_rewrite, &[n, 0], n, COMPUTE_LOCAL_SIZE);
        }
    }

    fn copy_scratch_positions(&self, encoder: &mut wgpu::CommandEncoder, n: u32) {
        let size = n as u64 * 16;
        encoder.copy_buffer_to_buffer(&self.particles.temp_position, 0, &self.particles.predicted_position, 0, size);
    }

    fn copy_scratch_velocity(&self, encoder: &mut wgpu::CommandEncoder, n: u32) {
        let size = n as u64 * 16;
        encoder.copy_buffer_to_buffer(&self.particles.velocity_scratch, 0, &self.particles.velocity, 0, size);
    }
}

/// Derives a `GridDimensions` large enough for a scene, exposed for front
/// ends that want to pre-size their own debug visualizations.
pub fn grid_dimensions_for(world_extent: Vector3<f32>, kernel_radius: f32) -> GridDimensions {
    grid::dimensions_for_extent(world_extent, kernel_radius)
}
