//! Headless demo driver (SPEC_FULL.md §7's supplement): constructs a solver
//! from a scene JSON file and steps it for a fixed number of frames without
//! any windowing, camera or renderer — exercising exactly the API a real
//! renderer front end would call, without crossing the out-of-scope
//! boundary on windowing/rendering (spec §1).

use std::path::Path;
use unified_particle_physics::wgpu_utils::shader::ShaderDirectory;
use unified_particle_physics::{SceneConfig, UnifiedParticleSolver};

fn default_scene_json() -> &'static str {
    // Spec §8 scenario 1: a single dropped fluid particle above a ground
    // plane, 60 frames at 1/60s should settle it to rest near the floor.
    r#"{
        "max_particles": 16,
        "max_rigid_bodies": 1,
        "particle_radius": 0.05,
        "rest_density": 6378.0,
        "planes": [{"origin": [0.0, 0.0, 0.0], "normal": [0.0, 1.0, 0.0]}],
        "fluid_groups": [{"positions": [[0.0, 1.0, 0.0]], "mass_per_particle": 0.1}]
    }"#
}

fn load_scene() -> SceneConfig {
    match std::env::args().nth(1) {
        Some(path) => SceneConfig::from_file(Path::new(&path)).expect("failed to load scene file"),
        None => serde_json::from_str(default_scene_json()).expect("built-in default scene is valid"),
    }
}

fn main() {
    env_logger::init();

    let scene = load_scene();

    let instance = wgpu::Instance::new(wgpu::BackendBit::PRIMARY);
    let adapter = futures::executor::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
    }))
    .expect("no suitable compute adapter found");

    let (device, queue) = futures::executor::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("unified particle physics device"),
            features: wgpu::Features::PUSH_CONSTANTS | wgpu::Features::TIMESTAMP_QUERY,
            limits: wgpu::Limits {
                max_push_constant_size: 128,
                ..Default::default()
            },
        },
        None,
    ))
    .expect("failed to create device");

    let shader_dir = ShaderDirectory::new(Path::new("shaders"));
    let mut solver = UnifiedParticleSolver::new(&device, &queue, &shader_dir, &scene).expect("failed to construct solver");
    let mut profiler = wgpu_profiler::GpuProfiler::new(4, queue.get_timestamp_period());

    let frame_dt = 1.0 / 60.0;
    let num_frames = 60;
    for frame in 0..num_frames {
        solver.update(&device, &mut profiler, &queue, frame_dt);
        device.poll(wgpu::Maintain::Wait);
        if frame % 10 == 0 {
            log::info!("frame {} / {} ({} particles)", frame, num_frames, solver.num_particles());
        }
    }

    print_positions(&device, &queue, &solver);
}

/// Maps the committed position buffer read-only and logs it, the same
/// contract a real renderer's frame-end readback would follow (spec §6's
/// "Renderer contract" — read-only mapped view, no writes during mapping).
fn print_positions(device: &wgpu::Device, queue: &wgpu::Queue, solver: &UnifiedParticleSolver) {
    let n = solver.num_particles();
    if n == 0 {
        return;
    }
    let byte_size = n as u64 * 16;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Buffer: position readback staging"),
        size: byte_size,
        usage: wgpu::BufferUsage::COPY_DST | wgpu::BufferUsage::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_buffer_to_buffer(solver.position_buffer(), 0, &staging, 0, byte_size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let map_future = slice.map_async(wgpu::MapMode::Read);
    device.poll(wgpu::Maintain::Wait);
    futures::executor::block_on(map_future).expect("failed to map position readback buffer");

    let data = slice.get_mapped_range();
    let positions: &[[f32; 4]] = bytemuck::cast_slice(&data);
    for (i, p) in positions.iter().enumerate() {
        log::info!("particle {}: ({:.4}, {:.4}, {:.4})", i, p[0], p[1], p[2]);
    }
    drop(data);
    staging.unmap();
}
