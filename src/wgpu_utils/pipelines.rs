use super::shader::ShaderDirectory;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Opaque handle into a [`PipelineManager`]'s pipeline slab. Stable across shader reloads.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ComputePipelineHandle(usize);

pub struct ComputePipelineCreationDesc {
    label: &'static str,
    layout: Rc<wgpu::PipelineLayout>,
    relative_shader_path: PathBuf,
}

impl ComputePipelineCreationDesc {
    pub fn new(label: &'static str, layout: Rc<wgpu::PipelineLayout>, relative_shader_path: &Path) -> Self {
        ComputePipelineCreationDesc {
            label,
            layout,
            relative_shader_path: relative_shader_path.to_path_buf(),
        }
    }
}

struct ManagedComputePipeline {
    desc: ComputePipelineCreationDesc,
    pipeline: wgpu::ComputePipeline,
}

fn create_compute_pipeline(device: &wgpu::Device, shader_dir: &ShaderDirectory, desc: &ComputePipelineCreationDesc) -> Result<wgpu::ComputePipeline, ()> {
    let module = shader_dir.load_shader_module(device, &desc.relative_shader_path)?;
    Ok(device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(desc.label),
        layout: Some(&desc.layout),
        compute_stage: wgpu::ProgrammableStageDescriptor {
            module: &module,
            entry_point: super::shader::SHADER_ENTRY_POINT_NAME,
        },
    }))
}

/// Owns every compute pipeline the solver dispatches, keyed by a stable handle so call sites
/// never juggle `wgpu::ComputePipeline` directly. Mirrors the shader hot-reload workflow: when
/// the watched shader directory reports a change, every pipeline is recompiled in place.
#[derive(Default)]
pub struct PipelineManager {
    pipelines: Vec<ManagedComputePipeline>,
}

impl PipelineManager {
    pub fn new() -> Self {
        PipelineManager { pipelines: Vec::new() }
    }

    pub fn create_compute_pipeline(&mut self, device: &wgpu::Device, shader_dir: &ShaderDirectory, desc: ComputePipelineCreationDesc) -> ComputePipelineHandle {
        let pipeline = create_compute_pipeline(device, shader_dir, &desc).unwrap_or_else(|_| panic!("failed to compile shader for pipeline \"{}\"", desc.label));
        self.pipelines.push(ManagedComputePipeline { desc, pipeline });
        ComputePipelineHandle(self.pipelines.len() - 1)
    }

    pub fn get_compute(&self, handle: &ComputePipelineHandle) -> &wgpu::ComputePipeline {
        &self.pipelines[handle.0].pipeline
    }

    /// Recompiles every tracked pipeline. Call after `ShaderDirectory::detected_change()` reports
    /// a change; a pipeline whose shader fails to recompile keeps its previous, working version.
    pub fn reload_changed_pipelines(&mut self, device: &wgpu::Device, shader_dir: &ShaderDirectory) {
        for managed in &mut self.pipelines {
            match create_compute_pipeline(device, shader_dir, &managed.desc) {
                Ok(pipeline) => managed.pipeline = pipeline,
                Err(()) => log::error!("failed to reload shader for pipeline \"{}\", keeping previous version", managed.desc.label),
            }
        }
    }
}
