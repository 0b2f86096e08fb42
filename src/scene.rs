//! Scene description consumed at solver construction: a top-level struct
//! decoded with `serde_json::from_reader` over a `BufReader<File>`, naming
//! the particle capacities, geometry and bodies the solver should build
//! from.

use cgmath::{Point3, Vector3};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Deserialize, Clone, Copy, Debug)]
pub struct PlaneConfig {
    pub origin: Point3<f32>,
    pub normal: Vector3<f32>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RigidBodyConfig {
    pub world_positions: Vec<Point3<f32>>,
    pub reference_positions: Vec<Vector3<f32>>,
    pub mass_per_particle: f32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GranularGroupConfig {
    pub positions: Vec<Point3<f32>>,
    pub mass_per_particle: f32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct FluidGroupConfig {
    pub positions: Vec<Point3<f32>>,
    pub mass_per_particle: f32,
}

fn default_particle_radius() -> f32 {
    0.05
}
fn default_rest_density() -> f32 {
    6378.0
}
fn default_gravity() -> Vector3<f32> {
    Vector3::new(0.0, -9.8, 0.0)
}
fn default_cohesion_enabled() -> bool {
    true
}

/// Top-level scene configuration, deserialized from a scene JSON file via
/// `serde_json::from_reader`.
#[derive(Deserialize, Clone, Debug)]
pub struct SceneConfig {
    pub max_particles: u32,
    pub max_rigid_bodies: u32,

    #[serde(default = "default_particle_radius")]
    pub particle_radius: f32,
    #[serde(default = "default_rest_density")]
    pub rest_density: f32,
    #[serde(default = "default_gravity")]
    pub gravity: Vector3<f32>,
    #[serde(default = "default_cohesion_enabled")]
    pub cohesion_enabled: bool,

    #[serde(default)]
    pub planes: Vec<PlaneConfig>,
    #[serde(default)]
    pub rigid_bodies: Vec<RigidBodyConfig>,
    #[serde(default)]
    pub granular_groups: Vec<GranularGroupConfig>,
    #[serde(default)]
    pub fluid_groups: Vec<FluidGroupConfig>,
}

#[derive(thiserror::Error, Debug)]
pub enum SceneLoadError {
    #[error("failed to open scene file {path:?}: {source}")]
    Io { path: std::path::PathBuf, source: std::io::Error },
    #[error("failed to parse scene file {path:?}: {source}")]
    Parse { path: std::path::PathBuf, source: serde_json::Error },
}

impl SceneConfig {
    pub fn from_file(path: &Path) -> Result<Self, SceneLoadError> {
        let file = File::open(path).map_err(|source| SceneLoadError::Io { path: path.to_path_buf(), source })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|source| SceneLoadError::Parse { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_scene_with_defaults() {
        let json = r#"{
            "max_particles": 1000,
            "max_rigid_bodies": 4,
            "planes": [{"origin": [0.0, 0.0, 0.0], "normal": [0.0, 1.0, 0.0]}]
        }"#;
        let scene: SceneConfig = serde_json::from_str(json).expect("valid minimal scene");
        assert_eq!(scene.max_particles, 1000);
        assert_eq!(scene.max_rigid_bodies, 4);
        assert_eq!(scene.planes.len(), 1);
        assert!(scene.rigid_bodies.is_empty());
        assert_eq!(scene.rest_density, 6378.0);
        assert_eq!(scene.gravity, Vector3::new(0.0, -9.8, 0.0));
        assert!(scene.cohesion_enabled);
    }

    #[test]
    fn parses_full_scene() {
        let json = r#"{
            "max_particles": 5000,
            "max_rigid_bodies": 8,
            "particle_radius": 0.05,
            "rest_density": 6000.0,
            "gravity": [0.0, -9.8, 0.0],
            "cohesion_enabled": false,
            "planes": [{"origin": [0.0, 0.0, 0.0], "normal": [0.0, 1.0, 0.0]}],
            "rigid_bodies": [{
                "world_positions": [[0.0, 1.0, 0.0], [0.1, 1.0, 0.0]],
                "reference_positions": [[-0.05, 0.0, 0.0], [0.05, 0.0, 0.0]],
                "mass_per_particle": 1.0
            }],
            "granular_groups": [{"positions": [[0.0, 0.5, 0.0]], "mass_per_particle": 1.0}],
            "fluid_groups": [{"positions": [[0.0, 2.0, 0.0]], "mass_per_particle": 0.1}]
        }"#;
        let scene: SceneConfig = serde_json::from_str(json).expect("valid full scene");
        assert_eq!(scene.rigid_bodies[0].world_positions.len(), 2);
        assert_eq!(scene.granular_groups.len(), 1);
        assert_eq!(scene.fluid_groups[0].mass_per_particle, 0.1);
        assert!(!scene.cohesion_enabled);
    }

    #[test]
    fn rejects_malformed_json() {
        let json = r#"{ "max_particles": "not a number" }"#;
        let result: Result<SceneConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
