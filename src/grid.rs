//! Uniform grid broad-phase: a fixed-origin, fixed-cell-size 3D spatial hash
//! rebuilt from predicted positions every grid iteration via a
//! count/scan/rewrite binning pass, generalized from a linked-list volume
//! texture to a `cellStart`/`sortedParticleId` pair sized for arbitrary (not
//! just fluid) particles.

use cgmath::{EuclideanSpace, Point3};

/// Cell size is fixed at construction to roughly `2.3 * particleRadius`,
/// matching the fluid kernel's smoothing radius `h` so a single grid serves
/// both collision and density neighbor queries.
pub const CELL_SIZE_TO_RADIUS_RATIO: f32 = 2.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridDimensions {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDimensions {
    pub fn cell_count(&self) -> u32 {
        self.x * self.y * self.z
    }
}

/// Host-side reference for `linearize(floor((predicted - origin) / cellSize))`.
/// Out-of-bounds coordinates are clamped into range rather than rejected —
/// particles that drift outside the grid must still land in a valid cell.
pub fn cell_coord(position: Point3<f32>, origin: Point3<f32>, cell_size: f32, dims: GridDimensions) -> (u32, u32, u32) {
    let relative = (position - origin) / cell_size;
    let clamp = |v: f32, max: u32| -> u32 {
        if v.is_nan() {
            0
        } else {
            (v.floor() as i64).clamp(0, max as i64 - 1) as u32
        }
    };
    (clamp(relative.x, dims.x), clamp(relative.y, dims.y), clamp(relative.z, dims.z))
}

/// Linearizes a clamped cell coordinate into `[0, G)`.
pub fn linearize(cell: (u32, u32, u32), dims: GridDimensions) -> u32 {
    cell.0 + dims.x * (cell.1 + dims.y * cell.2)
}

/// Cell index for `position`, combining [`cell_coord`] and [`linearize`].
pub fn cell_index(position: Point3<f32>, origin: Point3<f32>, cell_size: f32, dims: GridDimensions) -> u32 {
    linearize(cell_coord(position, origin, cell_size, dims), dims)
}

/// Owns the grid's GPU-side arrays: `cellStart` sized to the cell count, and
/// `cellId`/`particleId` (plus their sorted counterpart) sized to the
/// particle capacity. The particle capacity is fixed and known at
/// construction, so sizing the scratch once to that capacity up front
/// already covers the worst case — there is no smaller on-demand allocation
/// to make.
pub struct UniformGrid {
    pub dims: GridDimensions,
    pub cell_size: f32,
    pub origin: Point3<f32>,

    pub cell_start: wgpu::Buffer,
    pub cell_id: wgpu::Buffer,
    pub particle_id: wgpu::Buffer,
    pub sorted_particle_id: wgpu::Buffer,
}

impl UniformGrid {
    pub fn new(device: &wgpu::Device, dims: GridDimensions, cell_size: f32, origin: Point3<f32>, particle_capacity: u32) -> Self {
        let cell_count = dims.cell_count() as u64;
        let make = |label: &str, count: u64, stride: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: count * stride,
                usage: wgpu::BufferUsage::STORAGE | wgpu::BufferUsage::COPY_DST,
                mapped_at_creation: false,
            })
        };

        UniformGrid {
            dims,
            cell_size,
            origin,
            cell_start: make("Buffer: grid cellStart", cell_count, 4),
            cell_id: make("Buffer: grid cellId", particle_capacity as u64, 4),
            particle_id: make("Buffer: grid particleId", particle_capacity as u64, 4),
            sorted_particle_id: make("Buffer: grid sortedParticleId", particle_capacity as u64, 4),
        }
    }
}

/// Derives grid dimensions large enough to cover `world_extent` (a bounding
/// box half-size around the origin) at the given cell size, with a minimum
/// of 1 cell per axis.
pub fn dimensions_for_extent(world_extent: cgmath::Vector3<f32>, cell_size: f32) -> GridDimensions {
    let cells_per_axis = |extent: f32| -> u32 { ((2.0 * extent / cell_size).ceil() as u32).max(1) };
    GridDimensions {
        x: cells_per_axis(world_extent.x),
        y: cells_per_axis(world_extent.y),
        z: cells_per_axis(world_extent.z),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::point3;

    fn dims() -> GridDimensions {
        GridDimensions { x: 4, y: 4, z: 4 }
    }

    #[test]
    fn cell_coord_maps_origin_to_zero_cell() {
        let origin = point3(0.0, 0.0, 0.0);
        assert_eq!(cell_coord(origin, origin, 1.0, dims()), (0, 0, 0));
    }

    #[test]
    fn cell_coord_clamps_out_of_bounds_instead_of_rejecting() {
        let origin = point3(0.0, 0.0, 0.0);
        let far = point3(1000.0, -1000.0, 1000.0);
        let (x, y, z) = cell_coord(far, origin, 1.0, dims());
        assert_eq!(x, 3);
        assert_eq!(y, 0);
        assert_eq!(z, 3);
    }

    #[test]
    fn cell_coord_is_deterministic_near_boundaries() {
        let origin = point3(0.0, 0.0, 0.0);
        let on_boundary = point3(1.0, 1.0, 1.0);
        assert_eq!(cell_coord(on_boundary, origin, 1.0, dims()), (1, 1, 1));
        let just_below = point3(0.999, 0.999, 0.999);
        assert_eq!(cell_coord(just_below, origin, 1.0, dims()), (0, 0, 0));
    }

    #[test]
    fn linearize_is_injective_within_dims() {
        let d = dims();
        let mut seen = std::collections::HashSet::new();
        for z in 0..d.z {
            for y in 0..d.y {
                for x in 0..d.x {
                    let idx = linearize((x, y, z), d);
                    assert!(seen.insert(idx), "collision at ({},{},{}) -> {}", x, y, z, idx);
                }
            }
        }
        assert_eq!(seen.len() as u32, d.cell_count());
    }

    #[test]
    fn dimensions_for_extent_covers_requested_volume() {
        let dims = dimensions_for_extent(cgmath::vec3(2.8, 3.0, 1.9), 0.115);
        assert!(dims.x as f32 * 0.115 >= 2.0 * 2.8 - 1e-3);
        assert!(dims.y as f32 * 0.115 >= 2.0 * 3.0 - 1e-3);
        assert!(dims.z as f32 * 0.115 >= 2.0 * 1.9 - 1e-3);
    }
}
