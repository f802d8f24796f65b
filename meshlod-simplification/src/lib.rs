//! Progressive mesh LOD generation
//!
//! This crate turns the source buffers of a mesh into a chain of reduced
//! index buffers:
//! - Vertex/edge/triangle adjacency graph with position welding
//! - Convex hull outer wall detection
//! - Cost driven edge collapse with plain and merged LOD baking

pub mod adjacency;
pub mod outside_marker;
pub mod edge_collapse;
pub mod bake;

pub use adjacency::*;
pub use outside_marker::*;
pub use edge_collapse::*;
pub use bake::*;

use meshlod_core::{GeneratedLods, LodConfig, MeshBuffers, Result};

/// Generate LOD index buffers for a mesh
pub trait LodGenerator {
    /// Build every level of `config` from `input`.
    ///
    /// The `out_*` fields of the levels and `use_vertex_normals` are updated
    /// in place. The result holds one span per submesh for every level that
    /// was not skipped.
    fn generate(&mut self, input: &MeshBuffers, config: &mut LodConfig) -> Result<GeneratedLods>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use meshlod_core::{
        IndexStorage, MeshBuffers, Point3f, SubMeshBuffers, Vector3f, VertexBuffer,
    };
    use std::collections::HashMap;

    pub fn single_submesh(vertices: VertexBuffer, indices: Vec<u32>) -> MeshBuffers {
        MeshBuffers {
            shared_vertices: None,
            submeshes: vec![SubMeshBuffers {
                use_shared_vertices: false,
                vertices: Some(vertices),
                indices: IndexStorage::U32(indices),
            }],
        }
    }

    pub fn tetrahedron() -> MeshBuffers {
        let positions = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(0.5, 1.0, 0.0),
            Point3f::new(0.5, 0.5, 1.0),
        ];
        single_submesh(
            VertexBuffer::new(positions),
            vec![0, 2, 1, 0, 1, 3, 1, 2, 3, 2, 0, 3],
        )
    }

    /// `size` x `size` vertices on the z = 0 plane, facing +z
    pub fn plane_grid(size: usize) -> MeshBuffers {
        let mut positions = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                positions.push(Point3f::new(x as f32, y as f32, 0.0));
            }
        }
        let normals = vec![Vector3f::z(); positions.len()];

        let mut indices = Vec::new();
        for y in 0..size - 1 {
            for x in 0..size - 1 {
                let i0 = (y * size + x) as u16;
                let i1 = i0 + 1;
                let i2 = i0 + size as u16;
                let i3 = i2 + 1;
                indices.extend_from_slice(&[i0, i1, i2, i2, i1, i3]);
            }
        }

        MeshBuffers {
            shared_vertices: None,
            submeshes: vec![SubMeshBuffers {
                use_shared_vertices: false,
                vertices: Some(VertexBuffer::new(positions).with_normals(normals)),
                indices: IndexStorage::U16(indices),
            }],
        }
    }

    fn octahedron_positions() -> Vec<Point3f> {
        vec![
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(-1.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(0.0, -1.0, 0.0),
            Point3f::new(0.0, 0.0, 1.0),
            Point3f::new(0.0, 0.0, -1.0),
        ]
    }

    /// Outward wound faces of the unit octahedron
    fn octahedron_faces() -> Vec<[u32; 3]> {
        let mut faces = Vec::with_capacity(8);
        for sx in [1i32, -1] {
            for sy in [1i32, -1] {
                for sz in [1i32, -1] {
                    let a = if sx > 0 { 0 } else { 1 };
                    let b = if sy > 0 { 2 } else { 3 };
                    let c = if sz > 0 { 4 } else { 5 };
                    if sx * sy * sz > 0 {
                        faces.push([a, b, c]);
                    } else {
                        faces.push([a, c, b]);
                    }
                }
            }
        }
        faces
    }

    pub fn octahedron() -> MeshBuffers {
        let indices = octahedron_faces().into_iter().flatten().collect();
        single_submesh(VertexBuffer::new(octahedron_positions()), indices)
    }

    /// Octahedron with a small disconnected tetrahedron inside
    pub fn octahedron_with_core() -> MeshBuffers {
        let mut positions = octahedron_positions();
        positions.extend([
            Point3f::new(0.2, 0.2, 0.2),
            Point3f::new(-0.2, -0.2, 0.2),
            Point3f::new(-0.2, 0.2, -0.2),
            Point3f::new(0.2, -0.2, -0.2),
        ]);
        let mut indices: Vec<u32> = octahedron_faces().into_iter().flatten().collect();
        indices.extend_from_slice(&[6, 7, 8, 6, 8, 9, 6, 9, 7, 7, 9, 8]);
        single_submesh(VertexBuffer::new(positions), indices)
    }

    /// Octahedron whose (+x, +y, +z) face is split around a slightly sunken point
    pub fn split_octahedron() -> MeshBuffers {
        let mut positions = octahedron_positions();
        positions.push(Point3f::new(0.3, 0.3, 0.3));
        let mut indices = Vec::new();
        for [a, b, c] in octahedron_faces() {
            if [a, b, c] == [0, 2, 4] {
                indices.extend_from_slice(&[0, 2, 6, 2, 4, 6, 4, 0, 6]);
            } else {
                indices.extend_from_slice(&[a, b, c]);
            }
        }
        single_submesh(VertexBuffer::new(positions), indices)
    }

    /// Unit sphere from an octahedron subdivided `level` times, with normals.
    ///
    /// Level `n` has `8 * 4^n` triangles and `4^(n + 1) + 2` vertices.
    pub fn octahedron_sphere(level: usize) -> MeshBuffers {
        let mut positions = octahedron_positions();
        let mut faces = octahedron_faces();

        for _ in 0..level {
            let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
            let mut midpoint = |a: u32, b: u32, positions: &mut Vec<Point3f>| -> u32 {
                let key = (a.min(b), a.max(b));
                *midpoints.entry(key).or_insert_with(|| {
                    let m = (positions[a as usize].coords + positions[b as usize].coords)
                        .normalize();
                    positions.push(Point3f::from(m));
                    (positions.len() - 1) as u32
                })
            };

            let mut next = Vec::with_capacity(faces.len() * 4);
            for [a, b, c] in faces {
                let ab = midpoint(a, b, &mut positions);
                let bc = midpoint(b, c, &mut positions);
                let ca = midpoint(c, a, &mut positions);
                next.push([a, ab, ca]);
                next.push([ab, b, bc]);
                next.push([ca, bc, c]);
                next.push([ab, bc, ca]);
            }
            faces = next;
        }

        let normals = positions.iter().map(|p| p.coords).collect();
        let indices = faces.into_iter().flatten().collect();
        single_submesh(VertexBuffer::new(positions).with_normals(normals), indices)
    }
}
