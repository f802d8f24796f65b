//! Live mesh that LOD levels are installed into

use crate::buffer::{IndexStorage, IndexWidth, MeshBuffers, SubMeshBuffers, VertexBuffer};
use crate::config::{LodConfig, LodStrategy};
use crate::{Error, Result};
use std::sync::Arc;

/// Index buffer owned by the render side.
///
/// Created by an index buffer factory at injection time and shared by every
/// LOD span that points into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareIndexBuffer {
    storage: IndexStorage,
}

impl HardwareIndexBuffer {
    /// Upload raw native-endian index bytes
    pub fn from_bytes(width: IndexWidth, bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            storage: IndexStorage::from_bytes(bytes, width.byte_size())?,
        })
    }

    pub fn from_storage(storage: IndexStorage) -> Self {
        Self { storage }
    }

    pub fn width(&self) -> IndexWidth {
        self.storage.width()
    }

    /// Number of indices the buffer holds
    pub fn index_count(&self) -> usize {
        self.storage.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.storage.len() * self.storage.width().byte_size()
    }

    pub fn storage(&self) -> &IndexStorage {
        &self.storage
    }
}

/// A span of an installed index buffer used by one LOD level of one submesh.
#[derive(Debug, Clone)]
pub struct IndexData {
    pub start: usize,
    pub count: usize,
    pub buffer: Arc<HardwareIndexBuffer>,
}

impl IndexData {
    /// Indices of the span
    pub fn indices(&self) -> Vec<u32> {
        (self.start..self.start + self.count)
            .filter_map(|i| self.buffer.storage().get(i))
            .collect()
    }

    pub fn triangle_count(&self) -> usize {
        self.count / 3
    }
}

/// Switch value of one installed LOD level (level 0 has none).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshLodUsage {
    pub value: f32,
    /// Unique vertex count the level was generated with
    pub unique_vertex_count: usize,
}

/// One drawable part of a mesh.
#[derive(Debug, Clone)]
pub struct SubMesh {
    /// Index into the mesh's shared vertex buffer instead of `vertices`
    pub use_shared_vertices: bool,
    pub vertices: Option<VertexBuffer>,
    /// Full resolution indices, always LOD 0
    pub indices: IndexStorage,
    /// Generated LOD levels 1..n
    pub lod_faces: Vec<IndexData>,
}

impl SubMesh {
    /// Submesh with its own vertex buffer
    pub fn new(vertices: VertexBuffer, indices: IndexStorage) -> Self {
        Self {
            use_shared_vertices: false,
            vertices: Some(vertices),
            indices,
            lod_faces: Vec::new(),
        }
    }

    /// Submesh indexing the mesh's shared vertex buffer
    pub fn shared(indices: IndexStorage) -> Self {
        Self {
            use_shared_vertices: true,
            vertices: None,
            indices,
            lod_faces: Vec::new(),
        }
    }

    /// Index count of a LOD level, level 0 being the full resolution buffer
    pub fn lod_index_count(&self, level: usize) -> Option<usize> {
        match level {
            0 => Some(self.indices.len()),
            n => self.lod_faces.get(n - 1).map(|f| f.count),
        }
    }

    /// Indices of a LOD level
    pub fn lod_indices(&self, level: usize) -> Option<Vec<u32>> {
        match level {
            0 => Some(self.indices.iter().collect()),
            n => self.lod_faces.get(n - 1).map(IndexData::indices),
        }
    }
}

/// A mesh with an optional shared vertex buffer and any number of submeshes.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub shared_vertices: Option<VertexBuffer>,
    pub submeshes: Vec<SubMesh>,
    lod_strategy: LodStrategy,
    lod_usages: Vec<MeshLodUsage>,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared_vertices: None,
            submeshes: Vec::new(),
            lod_strategy: LodStrategy::Distance,
            lod_usages: Vec::new(),
        }
    }

    pub fn with_shared_vertices(mut self, vertices: VertexBuffer) -> Self {
        self.shared_vertices = Some(vertices);
        self
    }

    pub fn with_submesh(mut self, submesh: SubMesh) -> Self {
        self.submeshes.push(submesh);
        self
    }

    /// Vertex buffer a submesh indexes into
    pub fn submesh_vertices<'a>(&'a self, submesh: &'a SubMesh) -> Option<&'a VertexBuffer> {
        if submesh.use_shared_vertices {
            self.shared_vertices.as_ref()
        } else {
            submesh.vertices.as_ref()
        }
    }

    /// Every vertex buffer of the mesh, the shared one first
    pub fn vertex_buffers(&self) -> impl Iterator<Item = &VertexBuffer> {
        self.shared_vertices
            .iter()
            .chain(self.submeshes.iter().filter_map(|s| s.vertices.as_ref()))
    }

    /// Copy the full resolution source buffers out of the mesh
    pub fn copy_buffers(&self) -> MeshBuffers {
        MeshBuffers {
            shared_vertices: self.shared_vertices.clone(),
            submeshes: self
                .submeshes
                .iter()
                .map(|s| SubMeshBuffers {
                    use_shared_vertices: s.use_shared_vertices,
                    vertices: if s.use_shared_vertices {
                        None
                    } else {
                        s.vertices.clone()
                    },
                    indices: s.indices.clone(),
                })
                .collect(),
        }
    }

    /// Total number of full resolution triangles
    pub fn triangle_count(&self) -> usize {
        self.submeshes.iter().map(|s| s.indices.len() / 3).sum()
    }

    /// Number of LOD levels including the full resolution level 0
    pub fn num_lod_levels(&self) -> usize {
        1 + self.lod_usages.len()
    }

    pub fn lod_strategy(&self) -> LodStrategy {
        self.lod_strategy
    }

    pub fn lod_usages(&self) -> &[MeshLodUsage] {
        &self.lod_usages
    }

    /// Drop every generated LOD level, keeping the full resolution buffers.
    pub fn remove_lod_levels(&mut self) {
        self.lod_usages.clear();
        for submesh in &mut self.submeshes {
            submesh.lod_faces.clear();
        }
    }

    /// Replace all LOD usages of the mesh.
    ///
    /// `lod_faces[s]` holds one span per baked level for submesh `s`. Levels
    /// the generator skipped are not installed. Nothing is changed when the
    /// data is rejected.
    pub fn configure_lod_usage(
        &mut self,
        lod_faces: Vec<Vec<IndexData>>,
        config: &LodConfig,
    ) -> Result<()> {
        if lod_faces.len() != self.submeshes.len() {
            return Err(Error::InvalidData(format!(
                "got LOD data for {} submeshes, mesh '{}' has {}",
                lod_faces.len(),
                self.name,
                self.submeshes.len()
            )));
        }
        let baked = config.baked_level_count();
        for (s, faces) in lod_faces.iter().enumerate() {
            if faces.len() != baked {
                return Err(Error::InvalidData(format!(
                    "submesh {} has {} LOD spans, expected {}",
                    s,
                    faces.len(),
                    baked
                )));
            }
            for face in faces {
                if face.count < 3 || face.count % 3 != 0 {
                    return Err(Error::Buffer(format!(
                        "submesh {}: LOD span of {} indices is not a non-empty triangle list",
                        s, face.count
                    )));
                }
                if face.start + face.count > face.buffer.index_count() {
                    return Err(Error::Buffer(format!(
                        "submesh {}: LOD span {}..{} exceeds buffer of {} indices",
                        s,
                        face.start,
                        face.start + face.count,
                        face.buffer.index_count()
                    )));
                }
            }
        }

        self.remove_lod_levels();
        self.lod_strategy = config.strategy;
        self.lod_usages = config
            .levels
            .iter()
            .filter(|l| !l.out_skipped)
            .map(|l| MeshLodUsage {
                value: l.distance,
                unique_vertex_count: l.out_unique_vertex_count,
            })
            .collect();
        for (submesh, faces) in self.submeshes.iter_mut().zip(lod_faces) {
            submesh.lod_faces = faces;
        }
        Ok(())
    }
}
