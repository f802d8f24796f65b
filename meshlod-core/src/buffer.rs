//! Raw vertex and index buffers exchanged with the renderer

use crate::{Error, Point3f, Result, Vector3f};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Width of a single index in an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexWidth {
    U16,
    U32,
}

impl IndexWidth {
    /// Map a byte size to an index width. Only 2 and 4 byte indices are supported.
    pub fn from_byte_size(size: usize) -> Result<Self> {
        match size {
            2 => Ok(IndexWidth::U16),
            4 => Ok(IndexWidth::U32),
            other => Err(Error::UnsupportedIndexSize(other)),
        }
    }

    /// Size of one index in bytes
    pub fn byte_size(self) -> usize {
        match self {
            IndexWidth::U16 => 2,
            IndexWidth::U32 => 4,
        }
    }
}

/// Index data of one width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStorage {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexStorage {
    /// Create an empty buffer of the given width
    pub fn with_capacity(width: IndexWidth, capacity: usize) -> Self {
        match width {
            IndexWidth::U16 => IndexStorage::U16(Vec::with_capacity(capacity)),
            IndexWidth::U32 => IndexStorage::U32(Vec::with_capacity(capacity)),
        }
    }

    /// Decode native-endian index bytes with an explicit index size.
    ///
    /// `bytes` does not need to be aligned to the index size.
    pub fn from_bytes(bytes: &[u8], index_size: usize) -> Result<Self> {
        let width = IndexWidth::from_byte_size(index_size)?;
        if bytes.len() % index_size != 0 {
            return Err(Error::Buffer(format!(
                "index buffer of {} bytes is not a multiple of the {} byte index size",
                bytes.len(),
                index_size
            )));
        }
        Ok(match width {
            IndexWidth::U16 => IndexStorage::U16(bytemuck::pod_collect_to_vec(bytes)),
            IndexWidth::U32 => IndexStorage::U32(bytemuck::pod_collect_to_vec(bytes)),
        })
    }

    pub fn width(&self) -> IndexWidth {
        match self {
            IndexStorage::U16(_) => IndexWidth::U16,
            IndexStorage::U32(_) => IndexWidth::U32,
        }
    }

    /// Number of indices
    pub fn len(&self) -> usize {
        match self {
            IndexStorage::U16(v) => v.len(),
            IndexStorage::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index at position `i`, widened to u32
    pub fn get(&self, i: usize) -> Option<u32> {
        match self {
            IndexStorage::U16(v) => v.get(i).map(|&x| x as u32),
            IndexStorage::U32(v) => v.get(i).copied(),
        }
    }

    /// Append an index. For 16 bit buffers the value is truncated, callers only
    /// write indices that came from a buffer of the same width.
    pub fn push(&mut self, index: u32) {
        match self {
            IndexStorage::U16(v) => v.push(index as u16),
            IndexStorage::U32(v) => v.push(index),
        }
    }

    /// Iterate over all indices widened to u32
    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            IndexStorage::U16(v) => Box::new(v.iter().map(|&x| x as u32)),
            IndexStorage::U32(v) => Box::new(v.iter().copied()),
        }
    }

    /// Raw native-endian bytes of the buffer
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IndexStorage::U16(v) => bytemuck::cast_slice(v),
            IndexStorage::U32(v) => bytemuck::cast_slice(v),
        }
    }
}

/// One generated LOD index buffer of a submesh.
///
/// In merged mode two consecutive levels report overlapping spans of the same
/// physical buffer, which is why the storage is reference counted.
#[derive(Debug, Clone)]
pub struct GeneratedIndexBuffer {
    /// First index of the span
    pub start: usize,
    /// Number of indices in the span
    pub count: usize,
    pub buffer: Arc<IndexStorage>,
}

impl GeneratedIndexBuffer {
    /// Size of the whole physical buffer in elements
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn width(&self) -> IndexWidth {
        self.buffer.width()
    }

    /// Raw bytes of the whole physical buffer
    pub fn raw_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Indices of this span only
    pub fn indices(&self) -> Vec<u32> {
        (self.start..self.start + self.count)
            .filter_map(|i| self.buffer.get(i))
            .collect()
    }

    /// Whether two spans point at the same physical buffer
    pub fn shares_buffer_with(&self, other: &GeneratedIndexBuffer) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

/// Generated LOD spans, indexed by submesh then by baked level.
pub type GeneratedLods = Vec<Vec<GeneratedIndexBuffer>>;

/// Positions and optional normals of one vertex buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexBuffer {
    pub positions: Vec<Point3f>,
    pub normals: Option<Vec<Vector3f>>,
}

impl VertexBuffer {
    pub fn new(positions: Vec<Point3f>) -> Self {
        Self {
            positions,
            normals: None,
        }
    }

    /// Attach normals; ignored unless there is one normal per position
    pub fn with_normals(mut self, normals: Vec<Vector3f>) -> Self {
        if normals.len() == self.positions.len() {
            self.normals = Some(normals);
        }
        self
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }
}

/// Owned copy of one submesh's source buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMeshBuffers {
    pub use_shared_vertices: bool,
    /// Own vertex buffer, `None` when the shared buffer is used
    pub vertices: Option<VertexBuffer>,
    pub indices: IndexStorage,
}

/// Owned copy of every source buffer of a mesh.
///
/// This is all the simplifier ever reads, so it can run on any thread while
/// the live mesh stays with its owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshBuffers {
    pub shared_vertices: Option<VertexBuffer>,
    pub submeshes: Vec<SubMeshBuffers>,
}

impl MeshBuffers {
    /// Vertex buffer a submesh indexes into
    pub fn submesh_vertices(&self, submesh: usize) -> Option<&VertexBuffer> {
        let sub = self.submeshes.get(submesh)?;
        if sub.use_shared_vertices {
            self.shared_vertices.as_ref()
        } else {
            sub.vertices.as_ref()
        }
    }

    /// Every vertex buffer, the shared one first
    pub fn vertex_buffers(&self) -> impl Iterator<Item = &VertexBuffer> {
        self.shared_vertices
            .iter()
            .chain(self.submeshes.iter().filter_map(|s| s.vertices.as_ref()))
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_buffers().map(VertexBuffer::len).sum()
    }

    pub fn index_count(&self) -> usize {
        self.submeshes.iter().map(|s| s.indices.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_width_from_byte_size() {
        assert_eq!(IndexWidth::from_byte_size(2).unwrap(), IndexWidth::U16);
        assert_eq!(IndexWidth::from_byte_size(4).unwrap(), IndexWidth::U32);
        assert!(matches!(
            IndexWidth::from_byte_size(1),
            Err(Error::UnsupportedIndexSize(1))
        ));
        assert!(IndexWidth::from_byte_size(8).is_err());
    }

    #[test]
    fn test_from_bytes_u16() {
        let source: Vec<u16> = vec![0, 1, 2, 2, 1, 3];
        let bytes: &[u8] = bytemuck::cast_slice(&source);
        let storage = IndexStorage::from_bytes(bytes, 2).unwrap();
        assert_eq!(storage.width(), IndexWidth::U16);
        assert_eq!(storage.len(), 6);
        assert_eq!(storage.get(5), Some(3));
        assert_eq!(storage.as_bytes(), bytes);
    }

    #[test]
    fn test_from_bytes_rejects_bad_input() {
        assert!(IndexStorage::from_bytes(&[0u8; 6], 3).is_err());
        assert!(IndexStorage::from_bytes(&[0u8; 6], 4).is_err());
    }

    #[test]
    fn test_from_unaligned_bytes() {
        let source: Vec<u32> = vec![7, 70000, 3];
        let mut padded = vec![0xffu8];
        padded.extend_from_slice(bytemuck::cast_slice(&source));
        let storage = IndexStorage::from_bytes(&padded[1..], 4).unwrap();
        assert_eq!(storage.width(), IndexWidth::U32);
        assert_eq!(storage.iter().collect::<Vec<_>>(), source);

        let source: Vec<u16> = vec![4, 5];
        let mut padded = vec![0u8];
        padded.extend_from_slice(bytemuck::cast_slice(&source));
        let storage = IndexStorage::from_bytes(&padded[1..], 2).unwrap();
        assert_eq!(storage.iter().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_push() {
        let mut storage = IndexStorage::with_capacity(IndexWidth::U32, 3);
        storage.push(70000);
        storage.push(1);
        assert_eq!(storage.iter().collect::<Vec<_>>(), vec![70000, 1]);
        assert_eq!(storage.as_bytes().len(), 8);
    }

    #[test]
    fn test_generated_span() {
        let buffer = Arc::new(IndexStorage::U16(vec![10, 11, 12, 13, 14, 15]));
        let a = GeneratedIndexBuffer { start: 0, count: 3, buffer: buffer.clone() };
        let b = GeneratedIndexBuffer { start: 3, count: 3, buffer };
        assert_eq!(b.indices(), vec![13, 14, 15]);
        assert!(a.shares_buffer_with(&b));
        assert_eq!(a.buffer_size(), 6);
        assert_eq!(a.raw_bytes().len(), 12);
    }

    #[test]
    fn test_vertex_buffer_normals_must_match() {
        let vb = VertexBuffer::new(vec![Point3f::origin(); 3])
            .with_normals(vec![Vector3f::z(); 2]);
        assert!(!vb.has_normals());
        let vb = vb.with_normals(vec![Vector3f::z(); 3]);
        assert!(vb.has_normals());
        assert_eq!(vb.len(), 3);
    }
}
