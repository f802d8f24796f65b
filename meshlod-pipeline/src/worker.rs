//! Worker side of the pipeline

use crate::request::LodRequest;
use crate::work_queue::RequestHandler;
use log::debug;
use meshlod_core::Result;
use meshlod_simplification::{LodGenerator, ProgressiveMeshGenerator};
use std::time::Instant;

/// Runs the simplifier on the buffers copied into a [`LodRequest`].
///
/// The worker only sees the request it was handed; it never touches the live
/// mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct LodWorker;

impl LodWorker {
    pub fn new() -> Self {
        Self
    }
}

impl RequestHandler for LodWorker {
    type Request = LodRequest;

    fn handle_request(&self, request: &mut LodRequest) -> Result<()> {
        let started = Instant::now();
        let mut generator = ProgressiveMeshGenerator::new();
        request.generated = generator.generate(&request.buffers, &mut request.config)?;
        debug!(
            "generated {} LOD levels for mesh '{}' in {:?}",
            request.config.baked_level_count(),
            request.mesh_name,
            started.elapsed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshlod_core::{
        IndexStorage, LodConfig, LodStrategy, Mesh, Point3f, ReductionMethod, SubMesh,
        VertexBuffer,
    };
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn grid_mesh(size: usize) -> Mesh {
        let mut positions = Vec::new();
        for y in 0..size {
            for x in 0..size {
                positions.push(Point3f::new(x as f32, y as f32, 0.0));
            }
        }
        let mut indices = Vec::new();
        for y in 0..size - 1 {
            for x in 0..size - 1 {
                let i0 = (y * size + x) as u32;
                let i2 = i0 + size as u32;
                indices.extend_from_slice(&[i0, i0 + 1, i2, i2, i0 + 1, i2 + 1]);
            }
        }
        Mesh::new("grid").with_submesh(SubMesh::new(
            VertexBuffer::new(positions),
            IndexStorage::U32(indices),
        ))
    }

    #[test]
    fn test_worker_fills_request() {
        let mesh = Arc::new(RwLock::new(grid_mesh(6)));
        let config = LodConfig::new(LodStrategy::Distance)
            .with_level(10.0, ReductionMethod::TriangleCount(25));
        let mut request = LodRequest::copy_from_mesh(&mesh, config).unwrap();
        assert!(request.generated.is_empty());

        LodWorker::new().handle_request(&mut request).unwrap();

        assert_eq!(request.generated.len(), 1);
        assert_eq!(request.generated[0].len(), 1);
        assert!(request.generated[0][0].count / 3 <= 25);
        // the grid has no normals
        assert!(!request.config.advanced.use_vertex_normals);
        // the live mesh is untouched
        assert_eq!(mesh.read().num_lod_levels(), 1);
    }
}
