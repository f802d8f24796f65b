//! Generation request handed between the producer, a worker and the injector

use log::debug;
use meshlod_core::{GeneratedLods, LodConfig, Mesh, MeshBuffers, Result};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Live mesh shared between the owner and the LOD pipeline
pub type SharedMesh = Arc<RwLock<Mesh>>;

/// Everything a worker needs to generate the LOD levels of one mesh.
///
/// The request owns copies of the source buffers, so the worker never
/// touches the live mesh. It only keeps a weak handle to it for injection.
#[derive(Debug)]
pub struct LodRequest {
    pub mesh: Weak<RwLock<Mesh>>,
    pub mesh_name: String,
    pub buffers: MeshBuffers,
    pub config: LodConfig,
    /// Filled by the worker
    pub generated: GeneratedLods,
}

impl LodRequest {
    /// Validate `config` and copy the source buffers out of `mesh`.
    pub fn copy_from_mesh(mesh: &SharedMesh, config: LodConfig) -> Result<Self> {
        config.validate()?;
        let live = mesh.read();
        let buffers = live.copy_buffers();
        debug!(
            "copied {} vertices and {} indices out of mesh '{}'",
            buffers.vertex_count(),
            buffers.index_count(),
            live.name
        );
        Ok(Self {
            mesh: Arc::downgrade(mesh),
            mesh_name: live.name.clone(),
            buffers,
            config,
            generated: Vec::new(),
        })
    }

    /// Whether the target mesh still exists
    pub fn is_mesh_alive(&self) -> bool {
        self.mesh.strong_count() > 0
    }
}
