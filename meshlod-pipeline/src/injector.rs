//! Main thread side of the pipeline
//!
//! The injector turns finished responses into installed LOD levels. It is
//! the only part of the pipeline that touches the live mesh or creates
//! hardware index buffers.

use crate::request::LodRequest;
use crate::work_queue::{Response, ResponseStatus};
use log::{debug, info, warn};
use meshlod_core::{
    GeneratedIndexBuffer, HardwareIndexBuffer, IndexData, IndexStorage, IndexWidth, Result,
};
use std::sync::Arc;

/// Observes and can veto injections.
pub trait InjectorListener: Send {
    /// Return false to drop the generated levels of `request`
    fn should_inject(&mut self, _request: &LodRequest) -> bool {
        true
    }

    /// Called after the levels of `request` were installed
    fn injection_completed(&mut self, _request: &LodRequest) {}
}

/// Creates the render side index buffers LOD spans are uploaded into
pub trait IndexBufferFactory: Send {
    fn create_index_buffer(
        &mut self,
        width: IndexWidth,
        bytes: &[u8],
    ) -> Result<HardwareIndexBuffer>;
}

/// Keeps uploaded index buffers in system memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemoryBufferFactory;

impl IndexBufferFactory for SystemMemoryBufferFactory {
    fn create_index_buffer(
        &mut self,
        width: IndexWidth,
        bytes: &[u8],
    ) -> Result<HardwareIndexBuffer> {
        HardwareIndexBuffer::from_bytes(width, bytes)
    }
}

/// Installs generated LOD levels into their meshes.
pub struct LodInjector<F: IndexBufferFactory = SystemMemoryBufferFactory> {
    factory: F,
    listener: Option<Box<dyn InjectorListener>>,
}

impl Default for LodInjector<SystemMemoryBufferFactory> {
    fn default() -> Self {
        Self::new(SystemMemoryBufferFactory)
    }
}

impl<F: IndexBufferFactory> LodInjector<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            listener: None,
        }
    }

    /// Install a listener, replacing the previous one
    pub fn with_listener(mut self, listener: impl InjectorListener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn set_listener(&mut self, listener: Option<Box<dyn InjectorListener>>) {
        self.listener = listener;
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Handle one response of the work queue.
    ///
    /// Returns whether LOD levels were installed. Failed and aborted
    /// responses, dropped meshes and vetoed requests are skipped.
    pub fn handle_response(&mut self, response: Response<LodRequest>) -> Result<bool> {
        let request = response.request;
        match response.status {
            ResponseStatus::Completed => {}
            ResponseStatus::Failed(reason) => {
                warn!(
                    "LOD generation of mesh '{}' failed: {}",
                    request.mesh_name, reason
                );
                return Ok(false);
            }
            ResponseStatus::Aborted => {
                info!("LOD generation of mesh '{}' was aborted", request.mesh_name);
                return Ok(false);
            }
        }

        if !request.is_mesh_alive() {
            debug!(
                "mesh '{}' was dropped before its LOD levels were ready",
                request.mesh_name
            );
            return Ok(false);
        }
        if let Some(listener) = self.listener.as_mut() {
            if !listener.should_inject(&request) {
                debug!("injection into mesh '{}' vetoed", request.mesh_name);
                return Ok(false);
            }
        }

        if !self.inject(&request)? {
            return Ok(false);
        }
        if let Some(listener) = self.listener.as_mut() {
            listener.injection_completed(&request);
        }
        Ok(true)
    }

    /// Upload the generated spans of `request` and install them on its mesh.
    ///
    /// Spans sharing one generated buffer share one uploaded buffer. Returns
    /// false when the mesh no longer exists.
    pub fn inject(&mut self, request: &LodRequest) -> Result<bool> {
        let Some(mesh) = request.mesh.upgrade() else {
            return Ok(false);
        };

        let mut uploaded: Vec<(Arc<IndexStorage>, Arc<HardwareIndexBuffer>)> = Vec::new();
        let mut lod_faces = Vec::with_capacity(request.generated.len());
        for spans in &request.generated {
            let mut faces = Vec::with_capacity(spans.len());
            for span in spans {
                let buffer = self.upload(span, &mut uploaded)?;
                faces.push(IndexData {
                    start: span.start,
                    count: span.count,
                    buffer,
                });
            }
            lod_faces.push(faces);
        }

        let mut live = mesh.write();
        live.configure_lod_usage(lod_faces, &request.config)?;
        info!(
            "installed {} LOD levels into mesh '{}' ({} index buffers uploaded)",
            live.num_lod_levels() - 1,
            live.name,
            uploaded.len()
        );
        Ok(true)
    }

    fn upload(
        &mut self,
        span: &GeneratedIndexBuffer,
        uploaded: &mut Vec<(Arc<IndexStorage>, Arc<HardwareIndexBuffer>)>,
    ) -> Result<Arc<HardwareIndexBuffer>> {
        // merged spans of adjacent levels point at the same buffer
        if let Some((_, hw)) = uploaded
            .iter()
            .find(|(source, _)| Arc::ptr_eq(source, &span.buffer))
        {
            return Ok(Arc::clone(hw));
        }
        let hw = Arc::new(
            self.factory
                .create_index_buffer(span.width(), span.raw_bytes())?,
        );
        uploaded.push((Arc::clone(&span.buffer), Arc::clone(&hw)));
        Ok(hw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SharedMesh;
    use crate::work_queue::{ChannelId, Ticket};
    use meshlod_core::{
        Error, IndexStorage, LodConfig, LodStrategy, Mesh, Point3f, ReductionMethod, SubMesh,
        VertexBuffer,
    };
    use parking_lot::{Mutex, RwLock};

    fn quad_mesh() -> SharedMesh {
        let vertices = VertexBuffer::new(vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
        ]);
        Arc::new(RwLock::new(Mesh::new("quad").with_submesh(SubMesh::new(
            vertices,
            IndexStorage::U16(vec![0, 1, 2, 0, 2, 3]),
        ))))
    }

    /// Request carrying two merged spans over one buffer
    fn merged_request(mesh: &SharedMesh) -> LodRequest {
        let config = LodConfig::new(LodStrategy::Distance)
            .with_level(10.0, ReductionMethod::Constant(1))
            .with_level(20.0, ReductionMethod::Constant(2));
        let mut request = LodRequest::copy_from_mesh(mesh, config).unwrap();
        let buffer = Arc::new(IndexStorage::U16(vec![0, 1, 2, 0, 2, 3, 0, 1, 3]));
        request.generated = vec![vec![
            GeneratedIndexBuffer {
                start: 0,
                count: 6,
                buffer: Arc::clone(&buffer),
            },
            GeneratedIndexBuffer {
                start: 6,
                count: 3,
                buffer,
            },
        ]];
        request
    }

    fn response(request: LodRequest, status: ResponseStatus) -> Response<LodRequest> {
        Response {
            ticket: Ticket::default(),
            channel: ChannelId::default(),
            status,
            request,
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: usize,
    }

    impl IndexBufferFactory for CountingFactory {
        fn create_index_buffer(
            &mut self,
            width: IndexWidth,
            bytes: &[u8],
        ) -> Result<HardwareIndexBuffer> {
            self.created += 1;
            HardwareIndexBuffer::from_bytes(width, bytes)
        }
    }

    struct FailingFactory;

    impl IndexBufferFactory for FailingFactory {
        fn create_index_buffer(&mut self, _: IndexWidth, _: &[u8]) -> Result<HardwareIndexBuffer> {
            Err(Error::Buffer("out of video memory".to_string()))
        }
    }

    struct Recorder {
        allow: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl InjectorListener for Recorder {
        fn should_inject(&mut self, request: &LodRequest) -> bool {
            self.log.lock().push(format!("should {}", request.mesh_name));
            self.allow
        }

        fn injection_completed(&mut self, request: &LodRequest) {
            self.log.lock().push(format!("done {}", request.mesh_name));
        }
    }

    #[test]
    fn test_merged_spans_share_one_upload() {
        let mesh = quad_mesh();
        let mut injector = LodInjector::new(CountingFactory::default());
        let installed = injector
            .handle_response(response(merged_request(&mesh), ResponseStatus::Completed))
            .unwrap();
        assert!(installed);
        assert_eq!(injector.factory().created, 1);

        let live = mesh.read();
        assert_eq!(live.num_lod_levels(), 3);
        let faces = &live.submeshes[0].lod_faces;
        assert!(Arc::ptr_eq(&faces[0].buffer, &faces[1].buffer));
        assert_eq!(live.submeshes[0].lod_indices(2), Some(vec![0, 1, 3]));
        assert_eq!(live.submeshes[0].lod_indices(0), Some(vec![0, 1, 2, 0, 2, 3]));
    }

    #[test]
    fn test_failed_and_aborted_responses_are_skipped() {
        let mesh = quad_mesh();
        let mut injector = LodInjector::default();
        for status in [ResponseStatus::Failed("boom".to_string()), ResponseStatus::Aborted] {
            let installed = injector
                .handle_response(response(merged_request(&mesh), status))
                .unwrap();
            assert!(!installed);
        }
        assert_eq!(mesh.read().num_lod_levels(), 1);
    }

    #[test]
    fn test_listener_veto_and_notification() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mesh = quad_mesh();

        let mut vetoing = LodInjector::default().with_listener(Recorder {
            allow: false,
            log: Arc::clone(&log),
        });
        let installed = vetoing
            .handle_response(response(merged_request(&mesh), ResponseStatus::Completed))
            .unwrap();
        assert!(!installed);
        assert_eq!(mesh.read().num_lod_levels(), 1);

        let mut allowing = LodInjector::default().with_listener(Recorder {
            allow: true,
            log: Arc::clone(&log),
        });
        assert!(allowing
            .handle_response(response(merged_request(&mesh), ResponseStatus::Completed))
            .unwrap());
        assert_eq!(
            *log.lock(),
            vec!["should quad", "should quad", "done quad"]
        );
    }

    #[test]
    fn test_dropped_mesh_is_not_injected() {
        let mesh = quad_mesh();
        let request = merged_request(&mesh);
        drop(mesh);
        let mut injector = LodInjector::new(CountingFactory::default());
        assert!(!injector
            .handle_response(response(request, ResponseStatus::Completed))
            .unwrap());
        assert_eq!(injector.factory().created, 0);
    }

    #[test]
    fn test_upload_failure_leaves_mesh_unchanged() {
        let mesh = quad_mesh();
        let mut injector = LodInjector::new(FailingFactory);
        let result =
            injector.handle_response(response(merged_request(&mesh), ResponseStatus::Completed));
        assert!(matches!(result, Err(Error::Buffer(_))));
        assert_eq!(mesh.read().num_lod_levels(), 1);
    }
}
