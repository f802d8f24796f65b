//! Caller facing LOD pipeline

use crate::injector::{
    IndexBufferFactory, InjectorListener, LodInjector, SystemMemoryBufferFactory,
};
use crate::request::{LodRequest, SharedMesh};
use crate::work_queue::{ChannelId, Ticket, WorkQueue, WorkQueueConfig};
use crate::worker::LodWorker;
use log::{debug, warn};
use meshlod_core::{Bounded, LodConfig, Result};
use std::time::{Duration, Instant};

/// Channel every LOD request is submitted on
pub const LOD_CHANNEL: &str = "meshlod";

/// Generates LOD levels in the background and installs them on [`poll`].
///
/// The pipeline is owned by the thread that owns the meshes. Requests are
/// copied out of the mesh on submission, simplified on the work queue's
/// threads and installed by the owning thread.
///
/// A mesh should have at most one outstanding request. Cancel the previous
/// one with [`clear_pending`] before asking again.
///
/// [`poll`]: LodPipeline::poll
/// [`clear_pending`]: LodPipeline::clear_pending
pub struct LodPipeline<F: IndexBufferFactory = SystemMemoryBufferFactory> {
    queue: WorkQueue<LodWorker>,
    channel: ChannelId,
    injector: LodInjector<F>,
}

impl LodPipeline<SystemMemoryBufferFactory> {
    pub fn new(config: WorkQueueConfig) -> Result<Self> {
        Self::with_factory(config, SystemMemoryBufferFactory)
    }
}

impl<F: IndexBufferFactory> LodPipeline<F> {
    /// Pipeline uploading index buffers through `factory`
    pub fn with_factory(config: WorkQueueConfig, factory: F) -> Result<Self> {
        let queue = WorkQueue::new(LodWorker::new(), config)?;
        let channel = queue.channel(LOD_CHANNEL);
        Ok(Self {
            queue,
            channel,
            injector: LodInjector::new(factory),
        })
    }

    pub fn with_listener(mut self, listener: impl InjectorListener + 'static) -> Self {
        self.injector.set_listener(Some(Box::new(listener)));
        self
    }

    /// Queue LOD generation for `mesh` and return without waiting.
    ///
    /// Configuration errors are returned here and nothing is queued.
    pub fn generate_lod_levels(&self, mesh: &SharedMesh, config: LodConfig) -> Result<Ticket> {
        let request = LodRequest::copy_from_mesh(mesh, config)?;
        let ticket = self.queue.submit(self.channel, request);
        debug!("queued LOD request {:?}", ticket);
        Ok(ticket)
    }

    /// Queue generation with [`LodConfig::auto`] sized for `mesh`
    pub fn generate_auto_lod_levels(&self, mesh: &SharedMesh) -> Result<Ticket> {
        let radius = mesh.read().bounding_sphere_radius();
        self.generate_lod_levels(mesh, LodConfig::auto(radius))
    }

    /// Install every finished request. Returns the number of meshes updated.
    ///
    /// Stops at the first injection error; responses after it stay queued.
    pub fn poll(&mut self) -> Result<usize> {
        let mut installed = 0;
        while let Some(response) = self.queue.try_response() {
            if self.injector.handle_response(response)? {
                installed += 1;
            }
        }
        Ok(installed)
    }

    /// Block until no request is pending or `timeout` elapsed, installing
    /// responses as they arrive.
    pub fn wait_idle(&mut self, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut installed = 0;
        while self.queue.pending_count() > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "{} LOD requests still pending after {:?}",
                    self.queue.pending_count(),
                    timeout
                );
                break;
            }
            if let Some(response) = self.queue.wait_response(deadline - now) {
                if self.injector.handle_response(response)? {
                    installed += 1;
                }
            }
        }
        Ok(installed + self.poll()?)
    }

    /// Abort every request that has not started yet.
    ///
    /// Aborted requests are dropped on the next [`poll`](Self::poll).
    pub fn clear_pending(&self) -> usize {
        self.queue.abort_pending(self.channel)
    }

    /// Requests not installed or dropped yet
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Stop starting new requests
    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }
}
