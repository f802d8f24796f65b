//! Background work queue
//!
//! Requests are executed FIFO on a dedicated rayon thread pool and their
//! responses are collected on a crossbeam channel that the owning thread
//! drains with [`WorkQueue::process_responses`]. A request is owned by
//! exactly one stage at a time: the queue, the worker running it, then the
//! response channel.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use meshlod_core::{Error, Result};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Thread pool configuration of a work queue
#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    /// Number of worker threads
    pub num_threads: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Thread stack size in bytes (None = rayon default)
    pub stack_size: Option<usize>,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            // leave room for the main and render threads
            num_threads: num_cpus::get().saturating_sub(2).max(1),
            thread_name_prefix: "meshlod-worker".to_string(),
            stack_size: None,
        }
    }
}

impl WorkQueueConfig {
    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }
}

/// Named group of requests that can be aborted together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChannelId(u32);

/// Identifies one submitted request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    Completed,
    Failed(String),
    /// Removed from the queue before a worker picked it up
    Aborted,
}

impl ResponseStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseStatus::Completed)
    }
}

/// A request handed back to the owner of the queue
#[derive(Debug)]
pub struct Response<R> {
    pub ticket: Ticket,
    pub channel: ChannelId,
    pub status: ResponseStatus,
    pub request: R,
}

/// Work executed on a worker thread
pub trait RequestHandler: Send + Sync + 'static {
    type Request: Send + 'static;

    /// Process `request` in place
    fn handle_request(&self, request: &mut Self::Request) -> Result<()>;
}

struct Job<R> {
    ticket: Ticket,
    channel: ChannelId,
    request: R,
}

struct Shared<H: RequestHandler> {
    handler: H,
    jobs: Mutex<VecDeque<Job<H::Request>>>,
    paused: AtomicBool,
    /// Submitted requests whose response was not taken by the owner yet
    in_flight: AtomicUsize,
    responses: Sender<Response<H::Request>>,
}

impl<H: RequestHandler> Shared<H> {
    fn respond(&self, response: Response<H::Request>) {
        // The receiver lives as long as the queue, which outlives the pool.
        if self.responses.send(response).is_err() {
            debug!("response dropped, work queue is shutting down");
        }
    }

    /// Run the oldest queued job, if any
    fn run_next(&self) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }
        let Some(job) = self.jobs.lock().pop_front() else {
            return;
        };
        let Job {
            ticket,
            channel,
            mut request,
        } = job;

        let outcome = catch_unwind(AssertUnwindSafe(|| self.handler.handle_request(&mut request)));
        let status = match outcome {
            Ok(Ok(())) => ResponseStatus::Completed,
            Ok(Err(e)) => ResponseStatus::Failed(e.to_string()),
            Err(_) => {
                error!("request {:?} panicked in its worker", ticket);
                ResponseStatus::Failed("worker panicked".to_string())
            }
        };
        self.respond(Response {
            ticket,
            channel,
            status,
            request,
        });
    }
}

/// FIFO request queue backed by a thread pool.
pub struct WorkQueue<H: RequestHandler> {
    pool: ThreadPool,
    shared: Arc<Shared<H>>,
    responses: Receiver<Response<H::Request>>,
    channels: Mutex<Vec<String>>,
    next_ticket: AtomicU64,
}

impl<H: RequestHandler> WorkQueue<H> {
    pub fn new(handler: H, config: WorkQueueConfig) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().num_threads(config.num_threads.max(1));
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        if !config.thread_name_prefix.is_empty() {
            let prefix = config.thread_name_prefix.clone();
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }
        let pool = builder
            .build()
            .map_err(|e| Error::Pipeline(format!("Failed to create thread pool: {}", e)))?;

        let (sender, receiver) = unbounded();
        debug!(
            "work queue started with {} '{}' threads",
            pool.current_num_threads(),
            config.thread_name_prefix
        );
        Ok(Self {
            pool,
            shared: Arc::new(Shared {
                handler,
                jobs: Mutex::new(VecDeque::new()),
                paused: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                responses: sender,
            }),
            responses: receiver,
            channels: Mutex::new(Vec::new()),
            next_ticket: AtomicU64::new(0),
        })
    }

    /// Id of the channel called `name`, registering it on first use
    pub fn channel(&self, name: &str) -> ChannelId {
        let mut channels = self.channels.lock();
        let index = match channels.iter().position(|c| c == name) {
            Some(index) => index,
            None => {
                channels.push(name.to_string());
                channels.len() - 1
            }
        };
        ChannelId(index as u32)
    }

    /// Queue `request` and return immediately.
    pub fn submit(&self, channel: ChannelId, request: H::Request) -> Ticket {
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        self.shared.jobs.lock().push_back(Job {
            ticket,
            channel,
            request,
        });
        if !self.is_paused() {
            self.spawn_runner();
        }
        ticket
    }

    fn spawn_runner(&self) {
        let shared = Arc::clone(&self.shared);
        self.pool.spawn_fifo(move || shared.run_next());
    }

    /// Stop handing queued requests to workers. Running requests finish.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        let queued = self.shared.jobs.lock().len();
        for _ in 0..queued {
            self.spawn_runner();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Requests whose response was not taken yet, running ones included
    pub fn pending_count(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Abort every queued request of `channel`.
    ///
    /// Aborted requests are answered with [`ResponseStatus::Aborted`]. A
    /// request already running is not interrupted.
    pub fn abort_pending(&self, channel: ChannelId) -> usize {
        let aborted: Vec<Job<H::Request>> = {
            let mut jobs = self.shared.jobs.lock();
            let (aborted, kept): (VecDeque<_>, VecDeque<_>) =
                jobs.drain(..).partition(|job| job.channel == channel);
            *jobs = kept;
            aborted.into()
        };

        let count = aborted.len();
        for job in aborted {
            self.shared.respond(Response {
                ticket: job.ticket,
                channel: job.channel,
                status: ResponseStatus::Aborted,
                request: job.request,
            });
        }
        if count > 0 {
            info!("aborted {} pending requests on channel {:?}", count, channel);
        }
        count
    }

    /// Hand every available response to `f` without blocking.
    pub fn process_responses(&self, mut f: impl FnMut(Response<H::Request>)) -> usize {
        let mut handled = 0;
        while let Ok(response) = self.responses.try_recv() {
            f(self.taken(response));
            handled += 1;
        }
        handled
    }

    /// Next response, if one arrives before `timeout`
    pub fn wait_response(&self, timeout: Duration) -> Option<Response<H::Request>> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Some(self.taken(response)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next response without blocking
    pub fn try_response(&self) -> Option<Response<H::Request>> {
        self.responses.try_recv().ok().map(|r| self.taken(r))
    }

    /// The owner now holds `response`, so it no longer counts as pending
    fn taken(&self, response: Response<H::Request>) -> Response<H::Request> {
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Doubler;

    impl RequestHandler for Doubler {
        type Request = i64;

        fn handle_request(&self, request: &mut i64) -> Result<()> {
            if *request < 0 {
                return Err(Error::Algorithm("negative input".to_string()));
            }
            *request *= 2;
            Ok(())
        }
    }

    fn single_thread_queue() -> WorkQueue<Doubler> {
        WorkQueue::new(Doubler, WorkQueueConfig::default().with_threads(1)).unwrap()
    }

    fn collect(queue: &WorkQueue<Doubler>, expected: usize) -> Vec<Response<i64>> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut responses = Vec::new();
        while responses.len() < expected && Instant::now() < deadline {
            if let Some(r) = queue.wait_response(Duration::from_millis(50)) {
                responses.push(r);
            }
        }
        responses
    }

    #[test]
    fn test_default_config() {
        let config = WorkQueueConfig::default();
        assert!(config.num_threads >= 1);
        assert_eq!(config.thread_name_prefix, "meshlod-worker");
        assert_eq!(WorkQueueConfig::default().with_threads(0).num_threads, 1);
    }

    #[test]
    fn test_channels_are_reused_by_name() {
        let queue = single_thread_queue();
        let a = queue.channel("lod");
        let b = queue.channel("other");
        assert_ne!(a, b);
        assert_eq!(queue.channel("lod"), a);
    }

    #[test]
    fn test_requests_complete_in_order() {
        let queue = single_thread_queue();
        let channel = queue.channel("numbers");
        let tickets: Vec<Ticket> = (1..=5).map(|i| queue.submit(channel, i)).collect();

        let responses = collect(&queue, 5);
        assert_eq!(responses.len(), 5);
        assert_eq!(
            responses.iter().map(|r| r.ticket).collect::<Vec<_>>(),
            tickets
        );
        assert!(responses.iter().all(|r| r.status.is_success()));
        assert_eq!(
            responses.iter().map(|r| r.request).collect::<Vec<_>>(),
            vec![2, 4, 6, 8, 10]
        );
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_failed_request_is_reported() {
        let queue = single_thread_queue();
        let channel = queue.channel("numbers");
        queue.submit(channel, -1);
        let responses = collect(&queue, 1);
        assert!(matches!(responses[0].status, ResponseStatus::Failed(_)));
        assert_eq!(responses[0].request, -1);
    }

    #[test]
    fn test_abort_while_paused() {
        let queue = single_thread_queue();
        let lod = queue.channel("lod");
        let other = queue.channel("other");

        queue.pause();
        queue.submit(lod, 1);
        queue.submit(other, 2);
        queue.submit(lod, 3);
        assert_eq!(queue.pending_count(), 3);

        assert_eq!(queue.abort_pending(lod), 2);
        // aborted responses count until they are taken
        assert_eq!(queue.pending_count(), 3);

        let mut aborted = Vec::new();
        queue.process_responses(|r| {
            assert_eq!(r.status, ResponseStatus::Aborted);
            aborted.push(r.request);
        });
        assert_eq!(aborted, vec![1, 3]);
        assert_eq!(queue.pending_count(), 1);

        queue.resume();
        let responses = collect(&queue, 1);
        assert_eq!(responses[0].request, 4);
        assert_eq!(responses[0].channel, other);
    }
}
