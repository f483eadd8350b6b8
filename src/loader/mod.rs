//! Asynchronous image load scheduler.
//!
//! - Callers request loads; cache hits are delivered without decoding
//! - Misses are queued and picked by a single dispatcher thread (FIFO or LIFO)
//! - An admission permit is taken before each dispatch, so at most `workers` loads are in
//!   flight and the ordering policy decides which pending request runs next
//! - A fixed pool of worker threads decodes, fills the cache, and posts completions to the
//!   single delivery consumer

pub mod cell;
pub mod delivery;
pub mod permits;
pub mod queue;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::cache::ImageCache;
use crate::config::LoaderConfig;
use crate::decode::{FsSource, ImageDecoder, SampledDecoder, TargetSize};
use crate::error::LoadError;

pub use cell::LoaderCell;
pub use delivery::{Completion, Deliveries, DeliveryOutcome, Destination};
pub use permits::{Permit, PermitPool};
pub use queue::{OrderPolicy, TaskQueue};

/// How long `wait_idle` sleeps on the permit pool between checks.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// A queued load. Owned by the task queue until dispatched, then by a worker.
pub struct LoadRequest {
    pub resource_id: String,
    /// Destination tag captured when the load was requested.
    pub expected_tag: String,
    pub destination: Arc<dyn Destination>,
}

/// Work handed to the pool together with its admission permit.
struct Job {
    request: LoadRequest,
    permit: Permit,
}

enum Signal {
    WorkAvailable,
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderStats {
    /// Number of worker threads, which is also the permit capacity.
    pub workers: usize,
    /// Requests waiting in the task queue.
    pub queued: usize,
    /// Requests holding a permit right now.
    pub in_flight: usize,
    /// Highest `in_flight` observed since start.
    pub peak_in_flight: usize,
    /// Permits handed out by the dispatcher.
    pub permits_admitted: u64,
    /// Permits returned by finished jobs.
    pub permits_released: u64,
    /// Jobs that produced an image, from cache or decode.
    pub completed: u64,
    /// Jobs that failed to decode or panicked.
    pub failed: u64,
    /// Jobs served from the cache.
    pub cache_hits: u64,
    /// Jobs that had to decode.
    pub cache_misses: u64,
}

/// State shared by all workers.
struct WorkerContext {
    decoder: Arc<dyn ImageDecoder>,
    cache: ImageCache,
    delivery_tx: Sender<Completion>,
    display: TargetSize,
    counters: Arc<Counters>,
}

/// The load scheduler. Construct once at the dependency root and share by reference.
pub struct ImageLoader {
    config: LoaderConfig,
    queue: Arc<TaskQueue<LoadRequest>>,
    permits: Arc<PermitPool>,
    cache: ImageCache,
    signal_tx: Sender<Signal>,
    delivery_tx: Sender<Completion>,
    deliveries: Mutex<Option<Deliveries>>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl ImageLoader {
    /// Create a loader decoding files from the local filesystem.
    pub fn new(config: LoaderConfig) -> Result<Self> {
        ImageLoaderBuilder::from_config(config).build()
    }

    pub fn builder() -> ImageLoaderBuilder {
        ImageLoaderBuilder::new()
    }

    fn start(config: LoaderConfig, decoder: Arc<dyn ImageDecoder>) -> Result<Self> {
        let workers = config.effective_workers();
        let config = LoaderConfig { workers, ..config };

        let queue = Arc::new(TaskQueue::new());
        let permits = PermitPool::new(workers);
        let cache = ImageCache::new(config.cache_capacity_bytes());
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let (signal_tx, signal_rx) = flume::unbounded();
        let (job_tx, job_rx) = flume::unbounded::<Job>();
        let (delivery_tx, deliveries) = delivery::channel();

        let context = Arc::new(WorkerContext {
            decoder,
            cache: cache.clone(),
            delivery_tx: delivery_tx.clone(),
            display: config.display,
            counters: Arc::clone(&counters),
        });

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = job_rx.clone();
            let context = Arc::clone(&context);
            let handle = thread::Builder::new()
                .name(format!("imgload-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, rx, context))
                .context("Failed to spawn image worker")?;
            worker_handles.push(handle);
        }

        let dispatcher = {
            let queue = Arc::clone(&queue);
            let permits = Arc::clone(&permits);
            let shutdown = Arc::clone(&shutdown);
            let policy = config.policy;
            thread::Builder::new()
                .name("imgload-dispatcher".to_string())
                .spawn(move || dispatcher_loop(signal_rx, job_tx, queue, permits, policy, shutdown))
                .context("Failed to spawn image dispatcher")?
        };

        debug!(workers, policy = %config.policy, cache_bytes = cache.capacity_bytes(), "Started image loader");

        Ok(Self {
            config,
            queue,
            permits,
            cache,
            signal_tx,
            delivery_tx,
            deliveries: Mutex::new(Some(deliveries)),
            dispatcher: Some(dispatcher),
            workers: worker_handles,
            shutdown,
            counters,
        })
    }

    /// Request that `resource_id` be decoded and shown in `destination`.
    ///
    /// Never blocks on decode work. Cache hits are posted to the delivery consumer right away;
    /// misses are queued for the dispatcher. Failures are logged and never reported back.
    pub fn request_load(&self, resource_id: &str, destination: Arc<dyn Destination>) {
        let expected_tag = destination.identity_tag();

        if let Some(image) = self.cache.get(resource_id) {
            trace!(resource_id, "Cache hit");
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            let completion = Completion {
                resource_id: resource_id.to_string(),
                expected_tag,
                destination,
                image,
            };
            if self.delivery_tx.send(completion).is_err() {
                trace!(resource_id, "Delivery consumer gone, dropping cache hit");
            }
            return;
        }

        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.submit(LoadRequest {
            resource_id: resource_id.to_string(),
            expected_tag,
            destination,
        });
    }

    /// Queue a request and wake the dispatcher.
    fn submit(&self, request: LoadRequest) {
        if self.shutdown.load(Ordering::Relaxed) {
            warn!(resource_id = %request.resource_id, "Loader shut down, dropping request");
            return;
        }
        trace!(resource_id = %request.resource_id, "Queued load request");
        self.queue.push_tail(request);
        if self.signal_tx.send(Signal::WorkAvailable).is_err() {
            error!("Image dispatcher disconnected");
        }
    }

    /// Hand out the delivery consumer. Returns `None` after the first call.
    pub fn take_deliveries(&self) -> Option<Deliveries> {
        self.deliveries.lock().take()
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn policy(&self) -> OrderPolicy {
        self.config.policy
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            workers: self.config.workers,
            queued: self.queue.len(),
            in_flight: self.permits.in_flight(),
            peak_in_flight: self.permits.peak_in_flight(),
            permits_admitted: self.permits.admitted(),
            permits_released: self.permits.released(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// True when nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.permits.in_flight() == 0
    }

    /// Wait until the loader is idle. Returns false on timeout.
    ///
    /// Once this returns true, every finished load has been posted to the delivery channel.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.permits
                .wait_for_release(IDLE_CHECK_INTERVAL.min(deadline - now));
        }
    }

    /// Stop the dispatcher and workers. Pending requests are discarded.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Shutting down image loader");

        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "Discarded pending load requests");
        }
        let _ = self.signal_tx.send(Signal::Shutdown);

        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        // The dispatcher owned the job sender; workers exit once the channel drains.
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }

        debug!("Image loader shutdown complete");
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dispatcher loop: one admitted request per work signal.
fn dispatcher_loop(
    signal_rx: Receiver<Signal>,
    job_tx: Sender<Job>,
    queue: Arc<TaskQueue<LoadRequest>>,
    permits: Arc<PermitPool>,
    policy: OrderPolicy,
    shutdown: Arc<AtomicBool>,
) {
    debug!(%policy, "Image dispatcher started");

    while let Ok(signal) = signal_rx.recv() {
        if matches!(signal, Signal::Shutdown) || shutdown.load(Ordering::Relaxed) {
            break;
        }

        // Blocks here, not in the caller, while the pool is saturated.
        let permit = permits.acquire();
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let Some(request) = queue.try_pop(policy) else {
            warn!("Work signal without a pending request");
            continue;
        };
        trace!(resource_id = %request.resource_id, "Dispatching load");

        if let Err(e) = job_tx.send(Job { request, permit }) {
            error!(resource_id = %e.0.request.resource_id, "Image worker pool disconnected");
            break;
        }
    }

    debug!("Image dispatcher stopped");
}

/// Worker thread loop.
fn worker_loop(worker_id: usize, rx: Receiver<Job>, context: Arc<WorkerContext>) {
    debug!(worker_id, "Image worker started");

    while let Ok(job) = rx.recv() {
        // Destinations and decoders are caller code; a panic must not take the worker down.
        if panic::catch_unwind(AssertUnwindSafe(|| process_job(worker_id, job, &context))).is_err()
        {
            context.counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(worker_id, "Image worker recovered from a panic");
        }
    }

    debug!(worker_id, "Image worker stopped");
}

/// Decode one request. The permit is released when this returns, on every path.
fn process_job(worker_id: usize, job: Job, context: &WorkerContext) {
    let Job { request, permit: _permit } = job;
    let LoadRequest {
        resource_id,
        expected_tag,
        destination,
    } = request;

    let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
        let target = TargetSize::resolve(destination.target_size(), context.display);
        context.decoder.decode(&resource_id, target)
    }))
    .unwrap_or_else(|_| {
        Err(LoadError::Panicked {
            id: resource_id.clone(),
        })
    });

    let image = match decoded {
        Ok(image) => image,
        Err(e) => {
            context.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(worker_id, error = %e, "Failed to load image");
            return;
        }
    };

    // First write wins; deliver whatever the cache holds for this key.
    context.cache.put(&resource_id, image.clone());
    let image = context.cache.get(&resource_id).unwrap_or(image);
    context.counters.completed.fetch_add(1, Ordering::Relaxed);

    let completion = Completion {
        resource_id,
        expected_tag,
        destination,
        image,
    };
    if let Err(e) = context.delivery_tx.send(completion) {
        trace!(worker_id, resource_id = %e.0.resource_id, "Delivery consumer gone");
    }
}

/// Builder for [`ImageLoader`].
pub struct ImageLoaderBuilder {
    config: LoaderConfig,
    decoder: Option<Arc<dyn ImageDecoder>>,
}

impl ImageLoaderBuilder {
    /// Start from [`LoaderConfig::default`].
    pub fn new() -> Self {
        Self::from_config(LoaderConfig::default())
    }

    /// Start from an existing configuration.
    pub fn from_config(config: LoaderConfig) -> Self {
        Self {
            config,
            decoder: None,
        }
    }

    /// Worker count. Clamped to `1..=MAX_WORKERS` when the loader starts.
    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count;
        self
    }

    /// Dispatch order for pending requests.
    pub fn policy(mut self, policy: OrderPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Memory budget the cache takes its share of. Also caps a single decode.
    pub fn memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.memory_budget_bytes = bytes;
        self
    }

    /// Cache share of the memory budget, as `1 / denominator`. Must be positive.
    pub fn cache_fraction_denominator(mut self, denominator: usize) -> Self {
        self.config.cache_fraction_denominator = denominator;
        self
    }

    /// Display extent used when a destination cannot report its size.
    pub fn display(mut self, width: u32, height: u32) -> Self {
        self.config.display = TargetSize::new(width, height);
        self
    }

    /// Use a custom decoder instead of reading files from disk.
    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Validate the configuration and start the dispatcher and workers.
    pub fn build(self) -> Result<ImageLoader> {
        anyhow::ensure!(
            self.config.cache_fraction_denominator > 0,
            "cache fraction denominator must be positive"
        );
        let max_alloc = self.config.memory_budget_bytes as u64;
        let decoder = self.decoder.unwrap_or_else(|| {
            Arc::new(SampledDecoder::new(FsSource::new()).with_max_alloc(max_alloc))
        });
        ImageLoader::start(self.config, decoder)
    }
}

impl Default for ImageLoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedImage;
    use crate::error::LoadResult;
    use image::RgbaImage;

    struct SolidDecoder;

    impl ImageDecoder for SolidDecoder {
        fn decode(&self, _id: &str, target: TargetSize) -> LoadResult<DecodedImage> {
            Ok(DecodedImage::new(RgbaImage::new(target.width, target.height)))
        }
    }

    struct PanickingDecoder;

    impl ImageDecoder for PanickingDecoder {
        fn decode(&self, _id: &str, _target: TargetSize) -> LoadResult<DecodedImage> {
            panic!("codec bug");
        }
    }

    struct FixedSlot(&'static str, (i32, i32));

    impl Destination for FixedSlot {
        fn identity_tag(&self) -> String {
            self.0.to_string()
        }

        fn target_size(&self) -> (i32, i32) {
            self.1
        }

        fn apply_decoded_image(&self, _image: DecodedImage) {}
    }

    #[test]
    fn test_builder_clamps_workers() {
        let loader = ImageLoader::builder()
            .workers(32)
            .decoder(Arc::new(SolidDecoder))
            .build()
            .unwrap();
        assert_eq!(loader.stats().workers, crate::config::MAX_WORKERS);
    }

    #[test]
    fn test_builder_rejects_zero_denominator() {
        let result = ImageLoader::builder().cache_fraction_denominator(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_deliveries_taken_once() {
        let loader = ImageLoader::builder()
            .decoder(Arc::new(SolidDecoder))
            .build()
            .unwrap();
        assert!(loader.take_deliveries().is_some());
        assert!(loader.take_deliveries().is_none());
    }

    #[test]
    fn test_unknown_size_uses_display() {
        let loader = ImageLoader::builder()
            .display(64, 48)
            .decoder(Arc::new(SolidDecoder))
            .build()
            .unwrap();
        let mut deliveries = loader.take_deliveries().unwrap();

        loader.request_load("a", Arc::new(FixedSlot("a", (0, -1))));
        assert!(loader.wait_idle(Duration::from_secs(5)));
        assert_eq!(deliveries.poll(), 1);

        let cached = loader.cache().get("a").unwrap();
        assert_eq!(cached.dimensions(), (64, 48));
    }

    #[test]
    fn test_panicking_decoder_keeps_pool_alive() {
        let loader = ImageLoader::builder()
            .decoder(Arc::new(PanickingDecoder))
            .build()
            .unwrap();

        for _ in 0..3 {
            loader.request_load("boom", Arc::new(FixedSlot("boom", (10, 10))));
        }
        assert!(loader.wait_idle(Duration::from_secs(5)));

        let stats = loader.stats();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.permits_admitted, 3);
        assert_eq!(stats.permits_released, 3);
    }

    struct SizelessSlot;

    impl Destination for SizelessSlot {
        fn identity_tag(&self) -> String {
            "broken".to_string()
        }

        fn target_size(&self) -> (i32, i32) {
            panic!("slot has no layout");
        }

        fn apply_decoded_image(&self, _image: DecodedImage) {}
    }

    #[test]
    fn test_panicking_destination_keeps_single_worker_alive() {
        let loader = ImageLoader::builder()
            .workers(1)
            .decoder(Arc::new(SolidDecoder))
            .build()
            .unwrap();
        let mut deliveries = loader.take_deliveries().unwrap();

        loader.request_load("broken", Arc::new(SizelessSlot));
        loader.request_load("ok", Arc::new(FixedSlot("ok", (10, 10))));
        assert!(loader.wait_idle(Duration::from_secs(5)));

        let stats = loader.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.permits_admitted, stats.permits_released);
        assert_eq!(deliveries.poll(), 1);
        assert!(!loader.cache().contains("broken"));
    }

    #[test]
    fn test_requests_after_shutdown_are_dropped() {
        let mut loader = ImageLoader::builder()
            .decoder(Arc::new(SolidDecoder))
            .build()
            .unwrap();
        loader.shutdown();

        loader.request_load("late", Arc::new(FixedSlot("late", (10, 10))));
        let stats = loader.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.permits_admitted, 0);
    }
}
