//! [`MergeScheduler`] – the fixed-rate merge loop.
//!
//! Each tick:
//!
//! 1. **Drain** – atomically take every buffered reading.
//! 2. **Project** – run the [`ScanProjector`] over every scan and the
//!    [`CloudProjector`] over every cloud, in source-id order.  A source whose
//!    transform fails is logged and skipped for this tick only.
//! 3. **Merge** – concatenate all points into one [`PointSet`].
//! 4. **Publish** – if any point survived, publish the merged cloud and the
//!    rasterized scan on the [`EventBus`]; otherwise publish nothing.
//!
//! The loop runs on one dedicated thread started by
//! [`MergeScheduler::spawn`].  A stop request is observed at the next tick
//! boundary; a cycle in progress always completes.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use merger_middleware::EventBus;
//! use merger_perception::{TfCloudTransformer, TfEngine, TransformProvider};
//! use merger_runtime::{MergeScheduler, MergerConfig, ReadingBuffer};
//!
//! let config = Arc::new(MergerConfig::default());
//! let transforms: Arc<dyn TransformProvider> = Arc::new(TfEngine::new());
//! let scheduler = MergeScheduler::new(
//!     Arc::clone(&config),
//!     Arc::new(ReadingBuffer::new()),
//!     Arc::clone(&transforms),
//!     Arc::new(TfCloudTransformer::new(transforms)),
//!     EventBus::new(config.queue_size),
//! );
//!
//! // Nothing buffered: the cycle publishes nothing.
//! assert!(scheduler.run_cycle().is_none());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use merger_middleware::{EventBus, Topic};
use merger_perception::{
    CloudProjector, CloudTransformService, ScanProjector, ScanRasterizer, TransformProvider,
};
use merger_types::{Cloud3D, Event, EventPayload, Header, MergeError, PointSet, RangeScan, Reading};
use tracing::{debug, info, warn};

use crate::buffer::{ReadingBuffer, Snapshot};
use crate::config::MergerConfig;

/// `source` tag on every published [`Event`].
pub const SCHEDULER_SOURCE: &str = "merger-runtime::scheduler";

/// What one non-empty cycle published.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub cloud: Cloud3D,
    pub scan: RangeScan,
}

// ─────────────────────────────────────────────────────────────────────────────
// MergeScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Owns every component needed to run one merge cycle.
pub struct MergeScheduler {
    config: Arc<MergerConfig>,
    buffer: Arc<ReadingBuffer>,
    scan_projector: ScanProjector,
    cloud_projector: CloudProjector,
    rasterizer: ScanRasterizer,
    bus: EventBus,
}

impl MergeScheduler {
    pub fn new(
        config: Arc<MergerConfig>,
        buffer: Arc<ReadingBuffer>,
        transforms: Arc<dyn TransformProvider>,
        cloud_service: Arc<dyn CloudTransformService>,
        bus: EventBus,
    ) -> Self {
        let rasterizer = ScanRasterizer::new(config.scan_shape());
        Self {
            config,
            buffer,
            scan_projector: ScanProjector::new(transforms),
            cloud_projector: CloudProjector::new(cloud_service),
            rasterizer,
            bus,
        }
    }

    /// Run one Drain → Project → Merge → Publish cycle.
    ///
    /// Returns `None` when no valid point was produced, in which case
    /// nothing was published.
    pub fn run_cycle(&self) -> Option<CycleOutput> {
        let snapshot = self.buffer.drain_all();
        let stamp = latest_stamp(&snapshot)?;
        let points = self.merge(snapshot);
        if points.is_empty() {
            return None;
        }

        let header = Header::new(self.config.target_frame.clone(), stamp);
        let output = CycleOutput {
            cloud: points.to_cloud(header.clone()),
            scan: self.rasterizer.rasterize(&points, header),
        };

        debug!(points = points.len(), "Publishing {} merged points", points.len());
        if self.has_listeners(Topic::MergedCloud) {
            self.publish(EventPayload::MergedCloud(output.cloud.clone()));
        }
        if self.has_listeners(Topic::MergedScan) {
            self.publish(EventPayload::MergedScan(output.scan.clone()));
        }
        Some(output)
    }

    /// Start the merge loop on its own thread.
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses to spawn the thread.
    pub fn spawn(self) -> std::io::Result<SchedulerHandle> {
        let alive = Arc::new(AtomicBool::new(true));
        let thread_alive = Arc::clone(&alive);
        let thread = thread::Builder::new()
            .name("laser-merge".to_string())
            .spawn(move || self.run(&thread_alive))?;
        Ok(SchedulerHandle {
            alive,
            thread: Some(thread),
        })
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn run(self, alive: &AtomicBool) {
        let period = self.config.period();
        info!(
            target_frame = %self.config.target_frame,
            rate_hz = self.config.rate,
            bins = self.rasterizer.shape().ranges_size(),
            "merge loop started"
        );

        let mut deadline = Instant::now();
        while alive.load(Ordering::Acquire) {
            self.run_cycle();
            deadline = next_wake(deadline, period, Instant::now());
            sleep_until(deadline, alive);
        }
        info!("merge loop stopped");
    }

    /// Project every buffered reading and concatenate the results.
    fn merge(&self, snapshot: Snapshot) -> PointSet {
        let target = self.config.target_frame.as_str();
        let mut merged = PointSet::new(false);

        for (source_id, reading) in &snapshot {
            let projected = match reading {
                Reading::Scan(scan) => self.scan_projector.project(scan, target),
                Reading::Cloud(cloud) => self.cloud_projector.project(cloud, target),
            };
            match projected {
                Ok(points) => merged.append(points),
                Err(e) => warn!(source = %source_id, error = %e, "dropping source for this cycle"),
            }
        }
        merged
    }

    /// Skips building an event nobody would receive.
    fn has_listeners(&self, topic: Topic) -> bool {
        let listening = self.bus.subscriber_count(topic) > 0;
        if !listening {
            debug!(topic = topic.name(), "no subscribers; output not published");
        }
        listening
    }

    fn publish(&self, payload: EventPayload) {
        let topic = Topic::for_payload(&payload);
        match self.bus.publish(Event::new(SCHEDULER_SOURCE, payload)) {
            Ok(_) => {}
            Err(MergeError::Channel(reason)) => debug!(topic = topic.name(), "{reason}"),
            Err(e) => warn!(topic = topic.name(), error = %e, "publish failed"),
        }
    }
}

/// Latest header stamp among the drained readings; `None` for an empty
/// snapshot.
fn latest_stamp(snapshot: &Snapshot) -> Option<DateTime<Utc>> {
    snapshot.values().map(Reading::stamp).max()
}

/// Next tick after `previous`.  An overrun cycle does not trigger catch-up
/// ticks: the schedule restarts from `now`.
fn next_wake(previous: Instant, period: Duration, now: Instant) -> Instant {
    (previous + period).max(now)
}

/// Park until `deadline`, returning early once `alive` is cleared.
fn sleep_until(deadline: Instant, alive: &AtomicBool) {
    loop {
        if !alive.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SchedulerHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Control handle for a running merge loop.
///
/// Dropping the handle stops the loop and waits for the current cycle.
pub struct SchedulerHandle {
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Ask the loop to exit at the next tick boundary.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for it to finish.
    pub fn join(mut self) -> thread::Result<()> {
        self.stop();
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("merge loop panicked");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
