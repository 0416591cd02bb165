//! Typed, topic-based publish/subscribe bus for merge outputs.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others, and so the merge thread can publish without an async runtime.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::MergedCloud`] | One merged 3-D point cloud per non-empty cycle |
//! | [`Topic::MergedScan`] | One synthesized range scan per non-empty cycle |

use merger_types::{Event, EventPayload, MergeError};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 20;

/// Output lanes of the merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Merged 3-D points in the target frame ("pointcloud").
    MergedCloud,
    /// Synthesized planar scan in the target frame ("scan").
    MergedScan,
}

impl Topic {
    /// The lane an output payload belongs on.
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::MergedCloud(_) => Topic::MergedCloud,
            EventPayload::MergedScan(_) => Topic::MergedScan,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Topic::MergedCloud => "pointcloud",
            Topic::MergedScan => "scan",
        }
    }
}

/// Shared output bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    merged_cloud: broadcast::Sender<Event>,
    merged_scan: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus.  `capacity` (at least 1) is applied to every topic
    /// channel independently.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (merged_cloud, _) = broadcast::channel(capacity);
        let (merged_scan, _) = broadcast::channel(capacity);
        Self {
            merged_cloud,
            merged_scan,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// [`MergeError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, MergeError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| MergeError::Channel(format!("No subscribers for topic {}", topic.name())))
    }

    /// Publish `event` on the topic matching its payload.
    pub fn publish(&self, event: Event) -> Result<usize, MergeError> {
        self.publish_to(Topic::for_payload(&event.payload), event)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::MergedCloud => &self.merged_cloud,
            Topic::MergedScan => &self.merged_scan,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Non-blocking poll for an already-buffered event.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Blocking receive for plain threads.  Lag is logged and skipped;
    /// returns `None` once every sender is gone.
    pub fn blocking_next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.blocking_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = self.topic.name(), lagged_by = n, "output subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use merger_types::{Cloud3D, Header, RangeScan};

    fn cloud_event() -> Event {
        Event::new(
            "merger-middleware::test",
            EventPayload::MergedCloud(Cloud3D::from_xyz(
                Header::new("base_link", Utc::now()),
                &[[1.0, 0.0, 0.0]],
            )),
        )
    }

    fn scan_event() -> Event {
        Event::new(
            "merger-middleware::test",
            EventPayload::MergedScan(RangeScan {
                header: Header::new("base_link", Utc::now()),
                angle_min: 0.0,
                angle_max: 1.0,
                angle_increment: 0.5,
                time_increment: 0.0,
                scan_time: 0.1,
                range_min: 0.1,
                range_max: 10.0,
                ranges: vec![1.0, 2.0],
                intensities: None,
            }),
        )
    }

    #[test]
    fn payload_selects_topic() {
        assert_eq!(Topic::for_payload(&cloud_event().payload), Topic::MergedCloud);
        assert_eq!(Topic::for_payload(&scan_event().payload), Topic::MergedScan);
    }

    #[test]
    fn publish_routes_by_payload() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut clouds = bus.subscribe_to(Topic::MergedCloud);
        let mut scans = bus.subscribe_to(Topic::MergedScan);

        let cloud = cloud_event();
        let scan = scan_event();
        bus.publish(cloud.clone())?;
        bus.publish(scan.clone())?;

        assert_eq!(clouds.try_recv()?.id, cloud.id);
        assert_eq!(scans.try_recv()?.id, scan.id);
        assert!(clouds.try_recv().is_err(), "scan must not reach the cloud lane");
        Ok(())
    }

    #[test]
    fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe_to(Topic::MergedScan);
        let mut rx2 = bus.subscribe_to(Topic::MergedScan);
        assert_eq!(bus.subscriber_count(Topic::MergedScan), 2);

        let event = scan_event();
        assert_eq!(bus.publish_to(Topic::MergedScan, event.clone())?, 2);

        assert_eq!(rx1.try_recv()?.id, event.id);
        assert_eq!(rx2.try_recv()?.id, event.id);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::MergedCloud, cloud_event());
        assert!(matches!(result, Err(MergeError::Channel(_))));
    }

    #[test]
    fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::MergedCloud);
        for _ in 0..100 {
            let _ = bus.publish_to(Topic::MergedCloud, cloud_event());
        }
        let result = slow.try_recv();
        assert!(
            matches!(result, Err(broadcast::error::TryRecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[test]
    fn blocking_next_skips_lag_and_ends_on_close() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe_to(Topic::MergedScan);
        let _ = bus.publish_to(Topic::MergedScan, scan_event());
        let last = scan_event();
        let _ = bus.publish_to(Topic::MergedScan, last.clone());
        drop(bus);

        assert_eq!(rx.blocking_next().map(|e| e.id), Some(last.id));
        assert!(rx.blocking_next().is_none());
        assert_eq!(rx.topic(), Topic::MergedScan);
    }
}
