//! Input subscriptions – route readings from configured topics into the
//! [`ReadingBuffer`].
//!
//! One logical subscription is registered per non-empty topic name in the
//! configuration.  The transport hands every message to
//! [`InputSubscriptions::on_reading`] together with the topic it arrived on;
//! the reading is stored under its own header frame, which is the source id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use merger_types::{MergeError, Reading};
use tracing::{info, warn};

use crate::buffer::ReadingBuffer;
use crate::config::MergerConfig;

/// Message type a topic is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Scan,
    Cloud,
}

impl InputKind {
    pub fn of(reading: &Reading) -> Self {
        match reading {
            Reading::Scan(_) => InputKind::Scan,
            Reading::Cloud(_) => InputKind::Cloud,
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::Scan => write!(f, "LaserScan"),
            InputKind::Cloud => write!(f, "PointCloud"),
        }
    }
}

/// The set of active input subscriptions, all feeding one buffer.
pub struct InputSubscriptions {
    topics: BTreeMap<String, InputKind>,
    buffer: Arc<ReadingBuffer>,
}

impl InputSubscriptions {
    /// Subscribe to every non-empty scan and point cloud topic in `config`.
    ///
    /// # Errors
    ///
    /// [`MergeError::Config`] when no topic remains.
    pub fn from_config(config: &MergerConfig, buffer: Arc<ReadingBuffer>) -> Result<Self, MergeError> {
        let mut topics = BTreeMap::new();
        let wanted = config
            .active_scan_topics()
            .map(|t| (t, InputKind::Scan))
            .chain(config.active_point_cloud_topics().map(|t| (t, InputKind::Cloud)));

        for (topic, kind) in wanted {
            info!(topic, "Subscribing to topic {topic}, expecting {kind} messages");
            if let Some(previous) = topics.insert(topic.to_string(), kind)
                && previous != kind
            {
                warn!(topic, "topic listed for both {previous} and {kind}; keeping {kind}");
            }
        }

        if topics.is_empty() {
            return Err(MergeError::Config(
                "No topic was provided to read input laser scans or point clouds".to_string(),
            ));
        }
        Ok(Self { topics, buffer })
    }

    /// Subscribed topics and the message type each expects.
    pub fn topics(&self) -> impl Iterator<Item = (&str, InputKind)> {
        self.topics.iter().map(|(t, k)| (t.as_str(), *k))
    }

    /// Callback for a message delivered on `topic`.
    ///
    /// # Errors
    ///
    /// [`MergeError::TopicMismatch`] if `topic` is not subscribed for this
    /// reading's type; the reading is discarded.
    pub fn on_reading(&self, topic: &str, reading: Reading) -> Result<(), MergeError> {
        let kind = InputKind::of(&reading);
        if self.topics.get(topic) != Some(&kind) {
            return Err(MergeError::TopicMismatch {
                topic: topic.to_string(),
                kind: kind.to_string(),
            });
        }
        let source_id = reading.source_id().to_string();
        self.buffer.put(source_id, reading);
        Ok(())
    }
}
