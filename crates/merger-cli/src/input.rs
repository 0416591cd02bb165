//! Stdin transport: newline-delimited JSON input messages.
//!
//! Each non-blank line is one message:
//!
//! ```json
//! {"topic": "/scan_front", "reading": {"kind": "scan", "header": {...}, ...}}
//! ```
//!
//! Lines that fail to parse or arrive on an unsubscribed topic are logged
//! and skipped; they never stop the pump.

use std::io::BufRead;

use merger_runtime::InputSubscriptions;
use merger_types::Reading;
use serde::Deserialize;
use tracing::warn;

/// One input message as it appears on the wire.
#[derive(Debug, Deserialize)]
pub struct InputMessage {
    pub topic: String,
    pub reading: Reading,
}

/// What happened to the lines read by [`pump`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub accepted: usize,
    pub rejected: usize,
}

/// Parse one line; blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<InputMessage>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Feed every line of `reader` to `subscriptions` until EOF.
///
/// # Errors
///
/// Only an I/O error on `reader` ends the pump early.
pub fn pump(reader: impl BufRead, subscriptions: &InputSubscriptions) -> std::io::Result<PumpStats> {
    let mut stats = PumpStats::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let message = match parse_line(&line) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = index + 1, error = %e, "unparsable input message");
                stats.rejected += 1;
                continue;
            }
        };
        match subscriptions.on_reading(&message.topic, message.reading) {
            Ok(()) => stats.accepted += 1,
            Err(e) => {
                warn!(line = index + 1, error = %e, "input message dropped");
                stats.rejected += 1;
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use merger_perception::{ScanProjector, TfEngine, Transform3D};
    use merger_runtime::{MergerConfig, ReadingBuffer};
    use std::io::Cursor;
    use std::sync::Arc;

    const SCAN_LINE: &str = r#"{"topic":"/scan","reading":{"kind":"scan","header":{"frame_id":"laser","stamp":"2024-05-01T12:00:00Z"},"angle_min":0.0,"angle_max":1.0,"angle_increment":0.5,"range_min":0.1,"range_max":10.0,"ranges":[1.0,2.0]}}"#;
    const CLOUD_LINE: &str = r#"{"topic":"/points","reading":{"kind":"cloud","header":{"frame_id":"velodyne","stamp":"2024-05-01T12:00:01Z"},"channels":[{"name":"x","values":[1.0]},{"name":"y","values":[0.0]},{"name":"z","values":[0.5]}]}}"#;

    fn subscriptions(buffer: Arc<ReadingBuffer>) -> InputSubscriptions {
        let config = MergerConfig {
            scan_topics: vec!["/scan".to_string()],
            point_cloud_topics: vec!["/points".to_string()],
            ..MergerConfig::default()
        };
        InputSubscriptions::from_config(&config, buffer).expect("subscribed")
    }

    #[test]
    fn parses_scan_message_with_optional_fields_missing() {
        let message = parse_line(SCAN_LINE).expect("valid json").expect("not blank");
        assert_eq!(message.topic, "/scan");
        match message.reading {
            Reading::Scan(scan) => {
                assert_eq!(scan.ranges, vec![1.0, 2.0]);
                assert_eq!(scan.scan_time, 0.0);
                assert!(scan.intensities.is_none());
            }
            Reading::Cloud(_) => panic!("expected a scan"),
        }
    }

    #[test]
    fn null_range_keeps_the_reading_and_drops_the_ray() {
        let line = SCAN_LINE.replace("[1.0,2.0]", "[1.0,null]");
        let message = parse_line(&line).expect("valid json").expect("not blank");
        let Reading::Scan(scan) = message.reading else {
            panic!("expected a scan");
        };

        let mut tf = TfEngine::new();
        tf.set_transform("base_link", "laser", Transform3D::identity());
        let points = ScanProjector::new(Arc::new(tf))
            .project(&scan, "base_link")
            .expect("transform known");
        assert_eq!(points.len(), 1);
        assert!((points.points()[0].x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_line("   ").expect("blank is fine").is_none());
    }

    #[test]
    fn pump_routes_good_lines_and_counts_bad_ones() {
        let buffer = Arc::new(ReadingBuffer::new());
        let subs = subscriptions(Arc::clone(&buffer));
        // Third line: a cloud on the scan topic.  Fourth: not JSON.
        let wrong_topic = CLOUD_LINE.replace("/points", "/scan");
        let input = format!("{SCAN_LINE}\n\n{CLOUD_LINE}\n{wrong_topic}\nnot json\n");

        let stats = pump(Cursor::new(input), &subs).expect("in-memory reader");
        assert_eq!(stats, PumpStats { accepted: 2, rejected: 2 });

        let snapshot = buffer.drain_all();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["laser", "velodyne"]);
    }
}
