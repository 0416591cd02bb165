//! [`ReadingBuffer`] – latest reading per source, shared between producer
//! callbacks and the merge thread.
//!
//! Producers call [`ReadingBuffer::put`] from any thread; the merge thread
//! calls [`ReadingBuffer::drain_all`] once per tick.  The lock is held only
//! for the map insert or the map swap, never while a snapshot is processed.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use merger_types::Reading;

/// Readings drained in one tick, keyed by source id.  Iteration order is
/// the sorted source id, which keeps merge output deterministic.
pub type Snapshot = BTreeMap<String, Reading>;

/// Last-writer-wins table of the most recent [`Reading`] per source.
#[derive(Debug, Default)]
pub struct ReadingBuffer {
    entries: Mutex<Snapshot>,
}

impl ReadingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reading` as the latest for `source_id`, replacing any previous
    /// entry wholesale.  Returns `true` if an older reading was dropped.
    pub fn put(&self, source_id: impl Into<String>, reading: Reading) -> bool {
        self.lock().insert(source_id.into(), reading).is_some()
    }

    /// Atomically take every entry, leaving the buffer empty.
    pub fn drain_all(&self) -> Snapshot {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Every critical section is a single map operation, so a panicking
    // holder cannot leave a half-written entry behind.
    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use merger_types::{Cloud3D, Header};
    use std::sync::Arc;
    use std::thread;

    fn cloud(frame: &str, x: f32) -> Reading {
        Reading::Cloud(Cloud3D::from_xyz(Header::new(frame, Utc::now()), &[[x, 0.0, 0.0]]))
    }

    fn first_x(reading: &Reading) -> f32 {
        match reading {
            Reading::Cloud(c) => c.channel("x").expect("x")[0],
            Reading::Scan(_) => panic!("unexpected scan"),
        }
    }

    #[test]
    fn put_replaces_previous_entry_for_same_source() {
        let buffer = ReadingBuffer::new();
        assert!(!buffer.put("lidar", cloud("lidar", 1.0)));
        assert!(buffer.put("lidar", cloud("lidar", 2.0)));
        assert_eq!(buffer.len(), 1);

        let snapshot = buffer.drain_all();
        assert_eq!(first_x(&snapshot["lidar"]), 2.0);
    }

    #[test]
    fn drain_is_exhaustive_and_clearing() {
        let buffer = ReadingBuffer::new();
        buffer.put("a", cloud("a", 1.0));
        buffer.put("b", cloud("b", 2.0));

        let snapshot = buffer.drain_all();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn concurrent_producers_keep_one_entry_per_source() {
        let buffer = Arc::new(ReadingBuffer::new());
        let producers: Vec<_> = (0..8)
            .map(|id| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    let frame = format!("sensor_{id}");
                    for i in 0..200 {
                        buffer.put(frame.clone(), cloud(&frame, i as f32));
                    }
                })
            })
            .collect();

        let mut drained = 0;
        for _ in 0..50 {
            drained += buffer.drain_all().len();
        }
        for p in producers {
            p.join().expect("producer panicked");
        }
        let rest = buffer.drain_all();
        assert!(rest.len() <= 8);
        assert!(drained + rest.len() >= 8);
        // Whatever survived is the last write of its producer.
        for reading in rest.values() {
            assert_eq!(first_x(reading), 199.0);
        }
    }
}
