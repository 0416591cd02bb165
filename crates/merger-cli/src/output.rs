//! Stdout transport: one JSON line per published event.

use std::io::{self, Write};

use merger_middleware::TopicReceiver;
use merger_types::Event;
use tracing::{debug, warn};

/// Write `event` as a single JSON line.
pub fn write_event(out: &mut impl Write, event: &Event) -> io::Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Print every event from `receiver` until the bus closes.  Returns the
/// number of events written.
pub fn print_events(mut receiver: TopicReceiver) -> usize {
    let topic = receiver.topic().name();
    let mut written = 0;
    while let Some(event) = receiver.blocking_next() {
        // Lock per event so lines from both topics never interleave.
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = write_event(&mut out, &event) {
            warn!(topic, error = %e, "stdout closed; output printer exiting");
            break;
        }
        written += 1;
    }
    debug!(topic, written, "output printer finished");
    written
}
