//! `merger-runtime` – the running laser merger.
//!
//! Wires the perception core to its inputs and outputs and drives it at a
//! fixed rate.
//!
//! # Modules
//!
//! - [`config`] – [`MergerConfig`][config::MergerConfig]: startup
//!   configuration loaded from TOML with `LASER_MERGER_*` overrides.
//! - [`buffer`] – [`ReadingBuffer`][buffer::ReadingBuffer]: latest reading
//!   per source, drained once per tick.
//! - [`subscriptions`] – [`InputSubscriptions`][subscriptions::InputSubscriptions]:
//!   routes readings arriving on configured topics into the buffer.
//! - [`scheduler`] – [`MergeScheduler`][scheduler::MergeScheduler]: the
//!   Drain → Project → Merge → Publish loop on a dedicated thread.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: stderr
//!   logging with optional OTLP span export.

pub mod buffer;
pub mod config;
pub mod scheduler;
pub mod subscriptions;
pub mod telemetry;

pub use buffer::{ReadingBuffer, Snapshot};
pub use config::{MergerConfig, StaticTransform};
pub use scheduler::{CycleOutput, MergeScheduler, SCHEDULER_SOURCE, SchedulerHandle};
pub use subscriptions::{InputKind, InputSubscriptions};
pub use telemetry::{TracerProviderGuard, init_tracing};
