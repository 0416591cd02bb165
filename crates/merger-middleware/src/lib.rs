//! `merger-middleware` – output transport.
//!
//! Carries the merger's publications to whoever is listening without caring
//! about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe bus built on Tokio
//!   broadcast channels, one lane per output.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
