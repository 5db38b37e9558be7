//! Live active-user counting over fixed-size time windows.
//!
//! [`ActiveUserCounter`] is the synchronous window state machine;
//! [`spawn_counter`] drives it from an [`EventSource`] on a single tokio task
//! and hands closed windows to a [`WindowStore`].

pub mod runner;
pub mod source;
pub mod store;
pub mod window;

pub use runner::{spawn_counter, CounterHandle, StreamSummary};
pub use source::{ChannelSource, EventSource, JsonLinesSource};
pub use store::{ChannelWindowStore, DatasetWindowStore, InMemoryWindowStore, WindowStore};
pub use window::{ActiveUserCounter, Observation};

use serde::{Deserialize, Serialize};

/// Which clock assigns events to windows and closes them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDomain {
    /// Windows follow the timestamps carried by the events
    #[default]
    EventTime,
    /// Events are stamped on arrival and windows close on the wall clock
    ProcessingTime,
}
