//! Refresh scheduling: who to report next, and when each entity was last reported.

mod history;
mod scheduler;

pub use history::{parse_timestamp, HistoryStore, JsonHistoryStore, MemoryHistoryStore, SchedulerHistory};
pub use scheduler::{EntityState, Scheduler, SelectionReason};
