mod day;
mod day_key;
mod event;
mod task;

pub use day::{Day, DayCounts};
pub use day_key::DayKey;
pub use event::{Event, EventKind};
pub use task::{Millis, Task, TaskStatus, initial_status};

/// Fresh random identifier for tasks and events.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
