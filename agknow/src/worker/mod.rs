//! Background task execution
//!
//! A [`TaskRunner`] owns at most one background thread. Tasks report through
//! a typed channel that the foreground drains on its own schedule.

pub mod events;
pub mod progress;
pub mod runner;
pub mod tasks;

pub use events::{TaskEvent, TaskOutcome, TaskOutput};
pub use progress::ProgressTracker;
pub use runner::{Idle, Running, Task, TaskContext, TaskRunner};
pub use tasks::{ImagesTask, ListParcelsTask, ParcelDetailsTask, RegisterParcelTask};
