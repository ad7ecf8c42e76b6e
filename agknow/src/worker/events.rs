use crate::collect::agknow::{ParcelListing, RegistrationOutcome};
use crate::geometric::parcel::Parcel;
use crate::geometric::raster::{RasterDescriptor, RasterGroupKey};

/// Success payload of a task, one variant per task kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    ParcelList(ParcelListing),
    ParcelDetails(Vec<Parcel>),
    /// Downloaded rasters per group, in request order
    Images(Vec<(RasterGroupKey, Vec<RasterDescriptor>)>),
    Registration(RegistrationOutcome),
}

impl TaskOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskOutput::ParcelList(_) => "parcel list",
            TaskOutput::ParcelDetails(_) => "parcel details",
            TaskOutput::Images(_) => "images",
            TaskOutput::Registration(_) => "registration",
        }
    }
}

/// Event sent from a running task to the foreground.
///
/// A task emits any number of `Progress`/`Status` events followed by exactly
/// one `Error` or `Finished`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Percentage, 0 to 100, never decreasing
    Progress(u8),
    Status(String),
    Error(String),
    Finished(TaskOutput),
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::Error(_) | TaskEvent::Finished(_))
    }
}

/// Terminal result of a task attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Finished(TaskOutput),
    Failed(String),
}

impl TaskOutcome {
    pub fn from_event(event: &TaskEvent) -> Option<TaskOutcome> {
        match event {
            TaskEvent::Finished(output) => Some(TaskOutcome::Finished(output.clone())),
            TaskEvent::Error(message) => Some(TaskOutcome::Failed(message.clone())),
            _ => None,
        }
    }
}
