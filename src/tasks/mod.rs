use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

pub mod override_task;
pub mod poll_task;

/// Raised once to end a task loop.
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;
