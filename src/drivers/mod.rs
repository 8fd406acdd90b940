//! Peripheral drivers used by the radio task.

pub mod watchdog;
