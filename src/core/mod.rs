//! Core functionality of the BLE session library

pub mod bluetooth;

pub use bluetooth::{CoordinatorHandle, SessionCoordinator, SessionEvent};
