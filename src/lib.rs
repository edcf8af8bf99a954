//! BLE session core library
//! Discovers peripherals, drives one outbound GATT connection and advertises a
//! local service, all behind a single coordinator task.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod settings;
pub mod store;
pub mod utils;

pub use crate::config::SessionConfig;
pub use crate::core::bluetooth::{CoordinatorHandle, SessionCoordinator, SessionEvent, SessionSnapshot};
pub use crate::error::{AdapterNotReady, SessionError, SessionResult};
