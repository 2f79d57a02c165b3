//! Application layer: the device table and the service that drives it.

pub mod device_table;
pub mod service;

pub use service::{BluetoothService, ServiceConfig};
