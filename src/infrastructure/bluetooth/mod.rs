//! Bluetooth Module
//!
//! Device discovery and the two battery sources.
//!
//! ## Modules
//!
//! - [`discoverer`] - Paired classic and low-energy device watchers
//! - [`ble_battery`] - GATT Battery Service reads and notifications
//! - [`classic_battery`] - Battery level from PnP device-node properties

pub mod ble_battery;
pub mod classic_battery;
pub mod discoverer;

pub use ble_battery::BleBatteryReader;
pub use classic_battery::ClassicBatteryReader;
pub use discoverer::{DeviceDiscoverer, DiscoveredDevice, DiscoveryEvent, WatchKind};
