//! GATT Battery Service reader for low-energy devices.

use crate::domain::models::BluetoothAddress;
use crate::error::PlatformResult;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Battery Service
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Battery Level characteristic (one byte, percent)
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Receives `(device id, level)` for every pushed notification.
pub type BatterySink = mpsc::UnboundedSender<(String, u8)>;

#[async_trait]
pub trait GattBatteryApi: Send + Sync {
    /// Open the battery service of the device and read the level once.
    /// `device_id` is tried first, then `address`.
    async fn read_battery_level(
        &self,
        device_id: &str,
        address: BluetoothAddress,
    ) -> PlatformResult<Option<u8>>;

    /// Enable notifications on the battery level characteristic.
    async fn subscribe(
        &self,
        device_id: &str,
        address: BluetoothAddress,
        sink: BatterySink,
    ) -> PlatformResult<()>;

    async fn unsubscribe(&self, device_id: &str) -> PlatformResult<()>;
}

pub struct BleBatteryReader {
    api: Arc<dyn GattBatteryApi>,
    subscriptions: Mutex<HashSet<String>>,
}

impl BleBatteryReader {
    pub fn new(api: Arc<dyn GattBatteryApi>) -> Self {
        Self {
            api,
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    /// Battery percentage, `None` on any failure (access denied, disconnected,
    /// no battery service) or an out-of-range value.
    pub async fn read(&self, device_id: &str, address: BluetoothAddress) -> Option<u8> {
        match self.api.read_battery_level(device_id, address).await {
            Ok(Some(level)) if level <= 100 => Some(level),
            Ok(Some(level)) => {
                debug!("Ignoring out-of-range battery level {} from {}", level, device_id);
                None
            }
            Ok(None) => None,
            Err(e) => {
                debug!("BLE battery read for {} failed: {}", device_id, e);
                None
            }
        }
    }

    pub async fn subscribe(&self, device_id: &str, address: BluetoothAddress, sink: BatterySink) -> bool {
        if self.is_subscribed(device_id) {
            return true;
        }
        match self.api.subscribe(device_id, address, sink).await {
            Ok(()) => {
                self.lock().insert(device_id.to_string());
                info!("Subscribed to battery notifications for {}", device_id);
                true
            }
            Err(e) => {
                debug!("Battery notification subscribe for {} failed: {}", device_id, e);
                false
            }
        }
    }

    /// Best-effort: failures are logged and swallowed.
    pub async fn unsubscribe(&self, device_id: &str) {
        if !self.lock().remove(device_id) {
            return;
        }
        if let Err(e) = self.api.unsubscribe(device_id).await {
            debug!("Battery notification unsubscribe for {} failed: {}", device_id, e);
        }
    }

    pub async fn unsubscribe_all(&self) {
        let ids: Vec<String> = self.lock().iter().cloned().collect();
        for id in ids {
            self.unsubscribe(&id).await;
        }
    }

    pub fn is_subscribed(&self, device_id: &str) -> bool {
        self.lock().contains(device_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
