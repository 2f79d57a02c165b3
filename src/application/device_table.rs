use crate::domain::models::{BluetoothAddress, BluetoothDeviceRecord};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Devices keyed by platform id. Every mutation replaces or edits one entry
/// under the write lock, so readers never see a half-updated record.
#[derive(Default)]
pub struct DeviceTable {
    devices: RwLock<HashMap<String, BluetoothDeviceRecord>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, BluetoothDeviceRecord>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, BluetoothDeviceRecord>> {
        self.devices.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace, returning the previous record for that id.
    pub fn insert(&self, record: BluetoothDeviceRecord) -> Option<BluetoothDeviceRecord> {
        self.write().insert(record.id.clone(), record)
    }

    pub fn get(&self, id: &str) -> Option<BluetoothDeviceRecord> {
        self.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<BluetoothDeviceRecord> {
        self.write().remove(id)
    }

    /// Edit the record `id` in place; `None` when it does not exist.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut BluetoothDeviceRecord) -> R) -> Option<R> {
        self.write().get_mut(id).map(f)
    }

    /// Snapshot of every record matching `predicate`, ordered by name.
    pub fn filter(&self, predicate: impl Fn(&BluetoothDeviceRecord) -> bool) -> Vec<BluetoothDeviceRecord> {
        let mut records: Vec<_> = self.read().values().filter(|r| predicate(r)).cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn list(&self) -> Vec<BluetoothDeviceRecord> {
        self.filter(|_| true)
    }

    /// Records other than `except_id` sharing a non-zero `address`.
    pub fn with_address(&self, address: BluetoothAddress, except_id: &str) -> Vec<BluetoothDeviceRecord> {
        if address.is_zero() {
            return Vec::new();
        }
        self.filter(|r| r.address == address && r.id != except_id)
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
