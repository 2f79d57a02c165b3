//! Bluetooth Device Service
//!
//! Owns the device table and ties the components together: discovery events
//! become records, records are correlated with audio endpoints, and
//! connect/disconnect/battery requests run as ordered fallbacks over the
//! endpoint connector and the battery readers.

use crate::application::device_table::DeviceTable;
use crate::domain::category::derive_category;
use crate::domain::events::{DeviceEvent, EventBus};
use crate::domain::fallback::FallbackChain;
use crate::domain::models::{BluetoothAddress, BluetoothDeviceRecord, DeviceType};
use crate::domain::settings::Settings;
use crate::infrastructure::audio::{AudioConnector, AudioEndpointRecord, EndpointEnumerator};
use crate::infrastructure::bluetooth::{
    BleBatteryReader, ClassicBatteryReader, DeviceDiscoverer, DiscoveredDevice, DiscoveryEvent,
    WatchKind,
};
use crate::infrastructure::native::PlatformBackends;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Service tuning, normally taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub poll_interval: Duration,
    pub low_battery_threshold: u8,
    pub ble_notifications: bool,
    pub codec_registry_fallback: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ServiceConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.battery_poll_interval_secs.max(1)),
            low_battery_threshold: settings.low_battery_threshold,
            ble_notifications: settings.ble_battery_notifications,
            codec_registry_fallback: settings.audio_codec_registry_fallback,
        }
    }
}

struct Inner {
    table: DeviceTable,
    events: EventBus,
    enumerator: EndpointEnumerator,
    connector: AudioConnector,
    ble: BleBatteryReader,
    classic: ClassicBatteryReader,
    config: ServiceConfig,
    battery_tx: mpsc::UnboundedSender<(String, u8)>,
}

#[derive(Default)]
struct Tasks {
    event_loops: Vec<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
}

/// Main service: the device table plus every operation on it.
///
/// `start`, `refresh` and the operations spawn tokio tasks, so they must be
/// called from within a runtime.
pub struct BluetoothService {
    inner: Arc<Inner>,
    discoverer: DeviceDiscoverer,
    discovery_rx: Mutex<Option<mpsc::UnboundedReceiver<DiscoveryEvent>>>,
    battery_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, u8)>>>,
    tasks: Mutex<Tasks>,
}

impl BluetoothService {
    pub fn new(backends: PlatformBackends, config: ServiceConfig) -> Self {
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let (battery_tx, battery_rx) = mpsc::unbounded_channel();

        let registry = config
            .codec_registry_fallback
            .then(|| backends.registry.clone());

        let inner = Arc::new(Inner {
            table: DeviceTable::new(),
            events: EventBus::new(),
            enumerator: EndpointEnumerator::new(backends.topology.clone(), registry),
            connector: AudioConnector::new(),
            ble: BleBatteryReader::new(backends.gatt.clone()),
            classic: ClassicBatteryReader::new(backends.device_nodes.clone()),
            config,
            battery_tx,
        });

        Self {
            inner,
            discoverer: DeviceDiscoverer::new(backends.watch.clone(), discovery_tx),
            discovery_rx: Mutex::new(Some(discovery_rx)),
            battery_rx: Mutex::new(Some(battery_rx)),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    /// Start discovery and battery polling. No-op while running.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(rx) = self.discovery_rx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            tasks.event_loops.push(tokio::spawn(discovery_loop(self.inner.clone(), rx)));
        }
        if let Some(rx) = self.battery_rx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            tasks.event_loops.push(tokio::spawn(notification_loop(self.inner.clone(), rx)));
        }

        self.discoverer.start();

        if tasks.poller.is_none() {
            tasks.poller = Some(tokio::spawn(poll_loop(self.inner.clone())));
            info!(
                "Battery polling every {}s",
                self.inner.config.poll_interval.as_secs()
            );
        }
    }

    /// Stop discovery and battery polling. Records are kept.
    pub fn stop(&self) {
        self.discoverer.stop();
        if let Some(poller) = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .poller
            .take()
        {
            poller.abort();
        }
    }

    /// Drop every record and rediscover from scratch.
    pub fn refresh(&self) {
        info!("Refreshing device list");
        self.stop();
        self.inner.table.clear();
        self.start();
        self.inner.events.publish(DeviceEvent::Refreshed { timestamp: Utc::now() });
    }

    /// Stop everything and release notification subscriptions.
    pub async fn shutdown(&self) {
        self.stop();
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            for task in tasks.event_loops.drain(..) {
                task.abort();
            }
        }
        self.inner.ble.unsubscribe_all().await;
        info!("Bluetooth service shut down");
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<BluetoothDeviceRecord> {
        self.inner.table.get(id)
    }

    /// First record with `address`, for callers that only know the MAC.
    pub fn find_by_address(&self, address: BluetoothAddress) -> Option<BluetoothDeviceRecord> {
        if address.is_zero() {
            return None;
        }
        self.inner.table.filter(|r| r.address == address).into_iter().next()
    }

    pub fn list(&self) -> Vec<BluetoothDeviceRecord> {
        self.inner.table.list()
    }

    pub fn list_connected(&self) -> Vec<BluetoothDeviceRecord> {
        self.inner.table.filter(|r| r.connected)
    }

    pub fn list_audio(&self) -> Vec<BluetoothDeviceRecord> {
        self.inner.table.filter(|r| r.audio_capable)
    }

    /// Fresh enumeration of every Bluetooth audio endpoint.
    pub async fn audio_endpoints(&self) -> Vec<AudioEndpointRecord> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.enumerator.enumerate())
            .await
            .unwrap_or_default()
    }

    pub async fn connect(&self, id: &str) -> bool {
        let Some(record) = self.inner.table.get(id) else {
            warn!("Connect: unknown device {}", id);
            return false;
        };
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.connect_blocking(&record))
            .await
            .unwrap_or(false)
    }

    pub async fn disconnect(&self, id: &str) -> bool {
        let Some(record) = self.inner.table.get(id) else {
            warn!("Disconnect: unknown device {}", id);
            return false;
        };
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.disconnect_blocking(&record))
            .await
            .unwrap_or(false)
    }

    pub async fn read_battery(&self, id: &str) -> Option<u8> {
        self.inner.read_battery(id).await
    }
}

impl Drop for BluetoothService {
    fn drop(&mut self) {
        self.discoverer.stop();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(poller) = tasks.poller.take() {
            poller.abort();
        }
        for task in tasks.event_loops.drain(..) {
            task.abort();
        }
        // Best effort: only possible while a runtime is still around.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = self.inner.clone();
            handle.spawn(async move { inner.ble.unsubscribe_all().await });
        }
    }
}

impl Inner {
    fn connect_blocking(&self, record: &BluetoothDeviceRecord) -> bool {
        let endpoints = self.enumerator.find_by_mac_and_name(record.address, &record.name);
        debug!("Connect '{}': {} candidate endpoints", record.name, endpoints.len());

        if endpoints.iter().any(|e| self.connector.connect(e)) {
            return true;
        }

        match self.container_endpoint(record) {
            Some(endpoint) => self.connector.connect(&endpoint),
            None => {
                warn!("Connect '{}': no endpoint accepted the request", record.name);
                false
            }
        }
    }

    fn disconnect_blocking(&self, record: &BluetoothDeviceRecord) -> bool {
        let endpoints = self.enumerator.find_by_mac_and_name(record.address, &record.name);
        debug!("Disconnect '{}': {} candidate endpoints", record.name, endpoints.len());

        // Every endpoint must be silenced, so no early exit.
        let succeeded = endpoints
            .iter()
            .filter(|e| self.connector.disconnect(e))
            .count();
        if succeeded > 0 {
            return true;
        }

        match self.container_endpoint(record) {
            Some(endpoint) => self.connector.disconnect(&endpoint),
            None => {
                warn!("Disconnect '{}': no endpoint accepted the request", record.name);
                false
            }
        }
    }

    fn container_endpoint(&self, record: &BluetoothDeviceRecord) -> Option<AudioEndpointRecord> {
        let container_id = record.container_id?;
        debug!("Trying container id {} for '{}'", container_id, record.name);
        self.enumerator.find_by_container_id(container_id)
    }

    async fn read_battery(self: &Arc<Self>, id: &str) -> Option<u8> {
        let record = self.table.get(id)?;

        let mut level = None;
        if record.device_type.supports_le() {
            level = self.ble.read(&record.id, record.address).await;
        }

        if level.is_none() {
            let inner = self.clone();
            let instance_id = record.instance_id.clone();
            let address = record.address;
            level = tokio::task::spawn_blocking(move || {
                FallbackChain::new()
                    .attempt_if(instance_id.is_some(), "classic instance id", || {
                        instance_id
                            .as_deref()
                            .and_then(|i| inner.classic.read_by_instance_id(i))
                    })
                    .attempt_if(!address.is_zero(), "classic address", || {
                        inner.classic.read_by_mac(address)
                    })
                    .resolve()
                    .map(|resolved| {
                        debug!("Battery from {}: {}%", resolved.source, resolved.value);
                        resolved.value
                    })
            })
            .await
            .ok()
            .flatten();
        }

        if let Some(level) = level {
            self.apply_battery(id, level);
        }
        level
    }

    /// Store a battery level, emitting an event only when it changed.
    fn apply_battery(&self, id: &str, level: u8) {
        let change = self
            .table
            .update(id, |record| {
                let old = record.battery_level;
                if old == Some(level) {
                    return None;
                }
                record.battery_level = Some(level);
                record.last_seen = Utc::now();
                Some((old, record.name.clone()))
            })
            .flatten();

        let Some((old_level, name)) = change else {
            return;
        };

        let event = DeviceEvent::BatteryChanged {
            device_id: id.to_string(),
            name: name.clone(),
            old_level,
            new_level: Some(level),
            timestamp: Utc::now(),
        };
        if event.is_low_battery(self.config.low_battery_threshold) {
            warn!("'{}' battery low: {}%", name, level);
        } else {
            info!("'{}' battery: {:?} -> {}%", name, old_level, level);
        }
        self.events.publish(event);
    }

    async fn on_added(self: &Arc<Self>, device: DiscoveredDevice) {
        let endpoints = {
            let inner = self.clone();
            let address = device.address;
            let name = device.name.clone();
            tokio::task::spawn_blocking(move || inner.enumerator.find_by_mac_and_name(address, &name))
                .await
                .unwrap_or_default()
        };
        let audio_capable = !endpoints.is_empty();
        let codec = endpoints.iter().find_map(|e| e.codec);
        let category = derive_category(&device.name, device.class_of_device, audio_capable);

        let mut device_type = match device.kind {
            WatchKind::Classic => DeviceType::Classic,
            WatchKind::LowEnergy => DeviceType::LowEnergy,
        };
        for twin in self.table.with_address(device.address, &device.id) {
            if twin.device_type != device_type {
                device_type = DeviceType::DualMode;
                self.table.update(&twin.id, |r| r.device_type = DeviceType::DualMode);
                debug!("'{}' seen by both watchers, now dual-mode", device.name);
            }
        }

        let record = BluetoothDeviceRecord {
            id: device.id.clone(),
            address: device.address,
            name: device.name.clone(),
            device_type,
            class_of_device: device.class_of_device,
            category,
            connected: device.connected,
            paired: device.paired,
            battery_level: None,
            audio_capable,
            codec,
            instance_id: device.instance_id.clone(),
            container_id: device.container_id,
            last_seen: Utc::now(),
        };
        info!(
            "Discovered '{}' ({}, {:?}, {:?}, audio: {})",
            record.name,
            record.mac_address(),
            record.device_type,
            record.category,
            record.audio_capable
        );
        self.table.insert(record);

        self.events.publish(DeviceEvent::Discovered {
            device_id: device.id.clone(),
            name: device.name.clone(),
            address: device.address,
            connected: device.connected,
            paired: device.paired,
            timestamp: Utc::now(),
        });

        self.spawn_battery_read(&device.id);

        if self.config.ble_notifications && device_type.supports_le() {
            let inner = self.clone();
            tokio::spawn(async move {
                let sink = inner.battery_tx.clone();
                inner.ble.subscribe(&device.id, device.address, sink).await;
            });
        }
    }

    fn on_updated(self: &Arc<Self>, id: &str, connected: Option<bool>) {
        let Some(connected) = connected else {
            self.table.update(id, |r| r.last_seen = Utc::now());
            return;
        };

        let Some((was, name)) = self.table.update(id, |r| {
            let was = r.connected;
            r.connected = connected;
            r.last_seen = Utc::now();
            (was, r.name.clone())
        }) else {
            debug!("Update for unknown device {}", id);
            return;
        };

        if was == connected {
            return;
        }
        info!("'{}' {}", name, if connected { "connected" } else { "disconnected" });
        self.events.publish(DeviceEvent::ConnectionChanged {
            device_id: id.to_string(),
            name,
            connected,
            timestamp: Utc::now(),
        });
        if connected {
            self.spawn_battery_read(id);
        }
    }

    async fn on_removed(self: &Arc<Self>, id: &str) {
        let Some(record) = self.table.remove(id) else {
            return;
        };
        info!("Removed '{}'", record.name);
        self.events.publish(DeviceEvent::Removed {
            device_id: record.id.clone(),
            name: record.name.clone(),
            timestamp: Utc::now(),
        });
        if record.device_type.supports_le() {
            self.ble.unsubscribe(id).await;
        }
    }

    fn spawn_battery_read(self: &Arc<Self>, id: &str) {
        let inner = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            inner.read_battery(&id).await;
        });
    }
}

async fn discovery_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<DiscoveryEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            DiscoveryEvent::Added(device) => inner.on_added(device).await,
            DiscoveryEvent::Updated { id, connected } => inner.on_updated(&id, connected),
            DiscoveryEvent::Removed(id) => inner.on_removed(&id).await,
            DiscoveryEvent::EnumerationCompleted(kind) => {
                info!("Initial {} enumeration complete, {} devices known", kind, inner.table.len())
            }
        }
    }
}

async fn notification_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<(String, u8)>) {
    while let Some((id, level)) = rx.recv().await {
        if level <= 100 {
            inner.apply_battery(&id, level);
        }
    }
}

async fn poll_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; discovery already reads once.
    interval.tick().await;

    loop {
        interval.tick().await;
        let connected = inner.table.filter(|r| r.connected);
        debug!("Polling battery for {} connected devices", connected.len());
        for record in connected {
            inner.spawn_battery_read(&record.id);
        }
    }
}
