//! In-memory stand-ins for the native seams, with call counters.

use crate::domain::models::BluetoothAddress;
use crate::error::{PlatformError, PlatformResult};
use crate::infrastructure::audio::codec::RegistryReader;
use crate::infrastructure::audio::topology::{AudioTopology, EndpointNode, KsControl, KsProperty};
use crate::infrastructure::bluetooth::ble_battery::{BatterySink, GattBatteryApi};
use crate::infrastructure::bluetooth::classic_battery::{
    ClassDevice, DevNode, DeviceNodeApi, LocateMode,
};
use crate::infrastructure::bluetooth::discoverer::{
    DiscoveryEvent, WatchHandle, WatchKind, WatchSource,
};
use crate::infrastructure::native::{
    PlatformBackends, PropertyKey, PropertyValue, PKEY_AUDIO_ENDPOINT_CODEC,
    PKEY_DEVICE_CONTAINER_ID, PKEY_DEVICE_FRIENDLY_NAME,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

const E_FAIL: i32 = 0x8000_4005u32 as i32;

// ---------------------------------------------------------------------------
// Registry

#[derive(Default)]
pub struct FakeRegistry {
    values: HashMap<(String, String), u32>,
}

impl FakeRegistry {
    pub fn with(mut self, path: &str, value: &str, data: u32) -> Self {
        self.values.insert((path.to_string(), value.to_string()), data);
        self
    }
}

impl RegistryReader for FakeRegistry {
    fn read_dword(&self, path: &str, value: &str) -> PlatformResult<Option<u32>> {
        Ok(self.values.get(&(path.to_string(), value.to_string())).copied())
    }
}

// ---------------------------------------------------------------------------
// Audio topology

pub struct FakeKsControl {
    accepts: Option<HashSet<Uuid>>,
    calls: Mutex<Vec<KsProperty>>,
}

impl FakeKsControl {
    pub fn succeeding() -> Self {
        Self {
            accepts: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            accepts: Some(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Succeeds only under property set `set`.
    pub fn succeeding_on(set: Uuid) -> Self {
        Self {
            accepts: Some(HashSet::from([set])),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<KsProperty> {
        self.calls.lock().unwrap().clone()
    }
}

impl KsControl for FakeKsControl {
    fn property(&self, property: &KsProperty) -> PlatformResult<()> {
        self.calls.lock().unwrap().push(*property);
        match &self.accepts {
            Some(sets) if !sets.contains(&property.set) => {
                Err(PlatformError::native("KsProperty", E_FAIL))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct FakeEndpoint {
    id: String,
    name: Option<String>,
    container_id: Option<Uuid>,
    codec_index: Option<u32>,
    connectors: Vec<Option<String>>,
    active: bool,
    fail: bool,
}

impl FakeEndpoint {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            container_id: None,
            codec_index: None,
            connectors: Vec::new(),
            active: true,
            fail: false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Adds a connector leading to `device_id`.
    pub fn connected_to(mut self, device_id: &str) -> Self {
        self.connectors.push(Some(device_id.to_string()));
        self
    }

    /// Adds a connector whose far side cannot be resolved.
    pub fn with_failing_connector(mut self) -> Self {
        self.connectors.push(None);
        self
    }

    pub fn with_codec_index(mut self, index: u32) -> Self {
        self.codec_index = Some(index);
        self
    }

    pub fn in_container(mut self, container_id: Uuid) -> Self {
        self.container_id = Some(container_id);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Every call on the endpoint fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn check(&self, context: &'static str) -> PlatformResult<()> {
        if self.fail {
            Err(PlatformError::native(context, E_FAIL))
        } else {
            Ok(())
        }
    }
}

impl EndpointNode for FakeEndpoint {
    fn id(&self) -> PlatformResult<String> {
        self.check("GetId")?;
        Ok(self.id.clone())
    }

    fn is_active(&self) -> PlatformResult<bool> {
        self.check("GetState")?;
        Ok(self.active)
    }

    fn connector_count(&self) -> PlatformResult<u32> {
        self.check("GetConnectorCount")?;
        Ok(self.connectors.len() as u32)
    }

    fn connected_device_id(&self, index: u32) -> PlatformResult<Option<String>> {
        self.check("GetConnectedTo")?;
        match self.connectors.get(index as usize) {
            Some(Some(id)) => Ok(Some(id.clone())),
            Some(None) => Err(PlatformError::native("GetConnectedTo", E_FAIL)),
            None => Err(PlatformError::NotFound(format!("connector {}", index))),
        }
    }

    fn property(&self, key: &PropertyKey) -> PlatformResult<Option<PropertyValue>> {
        self.check("GetValue")?;
        let value = if *key == PKEY_DEVICE_FRIENDLY_NAME {
            self.name.clone().map(PropertyValue::Str)
        } else if *key == PKEY_DEVICE_CONTAINER_ID {
            self.container_id.map(PropertyValue::Guid)
        } else if *key == PKEY_AUDIO_ENDPOINT_CODEC {
            self.codec_index.map(PropertyValue::U32)
        } else {
            None
        };
        Ok(value)
    }
}

pub struct FakeTopology {
    endpoints: Vec<FakeEndpoint>,
    fail: bool,
    no_control: bool,
    default_control: Arc<FakeKsControl>,
    controls: HashMap<String, Arc<FakeKsControl>>,
    enumerations: AtomicUsize,
}

impl Default for FakeTopology {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            fail: false,
            no_control: false,
            default_control: Arc::new(FakeKsControl::succeeding()),
            controls: HashMap::new(),
            enumerations: AtomicUsize::new(0),
        }
    }
}

impl FakeTopology {
    pub fn with_endpoint(mut self, endpoint: FakeEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Control handed out for the device node `device_id`.
    pub fn with_control(mut self, device_id: &str, control: Arc<FakeKsControl>) -> Self {
        self.controls.insert(device_id.to_string(), control);
        self
    }

    /// Control activation fails for every device.
    pub fn without_control(mut self) -> Self {
        self.no_control = true;
        self
    }

    /// Endpoint enumeration itself fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    /// Property requests across every control handed out.
    pub fn control_calls(&self) -> usize {
        self.default_control.calls().len()
            + self.controls.values().map(|c| c.calls().len()).sum::<usize>()
    }
}

impl AudioTopology for FakeTopology {
    fn endpoints(&self) -> PlatformResult<Vec<Box<dyn EndpointNode>>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PlatformError::native("EnumAudioEndpoints", E_FAIL));
        }
        Ok(self
            .endpoints
            .iter()
            .cloned()
            .map(|e| Box::new(e) as Box<dyn EndpointNode>)
            .collect())
    }

    fn activate_control(&self, device_id: &str) -> PlatformResult<Arc<dyn KsControl>> {
        if self.no_control {
            return Err(PlatformError::native("Activate", E_FAIL));
        }
        let control = self
            .controls
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| self.default_control.clone());
        Ok(control)
    }
}

// ---------------------------------------------------------------------------
// Device watchers

#[derive(Default)]
pub struct FakeWatchSource {
    failing: HashSet<WatchKind>,
    started: Mutex<Vec<WatchKind>>,
    stopped: Arc<AtomicUsize>,
    sinks: Mutex<Vec<mpsc::UnboundedSender<DiscoveryEvent>>>,
}

impl FakeWatchSource {
    pub fn failing(mut self, kind: WatchKind) -> Self {
        self.failing.insert(kind);
        self
    }

    pub fn started(&self) -> Vec<WatchKind> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Deliver `event` as if a watcher had raised it.
    pub fn emit(&self, event: DiscoveryEvent) {
        if let Some(sink) = self.sinks.lock().unwrap().last() {
            let _ = sink.send(event);
        }
    }
}

struct FakeWatchHandle {
    stopped: Arc<AtomicUsize>,
    done: bool,
}

impl WatchHandle for FakeWatchHandle {
    fn stop(&mut self) -> PlatformResult<()> {
        if !self.done {
            self.done = true;
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl WatchSource for FakeWatchSource {
    fn watch(
        &self,
        kind: WatchKind,
        sink: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> PlatformResult<Box<dyn WatchHandle>> {
        if self.failing.contains(&kind) {
            return Err(PlatformError::native("CreateWatcher", E_FAIL));
        }
        self.started.lock().unwrap().push(kind);
        self.sinks.lock().unwrap().push(sink);
        Ok(Box::new(FakeWatchHandle {
            stopped: self.stopped.clone(),
            done: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// GATT

#[derive(Default)]
pub struct FakeGatt {
    level: Mutex<Option<u8>>,
    error: Option<PlatformError>,
    reads: AtomicUsize,
    subscriptions: AtomicUsize,
    unsubscriptions: AtomicUsize,
    sinks: Mutex<HashMap<String, BatterySink>>,
}

impl FakeGatt {
    pub fn with_level(level: u8) -> Self {
        Self {
            level: Mutex::new(Some(level)),
            ..Default::default()
        }
    }

    /// Connects fine but reports no battery value.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing(error: PlatformError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn set_level(&self, level: Option<u8>) {
        *self.level.lock().unwrap() = level;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn unsubscriptions(&self) -> usize {
        self.unsubscriptions.load(Ordering::SeqCst)
    }

    /// Push a notification to the subscriber of `device_id`.
    pub fn push(&self, device_id: &str, level: u8) {
        if let Some(sink) = self.sinks.lock().unwrap().get(device_id) {
            let _ = sink.send((device_id.to_string(), level));
        }
    }

    fn check(&self) -> PlatformResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GattBatteryApi for FakeGatt {
    async fn read_battery_level(
        &self,
        _device_id: &str,
        _address: BluetoothAddress,
    ) -> PlatformResult<Option<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(*self.level.lock().unwrap())
    }

    async fn subscribe(
        &self,
        device_id: &str,
        _address: BluetoothAddress,
        sink: BatterySink,
    ) -> PlatformResult<()> {
        self.check()?;
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().unwrap().insert(device_id.to_string(), sink);
        Ok(())
    }

    async fn unsubscribe(&self, device_id: &str) -> PlatformResult<()> {
        self.unsubscriptions.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().unwrap().remove(device_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PnP device nodes

#[derive(Default)]
pub struct FakeDeviceNodes {
    nodes: HashMap<String, (DevNode, bool)>,
    properties: HashMap<(DevNode, PropertyKey), PropertyValue>,
    children: HashMap<DevNode, DevNode>,
    siblings: HashMap<DevNode, DevNode>,
    class_devices: Vec<ClassDevice>,
    locates: Mutex<Vec<LocateMode>>,
    enumerations: AtomicUsize,
}

impl FakeDeviceNodes {
    pub fn node(mut self, instance_id: &str, node: DevNode) -> Self {
        self.nodes.insert(instance_id.to_string(), (node, false));
        self
    }

    /// Node only found with [`LocateMode::Phantom`].
    pub fn phantom_node(mut self, instance_id: &str, node: DevNode) -> Self {
        self.nodes.insert(instance_id.to_string(), (node, true));
        self
    }

    pub fn property(mut self, node: DevNode, key: PropertyKey, value: PropertyValue) -> Self {
        self.properties.insert((node, key), value);
        self
    }

    pub fn child(mut self, parent: DevNode, child: DevNode) -> Self {
        self.children.insert(parent, child);
        self
    }

    pub fn sibling(mut self, node: DevNode, next: DevNode) -> Self {
        self.siblings.insert(node, next);
        self
    }

    pub fn class_device(mut self, instance_id: &str, node: DevNode) -> Self {
        self.class_devices.push(ClassDevice {
            instance_id: instance_id.to_string(),
            node,
        });
        self
    }

    pub fn locates(&self) -> Vec<LocateMode> {
        self.locates.lock().unwrap().clone()
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl DeviceNodeApi for FakeDeviceNodes {
    fn locate(&self, instance_id: &str, mode: LocateMode) -> PlatformResult<DevNode> {
        self.locates.lock().unwrap().push(mode);
        match self.nodes.get(instance_id) {
            Some((node, false)) => Ok(*node),
            Some((node, true)) if mode == LocateMode::Phantom => Ok(*node),
            _ => Err(PlatformError::NotFound(instance_id.to_string())),
        }
    }

    fn property(&self, node: DevNode, key: &PropertyKey) -> PlatformResult<Option<PropertyValue>> {
        Ok(self.properties.get(&(node, *key)).cloned())
    }

    fn first_child(&self, node: DevNode) -> PlatformResult<Option<DevNode>> {
        Ok(self.children.get(&node).copied())
    }

    fn next_sibling(&self, node: DevNode) -> PlatformResult<Option<DevNode>> {
        Ok(self.siblings.get(&node).copied())
    }

    fn present_devices(&self, _class: Uuid) -> PlatformResult<Vec<ClassDevice>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.class_devices.clone())
    }
}

// ---------------------------------------------------------------------------

/// Every fake, kept so tests can inspect them after handing the bundle out.
pub struct FakePlatform {
    pub topology: Arc<FakeTopology>,
    pub registry: Arc<FakeRegistry>,
    pub watch: Arc<FakeWatchSource>,
    pub gatt: Arc<FakeGatt>,
    pub device_nodes: Arc<FakeDeviceNodes>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            topology: Arc::new(FakeTopology::default()),
            registry: Arc::new(FakeRegistry::default()),
            watch: Arc::new(FakeWatchSource::default()),
            gatt: Arc::new(FakeGatt::empty()),
            device_nodes: Arc::new(FakeDeviceNodes::default()),
        }
    }
}

impl FakePlatform {
    pub fn backends(&self) -> PlatformBackends {
        PlatformBackends {
            topology: self.topology.clone(),
            registry: self.registry.clone(),
            watch: self.watch.clone(),
            gatt: self.gatt.clone(),
            device_nodes: self.device_nodes.clone(),
        }
    }
}
