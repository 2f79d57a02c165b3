//! Classic Bluetooth battery level from PnP device-node properties.
//!
//! Hands-free capable devices report their battery to the Bluetooth stack,
//! which publishes it as a byte property on one of the device's nodes. Which
//! node carries it differs between drivers, so both the node tree under the
//! device and every classic Bluetooth node of the system class are searched.

use crate::domain::models::BluetoothAddress;
use crate::error::PlatformResult;
use crate::infrastructure::native::{
    PropertyKey, PropertyValue, DEVPKEY_BLUETOOTH_BATTERY_LEVEL, DEVPKEY_BLUETOOTH_DEVICE_ADDRESS,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// System device setup class.
pub const GUID_DEVCLASS_SYSTEM: Uuid = Uuid::from_u128(0x4d36e97d_e325_11ce_bfc1_08002be10318);

/// Instance id prefix of nodes created by the classic Bluetooth enumerator.
pub const CLASSIC_ENUMERATOR_PREFIX: &str = r"BTHENUM\";

/// Device instance handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevNode(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateMode {
    Normal,
    /// Also finds nodes that are registered but not currently present.
    Phantom,
}

/// A present device of some setup class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDevice {
    pub instance_id: String,
    pub node: DevNode,
}

/// PnP configuration and device-class enumeration API.
pub trait DeviceNodeApi: Send + Sync {
    fn locate(&self, instance_id: &str, mode: LocateMode) -> PlatformResult<DevNode>;

    /// `Ok(None)` when the node has no such property.
    fn property(&self, node: DevNode, key: &PropertyKey) -> PlatformResult<Option<PropertyValue>>;

    fn first_child(&self, node: DevNode) -> PlatformResult<Option<DevNode>>;

    fn next_sibling(&self, node: DevNode) -> PlatformResult<Option<DevNode>>;

    /// Present devices of setup class `class`.
    fn present_devices(&self, class: Uuid) -> PlatformResult<Vec<ClassDevice>>;
}

pub struct ClassicBatteryReader {
    api: Arc<dyn DeviceNodeApi>,
}

impl ClassicBatteryReader {
    pub fn new(api: Arc<dyn DeviceNodeApi>) -> Self {
        Self { api }
    }

    /// Battery level from the node `instance_id` or, failing that, its children.
    pub fn read_by_instance_id(&self, instance_id: &str) -> Option<u8> {
        let node = self.locate(instance_id)?;

        if let Some(level) = self.battery_of(node) {
            return Some(level);
        }

        let mut child = self.api.first_child(node).ok().flatten();
        while let Some(current) = child {
            if let Some(level) = self.battery_of(current) {
                debug!("Battery level {} found on child node of {}", level, instance_id);
                return Some(level);
            }
            child = self.api.next_sibling(current).ok().flatten();
        }

        None
    }

    /// Battery level from the classic Bluetooth system node whose address is `address`.
    pub fn read_by_mac(&self, address: BluetoothAddress) -> Option<u8> {
        if address.is_zero() {
            return None;
        }

        let devices = match self.api.present_devices(GUID_DEVCLASS_SYSTEM) {
            Ok(devices) => devices,
            Err(e) => {
                debug!("System device enumeration failed: {}", e);
                return None;
            }
        };

        devices
            .iter()
            .filter(|d| is_classic_bluetooth_node(&d.instance_id))
            .find_map(|device| {
                let level = self.battery_of(device.node)?;
                let node_address = self
                    .api
                    .property(device.node, &DEVPKEY_BLUETOOTH_DEVICE_ADDRESS)
                    .ok()
                    .flatten()
                    .and_then(|value| address_from_property(&value))?;

                (node_address == address).then(|| {
                    debug!("Battery level {} found on {}", level, device.instance_id);
                    level
                })
            })
    }

    fn locate(&self, instance_id: &str) -> Option<DevNode> {
        match self.api.locate(instance_id, LocateMode::Normal) {
            Ok(node) => Some(node),
            Err(first) => match self.api.locate(instance_id, LocateMode::Phantom) {
                Ok(node) => Some(node),
                Err(e) => {
                    debug!("Cannot locate {}: {} / {}", instance_id, first, e);
                    None
                }
            },
        }
    }

    fn battery_of(&self, node: DevNode) -> Option<u8> {
        match self.api.property(node, &DEVPKEY_BLUETOOTH_BATTERY_LEVEL) {
            Ok(Some(PropertyValue::Byte(level))) if level <= 100 => Some(level),
            Ok(_) => None,
            Err(e) => {
                debug!("Battery property read on {:?} failed: {}", node, e);
                None
            }
        }
    }
}

pub fn is_classic_bluetooth_node(instance_id: &str) -> bool {
    instance_id
        .get(..CLASSIC_ENUMERATOR_PREFIX.len())
        .map(|head| head.eq_ignore_ascii_case(CLASSIC_ENUMERATOR_PREFIX))
        .unwrap_or(false)
}

/// The address property is either a string or a little-endian 64-bit integer.
fn address_from_property(value: &PropertyValue) -> Option<BluetoothAddress> {
    match value {
        PropertyValue::Str(s) => BluetoothAddress::parse(s).ok(),
        PropertyValue::U64(raw) => Some(BluetoothAddress::new(*raw)),
        PropertyValue::Bytes(bytes) => {
            let raw: [u8; 8] = bytes.as_slice().try_into().ok()?;
            Some(BluetoothAddress::new(u64::from_le_bytes(raw)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::fakes::FakeDeviceNodes;

    const INSTANCE: &str = r"BTHENUM\{0000111E-0000-1000-8000-00805F9B34FB}_LOCALMFG&0002\7&2A4&0&AABBCCDDEEFF_C00000000";
    const ADDR: BluetoothAddress = BluetoothAddress::new(0xAABBCCDDEEFF);

    fn reader(nodes: FakeDeviceNodes) -> (ClassicBatteryReader, Arc<FakeDeviceNodes>) {
        let nodes = Arc::new(nodes);
        (ClassicBatteryReader::new(nodes.clone()), nodes)
    }

    #[test]
    fn test_battery_on_the_node_itself() {
        let (reader, _) = reader(
            FakeDeviceNodes::default()
                .node(INSTANCE, DevNode(1))
                .property(DevNode(1), DEVPKEY_BLUETOOTH_BATTERY_LEVEL, PropertyValue::Byte(70)),
        );
        assert_eq!(reader.read_by_instance_id(INSTANCE), Some(70));
    }

    #[test]
    fn test_phantom_retry() {
        let (reader, nodes) = reader(
            FakeDeviceNodes::default()
                .phantom_node(INSTANCE, DevNode(1))
                .property(DevNode(1), DEVPKEY_BLUETOOTH_BATTERY_LEVEL, PropertyValue::Byte(40)),
        );
        assert_eq!(reader.read_by_instance_id(INSTANCE), Some(40));
        assert_eq!(nodes.locates(), vec![LocateMode::Normal, LocateMode::Phantom]);
    }

    #[test]
    fn test_walks_children_then_siblings() {
        let (reader, _) = reader(
            FakeDeviceNodes::default()
                .node(INSTANCE, DevNode(1))
                .child(DevNode(1), DevNode(2))
                .sibling(DevNode(2), DevNode(3))
                .sibling(DevNode(3), DevNode(4))
                .property(DevNode(3), DEVPKEY_BLUETOOTH_BATTERY_LEVEL, PropertyValue::U32(90))
                .property(DevNode(4), DEVPKEY_BLUETOOTH_BATTERY_LEVEL, PropertyValue::Byte(55)),
        );
        // Node 3 holds a non-byte value, so node 4 wins.
        assert_eq!(reader.read_by_instance_id(INSTANCE), Some(55));
    }

    #[test]
    fn test_unknown_instance() {
        let (reader, _) = reader(FakeDeviceNodes::default());
        assert_eq!(reader.read_by_instance_id(INSTANCE), None);
    }

    #[test]
    fn test_read_by_mac_string_address() {
        let (reader, _) = reader(
            FakeDeviceNodes::default()
                .class_device(r"USB\VID_1234&PID_0001\5&1", DevNode(9))
                .property(DevNode(9), DEVPKEY_BLUETOOTH_BATTERY_LEVEL, PropertyValue::Byte(10))
                .property(DevNode(9), DEVPKEY_BLUETOOTH_DEVICE_ADDRESS, PropertyValue::Str("AA:BB:CC:DD:EE:FF".into()))
                .class_device(INSTANCE, DevNode(5))
                .property(DevNode(5), DEVPKEY_BLUETOOTH_BATTERY_LEVEL, PropertyValue::Byte(64))
                .property(DevNode(5), DEVPKEY_BLUETOOTH_DEVICE_ADDRESS, PropertyValue::Str("AA:BB:CC:DD:EE:FF".into())),
        );
        assert_eq!(reader.read_by_mac(ADDR), Some(64));
    }

    #[test]
    fn test_read_by_mac_integer_address() {
        let (reader, _) = reader(
            FakeDeviceNodes::default()
                .class_device(INSTANCE, DevNode(5))
                .property(DevNode(5), DEVPKEY_BLUETOOTH_BATTERY_LEVEL, PropertyValue::Byte(30))
                .property(DevNode(5), DEVPKEY_BLUETOOTH_DEVICE_ADDRESS, PropertyValue::U64(0x1122_3344_5566))
                .class_device(INSTANCE, DevNode(6))
                .property(DevNode(6), DEVPKEY_BLUETOOTH_BATTERY_LEVEL, PropertyValue::Byte(31))
                .property(
                    DevNode(6),
                    DEVPKEY_BLUETOOTH_DEVICE_ADDRESS,
                    PropertyValue::Bytes(0xAABBCCDDEEFFu64.to_le_bytes().to_vec()),
                ),
        );
        assert_eq!(reader.read_by_mac(ADDR), Some(31));
    }

    #[test]
    fn test_read_by_mac_zero_address_skips_enumeration() {
        let (reader, nodes) = reader(FakeDeviceNodes::default());
        assert_eq!(reader.read_by_mac(BluetoothAddress::new(0)), None);
        assert_eq!(nodes.enumerations(), 0);
    }

    #[test]
    fn test_prefix_check() {
        assert!(is_classic_bluetooth_node(INSTANCE));
        assert!(is_classic_bluetooth_node(r"bthenum\dev_aabbccddeeff"));
        assert!(!is_classic_bluetooth_node(r"BTHLE\DEV_AABBCCDDEEFF"));
    }
}
