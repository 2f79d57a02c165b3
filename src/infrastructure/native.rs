//! Types shared by the native seams.
//!
//! Property keys and typed property values as the OS reports them, and the
//! bundle of backends the service is built from.

use crate::error::PlatformResult;
use crate::infrastructure::audio::codec::RegistryReader;
use crate::infrastructure::audio::topology::AudioTopology;
use crate::infrastructure::bluetooth::ble_battery::GattBatteryApi;
use crate::infrastructure::bluetooth::classic_battery::DeviceNodeApi;
use crate::infrastructure::bluetooth::discoverer::WatchSource;
use std::sync::Arc;
use uuid::Uuid;

/// `{fmtid} pid` pair identifying a device or endpoint property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub fmtid: Uuid,
    pub pid: u32,
}

impl PropertyKey {
    pub const fn new(fmtid: Uuid, pid: u32) -> Self {
        Self { fmtid, pid }
    }
}

/// Endpoint friendly name.
pub const PKEY_DEVICE_FRIENDLY_NAME: PropertyKey = PropertyKey::new(
    Uuid::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    14,
);

/// Container id grouping every function of one physical device.
pub const PKEY_DEVICE_CONTAINER_ID: PropertyKey = PropertyKey::new(
    Uuid::from_u128(0x8c7ed206_3f8a_4827_b3ab_ae9e1faefc6c),
    2,
);

/// Negotiated A2DP codec index (recent OS builds only).
pub const PKEY_AUDIO_ENDPOINT_CODEC: PropertyKey = PropertyKey::new(
    Uuid::from_u128(0x7811094d_3721_4993_94ec_23a9e963e090),
    2,
);

/// Battery percentage published by the classic Bluetooth stack on device nodes.
pub const DEVPKEY_BLUETOOTH_BATTERY_LEVEL: PropertyKey = PropertyKey::new(
    Uuid::from_u128(0x104ea319_6ee2_4701_bd47_8ddbf425bbe5),
    2,
);

/// Remote device address on classic Bluetooth device nodes.
pub const DEVPKEY_BLUETOOTH_DEVICE_ADDRESS: PropertyKey = PropertyKey::new(
    Uuid::from_u128(0x2bd67d8b_8beb_48d5_87e0_6cda3428040a),
    1,
);

/// Typed property value. Only the shapes this crate reads are modelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    U32(u32),
    U64(u64),
    Str(String),
    Guid(Uuid),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            Self::Byte(v) => Some(u32::from(*v)),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Self::Guid(g) => Some(*g),
            _ => None,
        }
    }
}

/// Every native seam the service needs, bundled.
#[derive(Clone)]
pub struct PlatformBackends {
    pub topology: Arc<dyn AudioTopology>,
    pub registry: Arc<dyn RegistryReader>,
    pub watch: Arc<dyn WatchSource>,
    pub gatt: Arc<dyn GattBatteryApi>,
    pub device_nodes: Arc<dyn DeviceNodeApi>,
}

impl PlatformBackends {
    /// Backends for the running operating system.
    #[cfg(windows)]
    pub fn native() -> PlatformResult<Self> {
        Ok(crate::infrastructure::platform::backends())
    }

    /// Backends for the running operating system.
    #[cfg(not(windows))]
    pub fn native() -> PlatformResult<Self> {
        Err(crate::error::PlatformError::Unsupported)
    }
}
