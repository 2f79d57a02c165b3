use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 48-bit Bluetooth device address, stored in the low bits of a `u64`
/// the same way the OS reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BluetoothAddress(u64);

impl BluetoothAddress {
    const MASK: u64 = 0xFFFF_FFFF_FFFF;

    pub const fn new(raw: u64) -> Self {
        Self(raw & Self::MASK)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// 12 uppercase hex digits without separators, e.g. `9505BB2CF7F4`.
    pub fn to_hex12(&self) -> String {
        format!("{:012X}", self.0)
    }

    /// Colon separated form, empty for the zero address.
    pub fn mac_string(&self) -> String {
        if self.is_zero() {
            String::new()
        } else {
            self.to_string()
        }
    }

    /// Parse `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or `AABBCCDDEEFF`.
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError(s.to_string()));
        }

        u64::from_str_radix(&hex, 16)
            .map(Self::new)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl FromStr for BluetoothAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for BluetoothAddress {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl Serialize for BluetoothAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid Bluetooth address: {0:?}")]
pub struct AddressParseError(pub String);

/// Transport a device was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceType {
    Classic,
    LowEnergy,
    DualMode,
}

impl DeviceType {
    /// Whether a GATT battery read is worth attempting.
    pub fn supports_le(&self) -> bool {
        matches!(self, Self::LowEnergy | Self::DualMode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceCategory {
    Headphones,
    Speaker,
    Keyboard,
    Mouse,
    Gamepad,
    Phone,
    Computer,
    Watch,
    HealthDevice,
    Other,
}

/// A2DP codec currently negotiated for an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Sbc,
    Aac,
    AptX,
    AptXHd,
    Ldac,
    Lc3,
    Unknown(u32),
}

impl AudioCodec {
    /// Map the enumerated index of the endpoint codec property.
    pub fn from_index(index: u32) -> Self {
        match index {
            0 => Self::Sbc,
            1 => Self::Aac,
            2 => Self::AptX,
            3 => Self::AptXHd,
            4 => Self::Ldac,
            5 => Self::Lc3,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sbc => write!(f, "SBC"),
            Self::Aac => write!(f, "AAC"),
            Self::AptX => write!(f, "aptX"),
            Self::AptXHd => write!(f, "aptX HD"),
            Self::Ldac => write!(f, "LDAC"),
            Self::Lc3 => write!(f, "LC3"),
            Self::Unknown(index) => write!(f, "Codec {}", index),
        }
    }
}

impl Serialize for AudioCodec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A paired Bluetooth device as tracked by the service.
#[derive(Debug, Clone, Serialize)]
pub struct BluetoothDeviceRecord {
    /// Platform device id, the table key
    pub id: String,
    pub address: BluetoothAddress,
    pub name: String,
    pub device_type: DeviceType,
    /// 24-bit class-of-device, 0 when unknown
    pub class_of_device: u32,
    pub category: DeviceCategory,
    pub connected: bool,
    pub paired: bool,
    /// 0-100, `None` until some source answers
    pub battery_level: Option<u8>,
    pub audio_capable: bool,
    pub codec: Option<AudioCodec>,
    pub instance_id: Option<String>,
    pub container_id: Option<Uuid>,
    pub last_seen: DateTime<Utc>,
}

impl BluetoothDeviceRecord {
    pub fn mac_address(&self) -> String {
        self.address.mac_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_formats_with_colons() {
        let address = BluetoothAddress::new(0xAABBCCDDEEFF);
        assert_eq!(address.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(address.to_hex12(), "AABBCCDDEEFF");
        assert_eq!(address.mac_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_zero_address_formats_empty() {
        assert_eq!(BluetoothAddress::new(0).mac_string(), "");
        assert_eq!(BluetoothAddress::new(0).to_hex12(), "000000000000");
    }

    #[test]
    fn test_address_round_trips_through_text() {
        for raw in [0x0000_0000_0001u64, 0x9505_BB2C_F7F4, 0xFFFF_FFFF_FFFF, 0x00AB_0000_00CD] {
            let address = BluetoothAddress::new(raw);
            assert_eq!(BluetoothAddress::parse(&address.to_string()), Ok(address));
            assert_eq!(BluetoothAddress::parse(&address.to_hex12()), Ok(address));
        }
    }

    #[test]
    fn test_address_parse_accepts_dashes_and_lowercase() {
        let parsed: BluetoothAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(parsed.as_u64(), 0xAABBCCDDEEFF);
    }

    #[test]
    fn test_address_parse_rejects_garbage() {
        assert!(BluetoothAddress::parse("AA:BB:CC").is_err());
        assert!(BluetoothAddress::parse("GG:BB:CC:DD:EE:FF").is_err());
        assert!(BluetoothAddress::parse("").is_err());
    }

    #[test]
    fn test_address_masks_to_48_bits() {
        assert_eq!(BluetoothAddress::new(0x1234_AABB_CCDD_EEFF).as_u64(), 0xAABBCCDDEEFF);
    }

    #[test]
    fn test_codec_from_index() {
        assert_eq!(AudioCodec::from_index(0), AudioCodec::Sbc);
        assert_eq!(AudioCodec::from_index(3).to_string(), "aptX HD");
        assert_eq!(AudioCodec::from_index(5), AudioCodec::Lc3);
        assert_eq!(AudioCodec::from_index(9).to_string(), "Codec 9");
    }

    #[test]
    fn test_device_type_le_support() {
        assert!(!DeviceType::Classic.supports_le());
        assert!(DeviceType::LowEnergy.supports_le());
        assert!(DeviceType::DualMode.supports_le());
    }
}
