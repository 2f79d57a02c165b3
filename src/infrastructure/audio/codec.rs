//! A2DP codec resolution for Bluetooth audio endpoints.
//!
//! The endpoint codec property is read first. Older OS builds do not publish
//! it, so the A2DP driver's per-device registry parameters are consulted as
//! a fallback, keyed by the device MAC.

use crate::domain::models::AudioCodec;
use crate::error::PlatformResult;
use tracing::debug;

/// Per-device A2DP parameters, `{mac}` is the lowercase 12-hex-digit address.
pub const REGISTRY_PATH_TEMPLATE: &str =
    r"SYSTEM\CurrentControlSet\Services\BthA2dp\Parameters\Devices\{mac}";

/// Non-zero while the stream for that device is open.
pub const REGISTRY_ACTIVE_VALUE: &str = "Active";

/// Value names holding the A2DP media codec type, tried in order.
pub const REGISTRY_CODEC_VALUES: &[&str] = &["CodecType", "A2dpCodec", "Codec"];

pub const REGISTRY_VENDOR_ID_VALUE: &str = "VendorId";
pub const REGISTRY_VENDOR_CODEC_ID_VALUE: &str = "VendorCodecId";

// A2DP media codec types
const A2DP_CODEC_SBC: u32 = 0x00;
const A2DP_CODEC_AAC: u32 = 0x02;
const A2DP_CODEC_VENDOR: u32 = 0xFF;

/// (vendor id, vendor codec id) pairs for vendor-specific codecs.
const VENDOR_CODECS: &[((u32, u32), AudioCodec)] = &[
    ((0x004F, 0x0001), AudioCodec::AptX),
    ((0x00D7, 0x0024), AudioCodec::AptXHd),
    ((0x012D, 0x00AA), AudioCodec::Ldac),
];

/// Registry read seam (HKLM).
pub trait RegistryReader: Send + Sync {
    /// `Ok(None)` when the key or value does not exist.
    fn read_dword(&self, path: &str, value: &str) -> PlatformResult<Option<u32>>;
}

/// Look up a vendor-specific codec.
pub fn vendor_codec(vendor_id: u32, vendor_codec_id: u32) -> Option<AudioCodec> {
    VENDOR_CODECS
        .iter()
        .find(|(pair, _)| *pair == (vendor_id, vendor_codec_id))
        .map(|(_, codec)| *codec)
}

/// Extract the 12-hex-digit MAC from a connected-device id such as
/// `{2}.\\?\bthenum#{0000110b-...}_vid&...#7&1b2c&0&9505bb2cf7f4_c00000000#{...}`.
///
/// Brace-enclosed GUIDs are skipped since their last group is also 12 hex digits.
pub fn mac_from_device_id(device_id: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut stripped = String::with_capacity(device_id.len());
    for c in device_id.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    stripped
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find(|token| token.len() == 12 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|token| token.to_ascii_lowercase())
}

/// Codec from the A2DP driver registry parameters of the device with `mac`.
/// `None` unless the device is flagged active.
pub fn codec_from_registry(registry: &dyn RegistryReader, mac: &str) -> Option<AudioCodec> {
    let path = REGISTRY_PATH_TEMPLATE.replace("{mac}", &mac.to_ascii_lowercase());
    let read = |value: &str| match registry.read_dword(&path, value) {
        Ok(v) => v,
        Err(e) => {
            debug!("Registry read {}\\{} failed: {}", path, value, e);
            None
        }
    };

    if read(REGISTRY_ACTIVE_VALUE).unwrap_or(0) == 0 {
        return None;
    }

    let codec_type = REGISTRY_CODEC_VALUES.iter().find_map(|name| read(name));

    match codec_type {
        Some(A2DP_CODEC_SBC) => Some(AudioCodec::Sbc),
        Some(A2DP_CODEC_AAC) => Some(AudioCodec::Aac),
        Some(A2DP_CODEC_VENDOR) | None => {
            let vendor_id = read(REGISTRY_VENDOR_ID_VALUE)?;
            let vendor_codec_id = read(REGISTRY_VENDOR_CODEC_ID_VALUE)?;
            vendor_codec(vendor_id, vendor_codec_id)
        }
        Some(other) => Some(AudioCodec::Unknown(other)),
    }
}
