//! Device category derivation
//!
//! Class-of-device decoding first, then keyword matching on the device name.

use crate::domain::models::DeviceCategory;
use tracing::debug;

const MAJOR_COMPUTER: u32 = 0x01;
const MAJOR_PHONE: u32 = 0x02;
const MAJOR_AUDIO_VIDEO: u32 = 0x04;
const MAJOR_PERIPHERAL: u32 = 0x05;
const MAJOR_WEARABLE: u32 = 0x07;
const MAJOR_HEALTH: u32 = 0x09;

// Raw masks on the full class-of-device value, not the shifted minor class.
const PERIPHERAL_KEYBOARD_MASK: u32 = 0x0040;
const PERIPHERAL_POINTING_MASK: u32 = 0x0080;

/// Gamepad keywords are checked before speaker keywords so "xbox" never hits "box".
const PHONE_KEYWORDS: &[&str] = &["phone", "iphone", "android"];
const COMPUTER_KEYWORDS: &[&str] = &["pc", "laptop", "computer", "desktop"];
const GAMEPAD_KEYWORDS: &[&str] = &["controller", "gamepad", "xbox", "dualsense"];
const HEADPHONE_KEYWORDS: &[&str] = &[
    "headphone", "headset", "bud", "pod", "air", "enco", "free", "sono", "music", "audio",
];
const SPEAKER_KEYWORDS: &[&str] = &["speaker", "sound", "box"];
const WATCH_KEYWORDS: &[&str] = &["watch", "band", "strap", "wear"];
const KEYBOARD_KEYWORDS: &[&str] = &["key", "board"];
const MOUSE_KEYWORDS: &[&str] = &["mouse", "mice", "track"];

/// Major device class, bits 8-12.
pub fn major_class(cod: u32) -> u32 {
    (cod >> 8) & 0x1F
}

/// Minor device class, bits 2-7.
pub fn minor_class(cod: u32) -> u32 {
    (cod >> 2) & 0x3F
}

/// Derive the display category of a device.
///
/// A non-zero class-of-device wins when it maps to something; otherwise the
/// name is matched against ordered keyword groups. Audio-capable devices
/// nothing else recognises are treated as headphones.
pub fn derive_category(name: &str, class_of_device: u32, audio_capable: bool) -> DeviceCategory {
    debug!(
        "Deriving category for '{}': CoD={:#08X}, audio={}",
        name, class_of_device, audio_capable
    );

    if let Some(category) = category_from_class(class_of_device) {
        return category;
    }

    if let Some(category) = category_from_name(name) {
        return category;
    }

    if audio_capable {
        DeviceCategory::Headphones
    } else {
        DeviceCategory::Other
    }
}

fn category_from_class(cod: u32) -> Option<DeviceCategory> {
    if cod == 0 {
        return None;
    }

    let minor = minor_class(cod);
    match major_class(cod) {
        MAJOR_AUDIO_VIDEO => Some(match minor {
            0x01 | 0x02 | 0x06 => DeviceCategory::Headphones,
            0x05 | 0x07 | 0x08 => DeviceCategory::Speaker,
            _ => DeviceCategory::Speaker,
        }),
        MAJOR_COMPUTER => Some(DeviceCategory::Computer),
        MAJOR_PHONE => Some(DeviceCategory::Phone),
        MAJOR_PERIPHERAL => {
            if cod & PERIPHERAL_KEYBOARD_MASK != 0 {
                Some(DeviceCategory::Keyboard)
            } else if cod & PERIPHERAL_POINTING_MASK != 0 {
                Some(DeviceCategory::Mouse)
            } else if minor & 0x01 != 0 || minor & 0x02 != 0 {
                Some(DeviceCategory::Gamepad)
            } else {
                None
            }
        }
        MAJOR_WEARABLE => Some(DeviceCategory::Watch),
        MAJOR_HEALTH => Some(DeviceCategory::HealthDevice),
        _ => None,
    }
}

fn category_from_name(name: &str) -> Option<DeviceCategory> {
    let lower = name.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    let ordered: [(&[&str], DeviceCategory); 8] = [
        (PHONE_KEYWORDS, DeviceCategory::Phone),
        (COMPUTER_KEYWORDS, DeviceCategory::Computer),
        (GAMEPAD_KEYWORDS, DeviceCategory::Gamepad),
        (HEADPHONE_KEYWORDS, DeviceCategory::Headphones),
        (SPEAKER_KEYWORDS, DeviceCategory::Speaker),
        (WATCH_KEYWORDS, DeviceCategory::Watch),
        (KEYBOARD_KEYWORDS, DeviceCategory::Keyboard),
        (MOUSE_KEYWORDS, DeviceCategory::Mouse),
    ];

    ordered
        .into_iter()
        .find(|(keywords, _)| matches(keywords))
        .map(|(_, category)| category)
}
