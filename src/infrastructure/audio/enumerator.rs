//! Bluetooth audio endpoint enumeration
//!
//! Walks every render/capture endpoint, follows its topology connectors to
//! the device at the other end and keeps the endpoints that terminate at a
//! Bluetooth device node. Nothing is cached: every query enumerates afresh,
//! since a stale control handle would target an endpoint that no longer exists.

use crate::domain::models::{AudioCodec, BluetoothAddress};
use crate::error::PlatformResult;
use crate::infrastructure::audio::codec::{self, RegistryReader};
use crate::infrastructure::audio::topology::{AudioTopology, EndpointNode};
use crate::infrastructure::audio::AudioEndpointRecord;
use crate::infrastructure::native::{
    PropertyValue, PKEY_AUDIO_ENDPOINT_CODEC, PKEY_DEVICE_CONTAINER_ID, PKEY_DEVICE_FRIENDLY_NAME,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connected-device ids of Bluetooth device nodes start with this (case-insensitive).
pub const BLUETOOTH_DEVICE_ID_PREFIX: &str = r"{2}.\\?\bth";

/// Friendly-name marker of hands-free (call profile) endpoints.
pub const HANDS_FREE_MARKER: &str = "Hands-Free";

const UNKNOWN_NAME: &str = "Unknown";

pub fn is_bluetooth_device_id(device_id: &str) -> bool {
    device_id
        .get(..BLUETOOTH_DEVICE_ID_PREFIX.len())
        .map(|head| head.eq_ignore_ascii_case(BLUETOOTH_DEVICE_ID_PREFIX))
        .unwrap_or(false)
}

pub struct EndpointEnumerator {
    topology: Arc<dyn AudioTopology>,
    registry: Option<Arc<dyn RegistryReader>>,
}

impl EndpointEnumerator {
    /// `registry` enables the codec registry fallback.
    pub fn new(topology: Arc<dyn AudioTopology>, registry: Option<Arc<dyn RegistryReader>>) -> Self {
        Self { topology, registry }
    }

    /// Enumerate every endpoint that terminates at a Bluetooth device node.
    ///
    /// A failure on one endpoint or connector is logged and skipped.
    pub fn enumerate(&self) -> Vec<AudioEndpointRecord> {
        let nodes = match self.topology.endpoints() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Audio endpoint enumeration failed: {}", e);
                return Vec::new();
            }
        };
        debug!("Enumerating {} audio endpoints", nodes.len());

        let mut endpoints = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            if let Err(e) = self.collect_endpoint(node.as_ref(), &mut endpoints) {
                debug!("Skipping audio endpoint #{}: {}", index, e);
            }
        }

        debug!("Found {} Bluetooth audio endpoints", endpoints.len());
        endpoints
    }

    fn collect_endpoint(
        &self,
        node: &dyn EndpointNode,
        out: &mut Vec<AudioEndpointRecord>,
    ) -> PlatformResult<()> {
        let connector_count = node.connector_count()?;

        for index in 0..connector_count {
            let connected_device_id = match node.connected_device_id(index) {
                Ok(Some(id)) if !id.is_empty() => id,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Connector #{} unavailable: {}", index, e);
                    continue;
                }
            };

            if !is_bluetooth_device_id(&connected_device_id) {
                continue;
            }

            let id = node.id()?;
            let record = self.resolve(node, id, connected_device_id);
            debug!(
                "Bluetooth endpoint '{}' (codec: {:?}, control: {})",
                record.friendly_name,
                record.codec,
                record.control.is_some()
            );
            out.push(record);
        }

        Ok(())
    }

    fn resolve(
        &self,
        node: &dyn EndpointNode,
        id: String,
        connected_device_id: String,
    ) -> AudioEndpointRecord {
        let friendly_name = read_property(node, "friendly name", &PKEY_DEVICE_FRIENDLY_NAME)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());

        let container_id = read_property(node, "container id", &PKEY_DEVICE_CONTAINER_ID)
            .and_then(|v| v.as_guid())
            .unwrap_or(Uuid::nil());

        let codec = self.resolve_codec(node, &connected_device_id);
        let connected = node.is_active().unwrap_or(false);

        let control = match self.topology.activate_control(&connected_device_id) {
            Ok(control) => Some(control),
            Err(e) => {
                debug!("No control interface for {}: {}", connected_device_id, e);
                None
            }
        };

        AudioEndpointRecord {
            id,
            friendly_name,
            container_id,
            connected_device_id,
            control,
            codec,
            connected,
        }
    }

    fn resolve_codec(&self, node: &dyn EndpointNode, connected_device_id: &str) -> Option<AudioCodec> {
        if let Some(index) =
            read_property(node, "codec", &PKEY_AUDIO_ENDPOINT_CODEC).and_then(|v| v.as_u32())
        {
            return Some(AudioCodec::from_index(index));
        }

        let registry = self.registry.as_ref()?;
        let mac = codec::mac_from_device_id(connected_device_id)?;
        codec::codec_from_registry(registry.as_ref(), &mac)
    }

    /// Endpoints belonging to the device with `address` and `name`.
    ///
    /// MAC matches on the connected-device id come first; hands-free endpoints
    /// whose friendly name contains the device name are appended when not
    /// already matched. The hands-free gateway ids carry no MAC.
    pub fn find_by_mac_and_name(
        &self,
        address: BluetoothAddress,
        name: &str,
    ) -> Vec<AudioEndpointRecord> {
        let endpoints = self.enumerate();
        select_by_mac_and_name(endpoints, address, name)
    }

    /// Endpoint whose container id equals `container_id`, from a fresh enumeration.
    pub fn find_by_container_id(&self, container_id: Uuid) -> Option<AudioEndpointRecord> {
        if container_id.is_nil() {
            return None;
        }
        self.enumerate()
            .into_iter()
            .find(|e| e.container_id == container_id)
    }
}

/// Selection step of [`EndpointEnumerator::find_by_mac_and_name`].
pub fn select_by_mac_and_name(
    endpoints: Vec<AudioEndpointRecord>,
    address: BluetoothAddress,
    name: &str,
) -> Vec<AudioEndpointRecord> {
    let mac = address.to_hex12().to_lowercase();
    let name = name.to_lowercase();
    let marker = HANDS_FREE_MARKER.to_lowercase();

    let (mut matched, rest): (Vec<_>, Vec<_>) = endpoints.into_iter().partition(|e| {
        !address.is_zero() && e.connected_device_id.to_lowercase().contains(&mac)
    });
    debug!("{} endpoints matched MAC {}", matched.len(), address.to_hex12());

    if !name.is_empty() {
        let before = matched.len();
        for endpoint in rest {
            let friendly = endpoint.friendly_name.to_lowercase();
            let duplicate = matched.iter().any(|m| m.id == endpoint.id);
            if !duplicate && friendly.contains(&marker) && friendly.contains(&name) {
                matched.push(endpoint);
            }
        }
        debug!("{} hands-free endpoints matched by name", matched.len() - before);
    }

    matched
}

fn read_property(
    node: &dyn EndpointNode,
    what: &str,
    key: &crate::infrastructure::native::PropertyKey,
) -> Option<PropertyValue> {
    match node.property(key) {
        Ok(value) => value,
        Err(e) => {
            debug!("Reading endpoint {} failed: {}", what, e);
            None
        }
    }
}
