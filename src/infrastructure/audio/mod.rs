pub mod codec;
pub mod connector;
pub mod enumerator;
pub mod topology;

use crate::domain::models::AudioCodec;
use std::fmt;
use std::sync::Arc;
use topology::KsControl;
use uuid::Uuid;

pub use connector::AudioConnector;
pub use enumerator::EndpointEnumerator;

/// One Bluetooth audio endpoint as seen by a single enumeration pass.
///
/// Only valid until the topology changes; never keep one across calls.
#[derive(Clone)]
pub struct AudioEndpointRecord {
    pub id: String,
    pub friendly_name: String,
    /// Nil when the endpoint did not report one.
    pub container_id: Uuid,
    /// Device id of the Bluetooth device node, embeds the MAC for A2DP endpoints.
    pub connected_device_id: String,
    pub control: Option<Arc<dyn KsControl>>,
    pub codec: Option<AudioCodec>,
    pub connected: bool,
}

impl fmt::Debug for AudioEndpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioEndpointRecord")
            .field("id", &self.id)
            .field("friendly_name", &self.friendly_name)
            .field("container_id", &self.container_id)
            .field("connected_device_id", &self.connected_device_id)
            .field("control", &self.control.is_some())
            .field("codec", &self.codec)
            .field("connected", &self.connected)
            .finish()
    }
}
