//! Forces a Bluetooth audio endpoint to reconnect or disconnect.

use crate::infrastructure::audio::topology::{KsProperty, KSPROPERTY_TYPE_GET};
use crate::infrastructure::audio::AudioEndpointRecord;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bluetooth audio oneshot property set.
pub const KSPROPSETID_BTAUDIO: Uuid = Uuid::from_u128(0x7fa06c40_b8f6_4c7e_8556_e8c33a12e54d);

/// Alternate property set some drivers register instead.
pub const KSPROPSETID_BTAUDIO_ALT: Uuid = Uuid::from_u128(0x602dceac_d13d_4dda_807d_37456abc210e);

pub const KSPROPERTY_ONESHOT_RECONNECT: u32 = 0;
pub const KSPROPERTY_ONESHOT_DISCONNECT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Oneshot {
    Reconnect,
    Disconnect,
}

impl Oneshot {
    fn property_id(self) -> u32 {
        match self {
            Oneshot::Reconnect => KSPROPERTY_ONESHOT_RECONNECT,
            Oneshot::Disconnect => KSPROPERTY_ONESHOT_DISCONNECT,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AudioConnector;

impl AudioConnector {
    pub fn new() -> Self {
        Self
    }

    pub fn connect(&self, endpoint: &AudioEndpointRecord) -> bool {
        self.send(endpoint, Oneshot::Reconnect)
    }

    pub fn disconnect(&self, endpoint: &AudioEndpointRecord) -> bool {
        self.send(endpoint, Oneshot::Disconnect)
    }

    fn send(&self, endpoint: &AudioEndpointRecord, oneshot: Oneshot) -> bool {
        let Some(control) = endpoint.control.as_ref() else {
            warn!(
                "{:?} '{}': endpoint has no control interface",
                oneshot, endpoint.friendly_name
            );
            return false;
        };

        for set in [KSPROPSETID_BTAUDIO, KSPROPSETID_BTAUDIO_ALT] {
            let property = KsProperty {
                set,
                id: oneshot.property_id(),
                flags: KSPROPERTY_TYPE_GET,
            };
            match control.property(&property) {
                Ok(()) => {
                    info!("{:?} sent to '{}'", oneshot, endpoint.friendly_name);
                    return true;
                }
                Err(e) => debug!(
                    "{:?} on '{}' under {} failed: {}",
                    oneshot, endpoint.friendly_name, set, e
                ),
            }
        }

        warn!("{:?} '{}' failed on both property sets", oneshot, endpoint.friendly_name);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::audio::topology::KsControl;
    use crate::infrastructure::fakes::FakeKsControl;
    use std::sync::Arc;

    fn endpoint(control: Option<Arc<FakeKsControl>>) -> AudioEndpointRecord {
        AudioEndpointRecord {
            id: "endpoint".into(),
            friendly_name: "Headphones (WH-1000XM4)".into(),
            container_id: Uuid::nil(),
            connected_device_id: r"{2}.\\?\bthenum#dev_aabbccddeeff".into(),
            control: control.map(|c| c as Arc<dyn KsControl>),
            codec: None,
            connected: true,
        }
    }

    #[test]
    fn test_missing_control_is_failure() {
        assert!(!AudioConnector::new().connect(&endpoint(None)));
        assert!(!AudioConnector::new().disconnect(&endpoint(None)));
    }

    #[test]
    fn test_primary_set_success() {
        let control = Arc::new(FakeKsControl::succeeding());
        assert!(AudioConnector::new().connect(&endpoint(Some(control.clone()))));

        let calls = control.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].set, KSPROPSETID_BTAUDIO);
        assert_eq!(calls[0].id, KSPROPERTY_ONESHOT_RECONNECT);
        assert_eq!(calls[0].flags, KSPROPERTY_TYPE_GET);
    }

    #[test]
    fn test_retries_alternate_set() {
        let control = Arc::new(FakeKsControl::succeeding_on(KSPROPSETID_BTAUDIO_ALT));
        assert!(AudioConnector::new().disconnect(&endpoint(Some(control.clone()))));

        let sets: Vec<_> = control.calls().iter().map(|p| (p.set, p.id)).collect();
        assert_eq!(
            sets,
            vec![
                (KSPROPSETID_BTAUDIO, KSPROPERTY_ONESHOT_DISCONNECT),
                (KSPROPSETID_BTAUDIO_ALT, KSPROPERTY_ONESHOT_DISCONNECT),
            ]
        );
    }

    #[test]
    fn test_both_sets_failing() {
        let control = Arc::new(FakeKsControl::failing());
        assert!(!AudioConnector::new().connect(&endpoint(Some(control.clone()))));
        assert_eq!(control.calls().len(), 2);
    }
}
