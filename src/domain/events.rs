//! Device change events and the observer bus that fans them out.

use crate::domain::models::BluetoothAddress;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Discovered {
        device_id: String,
        name: String,
        address: BluetoothAddress,
        connected: bool,
        paired: bool,
        timestamp: DateTime<Utc>,
    },
    Removed {
        device_id: String,
        name: String,
        timestamp: DateTime<Utc>,
    },
    ConnectionChanged {
        device_id: String,
        name: String,
        connected: bool,
        timestamp: DateTime<Utc>,
    },
    BatteryChanged {
        device_id: String,
        name: String,
        old_level: Option<u8>,
        new_level: Option<u8>,
        timestamp: DateTime<Utc>,
    },
    /// The device table was cleared and discovery restarted
    Refreshed { timestamp: DateTime<Utc> },
}

impl DeviceEvent {
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Discovered { device_id, .. }
            | Self::Removed { device_id, .. }
            | Self::ConnectionChanged { device_id, .. }
            | Self::BatteryChanged { device_id, .. } => Some(device_id),
            Self::Refreshed { .. } => None,
        }
    }

    /// True for a battery change whose new level is at or below `threshold`.
    pub fn is_low_battery(&self, threshold: u8) -> bool {
        matches!(self, Self::BatteryChanged { new_level: Some(level), .. } if *level <= threshold)
    }
}

/// Observer registry. Each subscriber gets its own unbounded channel;
/// subscribers that dropped their receiver are pruned on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DeviceEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: DeviceEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery_event(new_level: Option<u8>) -> DeviceEvent {
        DeviceEvent::BatteryChanged {
            device_id: "dev".to_string(),
            name: "Buds".to_string(),
            old_level: None,
            new_level,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_low_battery_threshold() {
        assert!(battery_event(Some(20)).is_low_battery(20));
        assert!(battery_event(Some(5)).is_low_battery(20));
        assert!(!battery_event(Some(21)).is_low_battery(20));
        assert!(!battery_event(None).is_low_battery(20));
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(battery_event(Some(50)));

        assert_eq!(a.try_recv().unwrap().device_id(), Some("dev"));
        assert_eq!(b.try_recv().unwrap().device_id(), Some("dev"));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(DeviceEvent::Refreshed { timestamp: Utc::now() });

        assert_eq!(bus.subscriber_count(), 1);
        drop(keep);
    }
}
