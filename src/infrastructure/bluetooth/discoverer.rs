//! Paired device discovery
//!
//! Runs one OS watcher for paired classic devices and one for paired
//! low-energy devices, and forwards what they report as [`DiscoveryEvent`]s.

use crate::domain::models::BluetoothAddress;
use crate::error::PlatformResult;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which of the two watchers reported a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Classic,
    LowEnergy,
}

impl WatchKind {
    pub const ALL: [WatchKind; 2] = [WatchKind::Classic, WatchKind::LowEnergy];
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchKind::Classic => write!(f, "classic"),
            WatchKind::LowEnergy => write!(f, "low-energy"),
        }
    }
}

/// Full description of a device as reported when it first appears.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: String,
    pub address: BluetoothAddress,
    /// 0 when the watcher did not report it.
    pub class_of_device: u32,
    pub kind: WatchKind,
    pub connected: bool,
    pub paired: bool,
    pub container_id: Option<Uuid>,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    Added(DiscoveredDevice),
    /// Partial: only the id and connectivity are guaranteed.
    Updated { id: String, connected: Option<bool> },
    Removed(String),
    EnumerationCompleted(WatchKind),
}

/// A running watcher. Stopping twice is harmless.
pub trait WatchHandle: Send {
    fn stop(&mut self) -> PlatformResult<()>;
}

/// Native device-watch API.
pub trait WatchSource: Send + Sync {
    /// Start watching paired devices of `kind`, delivering events into `sink`.
    fn watch(
        &self,
        kind: WatchKind,
        sink: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> PlatformResult<Box<dyn WatchHandle>>;
}

pub struct DeviceDiscoverer {
    source: Arc<dyn WatchSource>,
    sink: mpsc::UnboundedSender<DiscoveryEvent>,
    handles: Mutex<Option<Vec<Box<dyn WatchHandle>>>>,
}

impl DeviceDiscoverer {
    pub fn new(source: Arc<dyn WatchSource>, sink: mpsc::UnboundedSender<DiscoveryEvent>) -> Self {
        Self {
            source,
            sink,
            handles: Mutex::new(None),
        }
    }

    /// Start both watchers. No-op while running.
    ///
    /// A watcher that fails to start is logged and skipped.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if handles.is_some() {
            debug!("Discovery already running");
            return;
        }

        let mut running = Vec::new();
        for kind in WatchKind::ALL {
            match self.source.watch(kind, self.sink.clone()) {
                Ok(handle) => {
                    info!("Started {} device watcher", kind);
                    running.push(handle);
                }
                Err(e) => warn!("Failed to start {} device watcher: {}", kind, e),
            }
        }
        *handles = Some(running);
    }

    /// Stop both watchers. No-op while stopped.
    pub fn stop(&self) {
        let Some(running) = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };

        for mut handle in running {
            if let Err(e) = handle.stop() {
                debug!("Stopping device watcher failed: {}", e);
            }
        }
        info!("Device discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Drop for DeviceDiscoverer {
    fn drop(&mut self) {
        self.stop();
    }
}
