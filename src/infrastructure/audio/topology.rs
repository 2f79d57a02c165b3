//! Audio topology seam.
//!
//! The Core Audio graph as the enumerator sees it: endpoints, the connectors
//! leading away from them, and the kernel-streaming control interface that
//! can be activated on the device at the far end of a connector.

use crate::error::PlatformResult;
use crate::infrastructure::native::{PropertyKey, PropertyValue};
use std::sync::Arc;
use uuid::Uuid;

/// Read request flag for a kernel-streaming property.
pub const KSPROPERTY_TYPE_GET: u32 = 0x0000_0001;

/// Property set / id / flags triple sent through [`KsControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KsProperty {
    pub set: Uuid,
    pub id: u32,
    pub flags: u32,
}

/// Kernel-streaming control handle on a connected Bluetooth audio device.
pub trait KsControl: Send + Sync {
    /// Issue a property request with no payload. `Err` carries the status.
    fn property(&self, property: &KsProperty) -> PlatformResult<()>;
}

/// One render or capture endpoint, active or not.
pub trait EndpointNode {
    fn id(&self) -> PlatformResult<String>;

    /// Whether the endpoint is currently in the active state.
    fn is_active(&self) -> PlatformResult<bool>;

    fn connector_count(&self) -> PlatformResult<u32>;

    /// Device id of the topology object on the other side of connector
    /// `index`, `None` when the connector is not connected.
    fn connected_device_id(&self, index: u32) -> PlatformResult<Option<String>>;

    /// `None` when the endpoint's property store has no value for `key`.
    fn property(&self, key: &PropertyKey) -> PlatformResult<Option<PropertyValue>>;
}

/// Source of endpoints. Implementations must not cache: every call reflects
/// the topology at that moment.
pub trait AudioTopology: Send + Sync {
    /// Every endpoint, each of which may individually fail later.
    fn endpoints(&self) -> PlatformResult<Vec<Box<dyn EndpointNode>>>;

    /// Activate the control interface on the device node `device_id`.
    fn activate_control(&self, device_id: &str) -> PlatformResult<Arc<dyn KsControl>>;
}
