//! Windows implementations of the native seams.
//!
//! Core Audio and kernel streaming for endpoints, the registry for the codec
//! fallback, WinRT device watchers and GATT for discovery and BLE battery,
//! CfgMgr32/SetupAPI for classic battery properties.

mod cfgmgr;
mod core_audio;
mod gatt;
mod registry;
mod watcher;

use crate::error::PlatformError;
use crate::infrastructure::native::PlatformBackends;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use windows::core::GUID;
use windows::Win32::System::Com::{CoDecrementMTAUsage, CoIncrementMTAUsage, CO_MTA_USAGE_COOKIE};

pub fn backends() -> PlatformBackends {
    let mta = MtaGuard::acquire().map(Arc::new);

    PlatformBackends {
        topology: Arc::new(core_audio::CoreAudioTopology::new(mta.clone())),
        registry: Arc::new(registry::Win32Registry),
        watch: Arc::new(watcher::WinRtWatchSource),
        gatt: Arc::new(gatt::WinRtGatt::default()),
        device_nodes: Arc::new(cfgmgr::CfgMgrDeviceNodes),
    }
}

/// Keeps the process multithreaded apartment alive, so COM objects can be
/// created and used from any blocking worker thread.
pub(crate) struct MtaGuard(CO_MTA_USAGE_COOKIE);

impl MtaGuard {
    fn acquire() -> Option<Self> {
        match unsafe { CoIncrementMTAUsage() } {
            Ok(cookie) => Some(Self(cookie)),
            Err(e) => {
                debug!("CoIncrementMTAUsage failed: {}", e);
                None
            }
        }
    }
}

impl Drop for MtaGuard {
    fn drop(&mut self) {
        let _ = unsafe { CoDecrementMTAUsage(self.0) };
    }
}

// The cookie is only an opaque token.
unsafe impl Send for MtaGuard {}
unsafe impl Sync for MtaGuard {}

pub(crate) fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

pub(crate) fn from_guid(guid: &GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

pub(crate) fn hresult_error(context: &'static str, e: &windows::core::Error) -> PlatformError {
    PlatformError::native(context, e.code().0)
}
