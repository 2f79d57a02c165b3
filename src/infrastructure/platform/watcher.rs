//! WinRT association-endpoint watchers for paired devices.

use super::{from_guid, hresult_error};
use crate::domain::models::BluetoothAddress;
use crate::error::PlatformResult;
use crate::infrastructure::bluetooth::discoverer::{
    DiscoveredDevice, DiscoveryEvent, WatchHandle, WatchKind, WatchSource,
};
use tokio::sync::mpsc;
use tracing::debug;
use windows::core::{IInspectable, Interface, Ref, GUID, HSTRING};
use windows::Devices::Bluetooth::{BluetoothDevice, BluetoothLEDevice};
use windows::Devices::Enumeration::{
    DeviceInformation, DeviceInformationKind, DeviceInformationUpdate, DeviceWatcher,
    DeviceWatcherStatus,
};
use windows::Foundation::Collections::{IIterable, IMapView};
use windows::Foundation::{IReference, TypedEventHandler};

const PROP_DEVICE_ADDRESS: &str = "System.Devices.Aep.DeviceAddress";
const PROP_IS_CONNECTED: &str = "System.Devices.Aep.IsConnected";
const PROP_IS_PAIRED: &str = "System.Devices.Aep.IsPaired";
const PROP_LE_IS_CONNECTABLE: &str = "System.Devices.Aep.Bluetooth.Le.IsConnectable";
const PROP_CATEGORY: &str = "System.Devices.Aep.Category";
const PROP_CONTAINER_ID: &str = "System.Devices.Aep.ContainerId";
/// Class of device. The canonical name is not resolved on every OS build.
const PROP_CLASS_OF_DEVICE: &str = "{ea900399-b1d5-4529-a35c-43f295b92209} 26";

const REQUESTED_PROPERTIES: [&str; 7] = [
    PROP_DEVICE_ADDRESS,
    PROP_IS_CONNECTED,
    PROP_IS_PAIRED,
    PROP_LE_IS_CONNECTABLE,
    PROP_CATEGORY,
    PROP_CONTAINER_ID,
    PROP_CLASS_OF_DEVICE,
];

pub struct WinRtWatchSource;

impl WatchSource for WinRtWatchSource {
    fn watch(
        &self,
        kind: WatchKind,
        sink: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> PlatformResult<Box<dyn WatchHandle>> {
        start_watcher(kind, sink).map_err(|e| hresult_error("DeviceWatcher", &e))
    }
}

fn start_watcher(
    kind: WatchKind,
    sink: mpsc::UnboundedSender<DiscoveryEvent>,
) -> windows::core::Result<Box<dyn WatchHandle>> {
    let selector = match kind {
        WatchKind::Classic => BluetoothDevice::GetDeviceSelectorFromPairingState(true)?,
        WatchKind::LowEnergy => BluetoothLEDevice::GetDeviceSelectorFromPairingState(true)?,
    };
    let properties: Vec<HSTRING> = REQUESTED_PROPERTIES.iter().map(|p| HSTRING::from(*p)).collect();
    let properties = IIterable::<HSTRING>::from(properties);

    let watcher = DeviceInformation::CreateWatcherWithKindAqsFilterAndAdditionalProperties(
        &selector,
        &properties,
        DeviceInformationKind::AssociationEndpoint,
    )?;

    let added_sink = sink.clone();
    let added = watcher.Added(&TypedEventHandler::new(
        move |_: Ref<DeviceWatcher>, info: Ref<DeviceInformation>| {
            if let Some(info) = info.as_ref() {
                let device = discovered(kind, info)?;
                let _ = added_sink.send(DiscoveryEvent::Added(device));
            }
            Ok(())
        },
    ))?;

    let updated_sink = sink.clone();
    let updated = watcher.Updated(&TypedEventHandler::new(
        move |_: Ref<DeviceWatcher>, update: Ref<DeviceInformationUpdate>| {
            if let Some(update) = update.as_ref() {
                let properties = update.Properties()?;
                let _ = updated_sink.send(DiscoveryEvent::Updated {
                    id: update.Id()?.to_string(),
                    connected: lookup::<bool>(&properties, PROP_IS_CONNECTED),
                });
            }
            Ok(())
        },
    ))?;

    let removed_sink = sink.clone();
    let removed = watcher.Removed(&TypedEventHandler::new(
        move |_: Ref<DeviceWatcher>, update: Ref<DeviceInformationUpdate>| {
            if let Some(update) = update.as_ref() {
                let _ = removed_sink.send(DiscoveryEvent::Removed(update.Id()?.to_string()));
            }
            Ok(())
        },
    ))?;

    let completed = watcher.EnumerationCompleted(&TypedEventHandler::new(
        move |_: Ref<DeviceWatcher>, _: Ref<IInspectable>| {
            let _ = sink.send(DiscoveryEvent::EnumerationCompleted(kind));
            Ok(())
        },
    ))?;

    watcher.Start()?;

    Ok(Box::new(WinRtWatchHandle {
        watcher: Some(watcher),
        tokens: [added, updated, removed, completed],
    }))
}

fn discovered(kind: WatchKind, info: &DeviceInformation) -> windows::core::Result<DiscoveredDevice> {
    let properties = info.Properties()?;

    let address = lookup::<HSTRING>(&properties, PROP_DEVICE_ADDRESS)
        .and_then(|s| BluetoothAddress::parse(&s.to_string()).ok())
        .unwrap_or_default();
    let paired = match info.Pairing() {
        Ok(pairing) => pairing.IsPaired().unwrap_or(true),
        Err(_) => lookup::<bool>(&properties, PROP_IS_PAIRED).unwrap_or(true),
    };

    Ok(DiscoveredDevice {
        id: info.Id()?.to_string(),
        name: info.Name()?.to_string(),
        address,
        class_of_device: lookup::<u32>(&properties, PROP_CLASS_OF_DEVICE).unwrap_or(0),
        kind,
        connected: lookup::<bool>(&properties, PROP_IS_CONNECTED).unwrap_or(false),
        paired,
        container_id: lookup::<GUID>(&properties, PROP_CONTAINER_ID)
            .map(|g| from_guid(&g))
            .filter(|g| !g.is_nil()),
        instance_id: None,
    })
}

/// Boxed property value, `None` when absent or of another type.
fn lookup<T>(properties: &IMapView<HSTRING, IInspectable>, key: &str) -> Option<T>
where
    T: windows::core::RuntimeType + 'static,
    IReference<T>: Interface,
{
    let key = HSTRING::from(key);
    if !properties.HasKey(&key).unwrap_or(false) {
        return None;
    }
    properties
        .Lookup(&key)
        .ok()?
        .cast::<IReference<T>>()
        .ok()?
        .Value()
        .ok()
}

struct WinRtWatchHandle {
    watcher: Option<DeviceWatcher>,
    tokens: [i64; 4],
}

impl WatchHandle for WinRtWatchHandle {
    fn stop(&mut self) -> PlatformResult<()> {
        let Some(watcher) = self.watcher.take() else {
            return Ok(());
        };

        let [added, updated, removed, completed] = self.tokens;
        let _ = watcher.RemoveAdded(added);
        let _ = watcher.RemoveUpdated(updated);
        let _ = watcher.RemoveRemoved(removed);
        let _ = watcher.RemoveEnumerationCompleted(completed);

        let status = watcher.Status().map_err(|e| hresult_error("DeviceWatcher.Status", &e))?;
        if status == DeviceWatcherStatus::Started || status == DeviceWatcherStatus::EnumerationCompleted {
            watcher.Stop().map_err(|e| hresult_error("DeviceWatcher.Stop", &e))?;
        }
        debug!("Device watcher stopped");
        Ok(())
    }
}

impl Drop for WinRtWatchHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
