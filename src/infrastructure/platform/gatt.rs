//! GATT Battery Service access through WinRT.

use super::to_guid;
use crate::domain::models::BluetoothAddress;
use crate::error::{PlatformError, PlatformResult};
use crate::infrastructure::bluetooth::ble_battery::{
    BatterySink, GattBatteryApi, BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use windows::core::{Ref, HSTRING};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, IBuffer};

struct Subscription {
    // Keeps the device connection alive while notifications are enabled.
    _device: BluetoothLEDevice,
    characteristic: GattCharacteristic,
    token: i64,
}

#[derive(Default)]
pub struct WinRtGatt {
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

fn winrt_error(context: &'static str) -> impl Fn(windows::core::Error) -> PlatformError {
    move |e| PlatformError::native(context, e.code().0)
}

fn status_error(context: &str, status: GattCommunicationStatus) -> PlatformError {
    PlatformError::Unavailable(format!("{} returned {:?}", context, status))
}

async fn open_device(device_id: &str, address: BluetoothAddress) -> PlatformResult<BluetoothLEDevice> {
    match BluetoothLEDevice::FromIdAsync(&HSTRING::from(device_id)) {
        Ok(op) => match op.await {
            Ok(device) => return Ok(device),
            Err(e) => debug!("FromIdAsync({}) failed: {}", device_id, e),
        },
        Err(e) => debug!("FromIdAsync({}) failed: {}", device_id, e),
    }

    if address.is_zero() {
        return Err(PlatformError::NotFound(device_id.to_string()));
    }
    BluetoothLEDevice::FromBluetoothAddressAsync(address.as_u64())
        .map_err(winrt_error("FromBluetoothAddressAsync"))?
        .await
        .map_err(winrt_error("FromBluetoothAddressAsync"))
}

async fn battery_characteristic(device: &BluetoothLEDevice) -> PlatformResult<GattCharacteristic> {
    let services = device
        .GetGattServicesForUuidAsync(to_guid(BATTERY_SERVICE_UUID))
        .map_err(winrt_error("GetGattServicesForUuidAsync"))?
        .await
        .map_err(winrt_error("GetGattServicesForUuidAsync"))?;
    let status = services.Status().map_err(winrt_error("Status"))?;
    if status != GattCommunicationStatus::Success {
        return Err(status_error("GetGattServicesForUuidAsync", status));
    }

    let services = services.Services().map_err(winrt_error("Services"))?;
    if services.Size().map_err(winrt_error("Size"))? == 0 {
        return Err(PlatformError::NotFound("battery service".into()));
    }
    let service = services.GetAt(0).map_err(winrt_error("GetAt"))?;

    let characteristics = service
        .GetCharacteristicsForUuidAsync(to_guid(BATTERY_LEVEL_UUID))
        .map_err(winrt_error("GetCharacteristicsForUuidAsync"))?
        .await
        .map_err(winrt_error("GetCharacteristicsForUuidAsync"))?;
    let status = characteristics.Status().map_err(winrt_error("Status"))?;
    if status != GattCommunicationStatus::Success {
        return Err(status_error("GetCharacteristicsForUuidAsync", status));
    }

    let characteristics = characteristics
        .Characteristics()
        .map_err(winrt_error("Characteristics"))?;
    if characteristics.Size().map_err(winrt_error("Size"))? == 0 {
        return Err(PlatformError::NotFound("battery level characteristic".into()));
    }
    characteristics.GetAt(0).map_err(winrt_error("GetAt"))
}

fn first_byte(buffer: &IBuffer) -> windows::core::Result<Option<u8>> {
    if buffer.Length()? == 0 {
        return Ok(None);
    }
    let reader = DataReader::FromBuffer(buffer)?;
    Ok(Some(reader.ReadByte()?))
}

#[async_trait]
impl GattBatteryApi for WinRtGatt {
    async fn read_battery_level(
        &self,
        device_id: &str,
        address: BluetoothAddress,
    ) -> PlatformResult<Option<u8>> {
        let device = open_device(device_id, address).await?;
        let characteristic = battery_characteristic(&device).await?;

        let result = characteristic
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)
            .map_err(winrt_error("ReadValueAsync"))?
            .await
            .map_err(winrt_error("ReadValueAsync"))?;
        let status = result.Status().map_err(winrt_error("Status"))?;
        if status != GattCommunicationStatus::Success {
            return Err(status_error("ReadValueAsync", status));
        }

        let value = result.Value().map_err(winrt_error("Value"))?;
        first_byte(&value).map_err(winrt_error("DataReader"))
    }

    async fn subscribe(
        &self,
        device_id: &str,
        address: BluetoothAddress,
        sink: BatterySink,
    ) -> PlatformResult<()> {
        let device = open_device(device_id, address).await?;
        let characteristic = battery_characteristic(&device).await?;

        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )
            .map_err(winrt_error("WriteClientCharacteristicConfigurationDescriptorAsync"))?
            .await
            .map_err(winrt_error("WriteClientCharacteristicConfigurationDescriptorAsync"))?;
        if status != GattCommunicationStatus::Success {
            return Err(status_error("Enable notifications", status));
        }

        let id = device_id.to_string();
        let token = characteristic
            .ValueChanged(&TypedEventHandler::new(
                move |_: Ref<GattCharacteristic>, args: Ref<GattValueChangedEventArgs>| {
                    if let Some(args) = args.as_ref() {
                        if let Some(level) = first_byte(&args.CharacteristicValue()?)? {
                            let _ = sink.send((id.clone(), level));
                        }
                    }
                    Ok(())
                },
            ))
            .map_err(winrt_error("ValueChanged"))?;

        let previous = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                device_id.to_string(),
                Subscription {
                    _device: device,
                    characteristic,
                    token,
                },
            );
        if let Some(previous) = previous {
            let _ = previous.characteristic.RemoveValueChanged(previous.token);
        }
        Ok(())
    }

    async fn unsubscribe(&self, device_id: &str) -> PlatformResult<()> {
        let Some(subscription) = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device_id)
        else {
            return Ok(());
        };

        subscription
            .characteristic
            .RemoveValueChanged(subscription.token)
            .map_err(winrt_error("RemoveValueChanged"))?;
        subscription
            .characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::None,
            )
            .map_err(winrt_error("WriteClientCharacteristicConfigurationDescriptorAsync"))?
            .await
            .map_err(winrt_error("WriteClientCharacteristicConfigurationDescriptorAsync"))?;
        Ok(())
    }
}
