//! Core Audio endpoint topology and the kernel-streaming control interface.

use super::{from_guid, hresult_error, to_guid, MtaGuard};
use crate::error::{PlatformError, PlatformResult};
use crate::infrastructure::audio::topology::{AudioTopology, EndpointNode, KsControl, KsProperty};
use crate::infrastructure::native::{
    PropertyKey, PropertyValue, PKEY_AUDIO_ENDPOINT_CODEC, PKEY_DEVICE_CONTAINER_ID,
};
use std::ffi::c_void;
use std::sync::Arc;
use windows::core::{Interface, HSTRING, PWSTR};
use windows::Win32::Foundation::PROPERTYKEY;
use windows::Win32::Media::Audio::{
    eAll, IDeviceTopology, IMMDevice, IMMDeviceEnumerator, IPart, MMDeviceEnumerator,
    DEVICE_STATEMASK_ALL, DEVICE_STATE_ACTIVE,
};
use windows::Win32::Media::KernelStreaming::{
    IKsControl, KSIDENTIFIER, KSIDENTIFIER_0, KSIDENTIFIER_0_0,
};
use windows::Win32::System::Com::StructuredStorage::{
    PropVariantToGUID, PropVariantToStringAlloc, PropVariantToUInt32,
};
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL, STGM_READ};
use windows::Win32::UI::Shell::PropertiesSystem::IPropertyStore;

pub struct CoreAudioTopology {
    _mta: Option<Arc<MtaGuard>>,
}

impl CoreAudioTopology {
    pub fn new(mta: Option<Arc<MtaGuard>>) -> Self {
        Self { _mta: mta }
    }

    fn enumerator() -> PlatformResult<IMMDeviceEnumerator> {
        unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(|e| hresult_error("CoCreateInstance(MMDeviceEnumerator)", &e))
    }
}

impl AudioTopology for CoreAudioTopology {
    fn endpoints(&self) -> PlatformResult<Vec<Box<dyn EndpointNode>>> {
        let enumerator = Self::enumerator()?;
        let collection = unsafe { enumerator.EnumAudioEndpoints(eAll, DEVICE_STATEMASK_ALL) }
            .map_err(|e| hresult_error("EnumAudioEndpoints", &e))?;
        let count =
            unsafe { collection.GetCount() }.map_err(|e| hresult_error("GetCount", &e))?;

        let mut nodes: Vec<Box<dyn EndpointNode>> = Vec::with_capacity(count as usize);
        for index in 0..count {
            match unsafe { collection.Item(index) } {
                Ok(device) => nodes.push(Box::new(CoreAudioEndpoint { device })),
                Err(e) => tracing::debug!("Endpoint #{} unavailable: {}", index, e),
            }
        }
        Ok(nodes)
    }

    fn activate_control(&self, device_id: &str) -> PlatformResult<Arc<dyn KsControl>> {
        let enumerator = Self::enumerator()?;
        let device = unsafe { enumerator.GetDevice(&HSTRING::from(device_id)) }
            .map_err(|e| hresult_error("GetDevice", &e))?;
        let control: IKsControl = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| hresult_error("Activate(IKsControl)", &e))?;
        Ok(Arc::new(WinKsControl(control)))
    }
}

struct CoreAudioEndpoint {
    device: IMMDevice,
}

impl CoreAudioEndpoint {
    fn topology(&self) -> PlatformResult<IDeviceTopology> {
        unsafe { self.device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| hresult_error("Activate(IDeviceTopology)", &e))
    }

    fn store(&self) -> PlatformResult<IPropertyStore> {
        unsafe { self.device.OpenPropertyStore(STGM_READ) }
            .map_err(|e| hresult_error("OpenPropertyStore", &e))
    }
}

impl EndpointNode for CoreAudioEndpoint {
    fn id(&self) -> PlatformResult<String> {
        let id = unsafe { self.device.GetId() }.map_err(|e| hresult_error("GetId", &e))?;
        CoTaskString(id).to_string()
    }

    fn is_active(&self) -> PlatformResult<bool> {
        let state = unsafe { self.device.GetState() }.map_err(|e| hresult_error("GetState", &e))?;
        Ok(state == DEVICE_STATE_ACTIVE)
    }

    fn connector_count(&self) -> PlatformResult<u32> {
        let topology = self.topology()?;
        unsafe { topology.GetConnectorCount() }.map_err(|e| hresult_error("GetConnectorCount", &e))
    }

    fn connected_device_id(&self, index: u32) -> PlatformResult<Option<String>> {
        let topology = self.topology()?;
        let connector = unsafe { topology.GetConnector(index) }
            .map_err(|e| hresult_error("GetConnector", &e))?;

        let connected = unsafe { connector.IsConnected() }
            .map_err(|e| hresult_error("IsConnected", &e))?;
        if !connected.as_bool() {
            return Ok(None);
        }

        let far = unsafe { connector.GetConnectedTo() }
            .map_err(|e| hresult_error("GetConnectedTo", &e))?;
        let part: IPart = far.cast().map_err(|e| hresult_error("QueryInterface(IPart)", &e))?;
        let device_topology = unsafe { part.GetTopologyObject() }
            .map_err(|e| hresult_error("GetTopologyObject", &e))?;
        let id = unsafe { device_topology.GetDeviceId() }
            .map_err(|e| hresult_error("GetDeviceId", &e))?;

        CoTaskString(id).to_string().map(Some)
    }

    fn property(&self, key: &PropertyKey) -> PlatformResult<Option<PropertyValue>> {
        let store = self.store()?;
        let pkey = PROPERTYKEY {
            fmtid: to_guid(key.fmtid),
            pid: key.pid,
        };
        let value = unsafe { store.GetValue(&pkey) }.map_err(|e| hresult_error("GetValue", &e))?;

        // An absent value is VT_EMPTY, which every conversion below rejects.
        let typed = if *key == PKEY_DEVICE_CONTAINER_ID {
            unsafe { PropVariantToGUID(&value) }
                .ok()
                .map(|guid| PropertyValue::Guid(from_guid(&guid)))
        } else if *key == PKEY_AUDIO_ENDPOINT_CODEC {
            unsafe { PropVariantToUInt32(&value) }.ok().map(PropertyValue::U32)
        } else {
            unsafe { PropVariantToStringAlloc(&value) }
                .ok()
                .and_then(|s| CoTaskString(s).to_string().ok())
                .filter(|s| !s.is_empty())
                .map(PropertyValue::Str)
        };
        Ok(typed)
    }
}

/// Kernel-streaming control on a Bluetooth audio device node.
struct WinKsControl(IKsControl);

// Activated in the process MTA, callable from any thread.
unsafe impl Send for WinKsControl {}
unsafe impl Sync for WinKsControl {}

impl KsControl for WinKsControl {
    fn property(&self, property: &KsProperty) -> PlatformResult<()> {
        let identifier = KSIDENTIFIER {
            Anonymous: KSIDENTIFIER_0 {
                Anonymous: KSIDENTIFIER_0_0 {
                    Set: to_guid(property.set),
                    Id: property.id,
                    Flags: property.flags,
                },
            },
        };
        let mut returned = 0u32;
        unsafe {
            self.0.KsProperty(
                &identifier,
                std::mem::size_of::<KSIDENTIFIER>() as u32,
                std::ptr::null_mut(),
                0,
                &mut returned,
            )
        }
        .map_err(|e| hresult_error("KsProperty", &e))
    }
}

/// String allocated by COM, freed on drop.
struct CoTaskString(PWSTR);

impl CoTaskString {
    fn to_string(&self) -> PlatformResult<String> {
        if self.0.is_null() {
            return Err(PlatformError::NotFound("null string".into()));
        }
        unsafe { self.0.to_string() }
            .map_err(|_| PlatformError::Unavailable("invalid UTF-16 string".into()))
    }
}

impl Drop for CoTaskString {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CoTaskMemFree(Some(self.0.as_ptr() as *const c_void)) };
        }
    }
}
