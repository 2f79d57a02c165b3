//! PnP configuration manager and SetupAPI device-class enumeration.

use super::{hresult_error, to_guid};
use crate::error::{PlatformError, PlatformResult};
use crate::infrastructure::bluetooth::classic_battery::{
    ClassDevice, DevNode, DeviceNodeApi, LocateMode,
};
use crate::infrastructure::native::{PropertyKey, PropertyValue};
use uuid::Uuid;
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    CM_Get_Child, CM_Get_DevNode_PropertyW, CM_Get_Sibling, CM_Locate_DevNodeW,
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInfo, SetupDiGetClassDevsW,
    SetupDiGetDeviceInstanceIdW, CM_LOCATE_DEVNODE_NORMAL, CM_LOCATE_DEVNODE_PHANTOM, CONFIGRET,
    CR_BUFFER_SMALL, CR_NO_SUCH_DEVNODE, CR_NO_SUCH_VALUE, CR_SUCCESS, DIGCF_PRESENT, HDEVINFO,
    SP_DEVINFO_DATA,
};
use windows::Win32::Devices::Properties::{
    DEVPROPTYPE, DEVPROP_TYPE_BYTE, DEVPROP_TYPE_STRING, DEVPROP_TYPE_UINT32, DEVPROP_TYPE_UINT64,
};
use windows::Win32::Foundation::DEVPROPKEY;

pub struct CfgMgrDeviceNodes;

fn check(context: &'static str, status: CONFIGRET) -> PlatformResult<()> {
    if status == CR_SUCCESS {
        Ok(())
    } else {
        Err(PlatformError::native(context, status.0 as i32))
    }
}

impl DeviceNodeApi for CfgMgrDeviceNodes {
    fn locate(&self, instance_id: &str, mode: LocateMode) -> PlatformResult<DevNode> {
        let flags = match mode {
            LocateMode::Normal => CM_LOCATE_DEVNODE_NORMAL,
            LocateMode::Phantom => CM_LOCATE_DEVNODE_PHANTOM,
        };
        let mut node = 0u32;
        let status = unsafe { CM_Locate_DevNodeW(&mut node, &HSTRING::from(instance_id), flags) };
        check("CM_Locate_DevNodeW", status)?;
        Ok(DevNode(node))
    }

    fn property(&self, node: DevNode, key: &PropertyKey) -> PlatformResult<Option<PropertyValue>> {
        let devkey = DEVPROPKEY {
            fmtid: to_guid(key.fmtid),
            pid: key.pid,
        };
        let mut prop_type = DEVPROPTYPE::default();
        let mut size = 0u32;

        let status = unsafe {
            CM_Get_DevNode_PropertyW(node.0, &devkey, &mut prop_type, None, &mut size, 0)
        };
        match status {
            CR_BUFFER_SMALL => {}
            CR_NO_SUCH_VALUE | CR_NO_SUCH_DEVNODE => return Ok(None),
            CR_SUCCESS => return Ok(None),
            other => return Err(PlatformError::native("CM_Get_DevNode_PropertyW", other.0 as i32)),
        }

        let mut buffer = vec![0u8; size as usize];
        let status = unsafe {
            CM_Get_DevNode_PropertyW(
                node.0,
                &devkey,
                &mut prop_type,
                Some(buffer.as_mut_ptr()),
                &mut size,
                0,
            )
        };
        check("CM_Get_DevNode_PropertyW", status)?;
        buffer.truncate(size as usize);

        Ok(decode(prop_type, buffer))
    }

    fn first_child(&self, node: DevNode) -> PlatformResult<Option<DevNode>> {
        let mut child = 0u32;
        relative(unsafe { CM_Get_Child(&mut child, node.0, 0) }, "CM_Get_Child", child)
    }

    fn next_sibling(&self, node: DevNode) -> PlatformResult<Option<DevNode>> {
        let mut sibling = 0u32;
        relative(unsafe { CM_Get_Sibling(&mut sibling, node.0, 0) }, "CM_Get_Sibling", sibling)
    }

    fn present_devices(&self, class: Uuid) -> PlatformResult<Vec<ClassDevice>> {
        let guid = to_guid(class);
        let set = unsafe { SetupDiGetClassDevsW(Some(&guid), PCWSTR::null(), None, DIGCF_PRESENT) }
            .map_err(|e| hresult_error("SetupDiGetClassDevsW", &e))?;
        let set = DeviceInfoList(set);

        let mut devices = Vec::new();
        let mut index = 0u32;
        loop {
            let mut data = SP_DEVINFO_DATA {
                cbSize: std::mem::size_of::<SP_DEVINFO_DATA>() as u32,
                ..Default::default()
            };
            // Fails with ERROR_NO_MORE_ITEMS past the last device.
            if unsafe { SetupDiEnumDeviceInfo(set.0, index, &mut data) }.is_err() {
                break;
            }
            index += 1;

            let mut buffer = [0u16; 512];
            let mut required = 0u32;
            if unsafe {
                SetupDiGetDeviceInstanceIdW(set.0, &data, Some(&mut buffer), Some(&mut required))
            }
            .is_err()
            {
                continue;
            }

            devices.push(ClassDevice {
                instance_id: wide_to_string(&buffer),
                node: DevNode(data.DevInst),
            });
        }

        Ok(devices)
    }
}

fn relative(status: CONFIGRET, context: &'static str, node: u32) -> PlatformResult<Option<DevNode>> {
    match status {
        CR_SUCCESS => Ok(Some(DevNode(node))),
        CR_NO_SUCH_DEVNODE => Ok(None),
        other => Err(PlatformError::native(context, other.0 as i32)),
    }
}

fn decode(prop_type: DEVPROPTYPE, buffer: Vec<u8>) -> Option<PropertyValue> {
    if buffer.is_empty() {
        return None;
    }
    let value = match prop_type {
        DEVPROP_TYPE_BYTE => PropertyValue::Byte(buffer[0]),
        DEVPROP_TYPE_UINT32 => {
            PropertyValue::U32(u32::from_le_bytes(buffer.get(..4)?.try_into().ok()?))
        }
        DEVPROP_TYPE_UINT64 => {
            PropertyValue::U64(u64::from_le_bytes(buffer.get(..8)?.try_into().ok()?))
        }
        DEVPROP_TYPE_STRING => {
            let wide: Vec<u16> = buffer
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            PropertyValue::Str(wide_to_string(&wide))
        }
        _ => PropertyValue::Bytes(buffer),
    };
    Some(value)
}

fn wide_to_string(wide: &[u16]) -> String {
    let end = wide.iter().position(|c| *c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end])
}

/// Device information set, destroyed on drop.
struct DeviceInfoList(HDEVINFO);

impl Drop for DeviceInfoList {
    fn drop(&mut self) {
        let _ = unsafe { SetupDiDestroyDeviceInfoList(self.0) };
    }
}
