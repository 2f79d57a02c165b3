use crate::error::{PlatformError, PlatformResult};
use crate::infrastructure::audio::codec::RegistryReader;
use std::ffi::c_void;
use windows::core::HSTRING;
use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND, ERROR_SUCCESS};
use windows::Win32::System::Registry::{RegGetValueW, HKEY_LOCAL_MACHINE, RRF_RT_REG_DWORD};

/// Reads from `HKEY_LOCAL_MACHINE`.
pub struct Win32Registry;

impl RegistryReader for Win32Registry {
    fn read_dword(&self, path: &str, value: &str) -> PlatformResult<Option<u32>> {
        let mut data = 0u32;
        let mut size = std::mem::size_of::<u32>() as u32;

        let status = unsafe {
            RegGetValueW(
                HKEY_LOCAL_MACHINE,
                &HSTRING::from(path),
                &HSTRING::from(value),
                RRF_RT_REG_DWORD,
                None,
                Some(&mut data as *mut u32 as *mut c_void),
                Some(&mut size),
            )
        };

        match status {
            ERROR_SUCCESS => Ok(Some(data)),
            ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => Ok(None),
            other => Err(PlatformError::native("RegGetValueW", other.0 as i32)),
        }
    }
}
