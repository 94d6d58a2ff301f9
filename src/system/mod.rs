// src/system/mod.rs

//! Machine state probes used by the detection pipeline
//!
//! Everything the detectors read from the host besides the registry (OS
//! version, bitness, MSI product list, DLL file versions, system
//! environment variables) goes through `SystemProbe`. Tests configure a
//! `MockProbe`; Windows builds use `NativeProbe`.

use crate::error::Result;
use crate::version::Version;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait SystemProbe: Send + Sync {
    /// Major/minor/build of the running OS, if this is Windows
    fn os_version(&self) -> Option<Version>;

    fn is_64_bit(&self) -> bool;

    /// %WINDIR%
    fn windows_dir(&self) -> PathBuf;

    /// Product codes (GUIDs with braces) of all installed MSI products
    fn installed_msi_products(&self) -> Vec<String>;

    /// InstallLocation of an MSI product, if recorded
    fn msi_product_location(&self, guid: &str) -> Option<PathBuf>;

    /// File version of a DLL in the system directory; `None` when the file
    /// is missing or carries no version resource
    fn dll_version(&self, file_name: &str) -> Option<Version>;

    fn get_system_env(&self, name: &str) -> Option<String>;

    /// Set a system-scope environment variable and broadcast the change
    fn set_system_env(&self, name: &str, value: &str) -> Result<()>;
}

/// Configurable probe for tests and non-Windows builds
#[derive(Default)]
pub struct MockProbe {
    pub os_version: Option<Version>,
    pub is_64_bit: bool,
    pub windows_dir: PathBuf,
    pub msi_products: Vec<String>,
    pub msi_locations: HashMap<String, PathBuf>,
    pub dll_versions: HashMap<String, Version>,
    env: Mutex<HashMap<String, String>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SystemProbe for MockProbe {
    fn os_version(&self) -> Option<Version> {
        self.os_version.clone()
    }

    fn is_64_bit(&self) -> bool {
        self.is_64_bit
    }

    fn windows_dir(&self) -> PathBuf {
        self.windows_dir.clone()
    }

    fn installed_msi_products(&self) -> Vec<String> {
        self.msi_products.clone()
    }

    fn msi_product_location(&self, guid: &str) -> Option<PathBuf> {
        self.msi_locations.get(guid).cloned()
    }

    fn dll_version(&self, file_name: &str) -> Option<Version> {
        self.dll_versions.get(file_name).cloned()
    }

    fn get_system_env(&self, name: &str) -> Option<String> {
        self.env.lock().unwrap().get(name).cloned()
    }

    fn set_system_env(&self, name: &str, value: &str) -> Result<()> {
        self.env
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Probe backed by Win32 calls
#[cfg(windows)]
pub struct NativeProbe;

#[cfg(windows)]
impl NativeProbe {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
impl SystemProbe for NativeProbe {
    fn os_version(&self) -> Option<Version> {
        use windows_sys::Win32::System::SystemInformation::{GetVersionExW, OSVERSIONINFOW};

        let mut info: OSVERSIONINFOW = unsafe { std::mem::zeroed() };
        info.dwOSVersionInfoSize = std::mem::size_of::<OSVERSIONINFOW>() as u32;
        let ok = unsafe { GetVersionExW(&mut info) };
        if ok == 0 {
            return None;
        }
        Some(Version::from_parts(&[
            info.dwMajorVersion,
            info.dwMinorVersion,
            info.dwBuildNumber,
        ]))
    }

    fn is_64_bit(&self) -> bool {
        use windows_sys::Win32::System::SystemInformation::{
            GetNativeSystemInfo, PROCESSOR_ARCHITECTURE_INTEL, SYSTEM_INFO,
        };

        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        unsafe { GetNativeSystemInfo(&mut info) };
        unsafe { info.Anonymous.Anonymous.wProcessorArchitecture != PROCESSOR_ARCHITECTURE_INTEL }
    }

    fn windows_dir(&self) -> PathBuf {
        use windows_sys::Win32::System::SystemInformation::GetWindowsDirectoryW;

        let mut buf = [0u16; 260];
        let n = unsafe { GetWindowsDirectoryW(buf.as_mut_ptr(), buf.len() as u32) };
        PathBuf::from(String::from_utf16_lossy(&buf[..n as usize]))
    }

    fn installed_msi_products(&self) -> Vec<String> {
        use windows_sys::Win32::System::ApplicationInstallationAndServicing::MsiEnumProductsW;

        let mut products = Vec::new();
        let mut index = 0u32;
        loop {
            let mut buf = [0u16; 39];
            let r = unsafe { MsiEnumProductsW(index, buf.as_mut_ptr()) };
            if r != 0 {
                break;
            }
            let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
            products.push(String::from_utf16_lossy(&buf[..len]));
            index += 1;
        }
        products
    }

    fn msi_product_location(&self, guid: &str) -> Option<PathBuf> {
        use windows_sys::Win32::System::ApplicationInstallationAndServicing::MsiGetProductInfoW;

        let guid_w: Vec<u16> = guid.encode_utf16().chain(std::iter::once(0)).collect();
        let prop: Vec<u16> = "InstallLocation"
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let mut buf = [0u16; 1024];
        let mut len = buf.len() as u32;
        let r = unsafe {
            MsiGetProductInfoW(
                guid_w.as_ptr(),
                prop.as_ptr(),
                buf.as_mut_ptr(),
                &mut len,
            )
        };
        if r != 0 || len == 0 {
            return None;
        }
        Some(PathBuf::from(String::from_utf16_lossy(&buf[..len as usize])))
    }

    fn dll_version(&self, file_name: &str) -> Option<Version> {
        use windows_sys::Win32::Storage::FileSystem::{
            GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW, VS_FIXEDFILEINFO,
        };

        let path = self.windows_dir().join("System32").join(file_name);
        let path_w: Vec<u16> = path
            .to_string_lossy()
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();

        let mut handle = 0u32;
        let size = unsafe { GetFileVersionInfoSizeW(path_w.as_ptr(), &mut handle) };
        if size == 0 {
            return None;
        }

        let mut data = vec![0u8; size as usize];
        let ok = unsafe {
            GetFileVersionInfoW(path_w.as_ptr(), 0, size, data.as_mut_ptr() as *mut _)
        };
        if ok == 0 {
            return None;
        }

        let root: Vec<u16> = "\\".encode_utf16().chain(std::iter::once(0)).collect();
        let mut info: *mut VS_FIXEDFILEINFO = std::ptr::null_mut();
        let mut info_len = 0u32;
        let ok = unsafe {
            VerQueryValueW(
                data.as_ptr() as *const _,
                root.as_ptr(),
                &mut info as *mut _ as *mut *mut core::ffi::c_void,
                &mut info_len,
            )
        };
        if ok == 0 || info.is_null() {
            return None;
        }

        let info = unsafe { &*info };
        Some(Version::from_parts(&[
            (info.dwFileVersionMS >> 16) & 0xffff,
            info.dwFileVersionMS & 0xffff,
            (info.dwFileVersionLS >> 16) & 0xffff,
            info.dwFileVersionLS & 0xffff,
        ]))
    }

    fn get_system_env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn set_system_env(&self, name: &str, value: &str) -> Result<()> {
        use crate::error::Error;
        use windows_sys::Win32::UI::WindowsAndMessaging::{
            SendMessageTimeoutW, HWND_BROADCAST, SMTO_ABORTIFHUNG, WM_SETTINGCHANGE,
        };
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        let key = RegKey::predef(HKEY_LOCAL_MACHINE)
            .open_subkey_with_flags(
                r"SYSTEM\CurrentControlSet\Control\Session Manager\Environment",
                winreg::enums::KEY_SET_VALUE,
            )
            .map_err(|e| Error::RegistryError(e.to_string()))?;
        key.set_value(name, &value.to_string())
            .map_err(|e| Error::RegistryError(e.to_string()))?;

        let env_w: Vec<u16> = "Environment".encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            SendMessageTimeoutW(
                HWND_BROADCAST,
                WM_SETTINGCHANGE,
                0,
                env_w.as_ptr() as isize,
                SMTO_ABORTIFHUNG,
                5000,
                std::ptr::null_mut(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_probe_env_roundtrip() {
        let probe = MockProbe::new();
        assert_eq!(probe.get_system_env("NPACKD_CL"), None);
        probe.set_system_env("NPACKD_CL", "C:\\npackd\\cl").unwrap();
        assert_eq!(
            probe.get_system_env("NPACKD_CL"),
            Some("C:\\npackd\\cl".to_string())
        );
    }

    #[test]
    fn test_mock_probe_dll_versions() {
        let mut probe = MockProbe::new();
        probe
            .dll_versions
            .insert("msi.dll".to_string(), Version::parse("5.0.7601").unwrap());
        assert_eq!(
            probe.dll_version("msi.dll"),
            Some(Version::parse("5.0.7601").unwrap())
        );
        assert_eq!(probe.dll_version("msxml.dll"), None);
    }
}
