// src/registry/mod.rs

//! Windows registry abstraction
//!
//! All persisted core state lives under `HKLM\Software\Npackd\Npackd`. The
//! `RegistryHive` trait is the seam between the core and the registry
//! primitives: production code on Windows uses `MachineHive`, tests and
//! non-Windows builds use the in-memory `MemoryHive`.
//!
//! Reads can target the 32-bit registry view (`use32`), which matters for
//! the Java detectors on 64-bit hosts. Writes always go to the native view.

#[cfg(windows)]
use crate::error::Error;
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Sub-tree holding one sub-key per installed package version
pub const PACKAGES_KEY: &str = r"Software\Npackd\Npackd\Packages";
/// Sub-tree holding the configured repository URLs
pub const REPS_KEY: &str = r"Software\Npackd\Npackd\Reps";
/// Key holding the search index validity SHA-1
pub const INDEX_KEY: &str = r"Software\Npackd\Npackd\Index";
/// Root of all npackd state
pub const NPACKD_KEY: &str = r"Software\Npackd\Npackd";

/// Access to one registry hive (HKEY_LOCAL_MACHINE in production)
pub trait RegistryHive: Send + Sync {
    fn get_string(&self, path: &str, name: &str, use32: bool) -> Result<Option<String>>;
    fn get_dword(&self, path: &str, name: &str, use32: bool) -> Result<Option<u32>>;

    /// Set a string value, creating the key if necessary
    fn set_string(&self, path: &str, name: &str, value: &str) -> Result<()>;
    /// Set a DWORD value, creating the key if necessary
    fn set_dword(&self, path: &str, name: &str, value: u32) -> Result<()>;

    /// Names of the direct sub-keys of `path`; empty if the key is missing
    fn list_sub_keys(&self, path: &str, use32: bool) -> Result<Vec<String>>;

    /// Remove a key and everything below it
    fn delete_sub_key(&self, path: &str) -> Result<()>;
}

#[derive(Default)]
struct MemoryKey {
    strings: BTreeMap<String, String>,
    dwords: BTreeMap<String, u32>,
}

/// In-memory hive for tests and non-Windows builds
///
/// The 32-bit view is modelled the way Windows stores it: under a
/// `WOW6432Node` sub-key of the first path segment.
#[derive(Default)]
pub struct MemoryHive {
    keys: Mutex<BTreeMap<String, MemoryKey>>,
}

impl MemoryHive {
    pub fn new() -> Self {
        Self::default()
    }

    fn effective_path(path: &str, use32: bool) -> String {
        if !use32 {
            return path.to_string();
        }
        match path.split_once('\\') {
            Some((first, rest)) => format!("{}\\WOW6432Node\\{}", first, rest),
            None => format!("{}\\WOW6432Node", path),
        }
    }
}

impl RegistryHive for MemoryHive {
    fn get_string(&self, path: &str, name: &str, use32: bool) -> Result<Option<String>> {
        let keys = self.keys.lock().unwrap();
        Ok(keys
            .get(&Self::effective_path(path, use32))
            .and_then(|k| k.strings.get(name).cloned()))
    }

    fn get_dword(&self, path: &str, name: &str, use32: bool) -> Result<Option<u32>> {
        let keys = self.keys.lock().unwrap();
        Ok(keys
            .get(&Self::effective_path(path, use32))
            .and_then(|k| k.dwords.get(name).copied()))
    }

    fn set_string(&self, path: &str, name: &str, value: &str) -> Result<()> {
        let mut keys = self.keys.lock().unwrap();
        keys.entry(path.to_string())
            .or_default()
            .strings
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn set_dword(&self, path: &str, name: &str, value: u32) -> Result<()> {
        let mut keys = self.keys.lock().unwrap();
        keys.entry(path.to_string())
            .or_default()
            .dwords
            .insert(name.to_string(), value);
        Ok(())
    }

    fn list_sub_keys(&self, path: &str, use32: bool) -> Result<Vec<String>> {
        let prefix = format!("{}\\", Self::effective_path(path, use32));
        let keys = self.keys.lock().unwrap();
        let mut names: Vec<String> = keys
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('\\') {
                Some((first, _)) => first.to_string(),
                None => rest.to_string(),
            })
            .collect();
        names.dedup();
        Ok(names)
    }

    fn delete_sub_key(&self, path: &str) -> Result<()> {
        let prefix = format!("{}\\", path);
        let mut keys = self.keys.lock().unwrap();
        keys.retain(|k, _| k != path && !k.starts_with(&prefix));
        Ok(())
    }
}

/// HKEY_LOCAL_MACHINE on the running system
#[cfg(windows)]
pub struct MachineHive;

#[cfg(windows)]
impl MachineHive {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &str, use32: bool) -> std::io::Result<winreg::RegKey> {
        use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_32KEY};
        use winreg::RegKey;

        let flags = if use32 { KEY_READ | KEY_WOW64_32KEY } else { KEY_READ };
        RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey_with_flags(path, flags)
    }
}

#[cfg(windows)]
impl RegistryHive for MachineHive {
    fn get_string(&self, path: &str, name: &str, use32: bool) -> Result<Option<String>> {
        match Self::open(path, use32) {
            Ok(key) => match key.get_value::<String, _>(name) {
                Ok(v) => Ok(Some(v)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::RegistryError(e.to_string())),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::RegistryError(e.to_string())),
        }
    }

    fn get_dword(&self, path: &str, name: &str, use32: bool) -> Result<Option<u32>> {
        match Self::open(path, use32) {
            Ok(key) => match key.get_value::<u32, _>(name) {
                Ok(v) => Ok(Some(v)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::RegistryError(e.to_string())),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::RegistryError(e.to_string())),
        }
    }

    fn set_string(&self, path: &str, name: &str, value: &str) -> Result<()> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        let (key, _) = RegKey::predef(HKEY_LOCAL_MACHINE)
            .create_subkey(path)
            .map_err(|e| Error::RegistryError(e.to_string()))?;
        key.set_value(name, &value.to_string())
            .map_err(|e| Error::RegistryError(e.to_string()))
    }

    fn set_dword(&self, path: &str, name: &str, value: u32) -> Result<()> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        let (key, _) = RegKey::predef(HKEY_LOCAL_MACHINE)
            .create_subkey(path)
            .map_err(|e| Error::RegistryError(e.to_string()))?;
        key.set_value(name, &value)
            .map_err(|e| Error::RegistryError(e.to_string()))
    }

    fn list_sub_keys(&self, path: &str, use32: bool) -> Result<Vec<String>> {
        match Self::open(path, use32) {
            Ok(key) => key
                .enum_keys()
                .collect::<std::io::Result<Vec<_>>>()
                .map_err(|e| Error::RegistryError(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::RegistryError(e.to_string())),
        }
    }

    fn delete_sub_key(&self, path: &str) -> Result<()> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        match RegKey::predef(HKEY_LOCAL_MACHINE).delete_subkey_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::RegistryError(e.to_string())),
        }
    }
}
