//! Persisted full-disk-encryption configuration.
//!
//! Two logical fields in one sysconfig section: the list of devices covered by
//! TPM-backed FDE and the PBKDF their LUKS2 keyslots use. Values are never
//! cached; every accessor goes back to the store so concurrent edits by the
//! enrollment tooling are always observed.

use crate::error::KeyloomResult;
use crate::sysconfig::ConfigStore;
use keyloom_device::Pbkdf;
use std::sync::Arc;

const DEVICES_KEY: &str = "FDE_DEVS";
const PBKDF_KEY: &str = "FDE_LUKS_PBKDF";

/// Handle to the persisted FDE configuration section.
#[derive(Clone)]
pub struct FdeConfig {
    store: Arc<dyn ConfigStore>,
}

impl FdeConfig {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Device names covered by FDE; absent field reads as empty.
    pub fn devices(&self) -> KeyloomResult<Vec<String>> {
        let raw = self.store.read(DEVICES_KEY)?.unwrap_or_default();
        Ok(raw.split_whitespace().map(str::to_string).collect())
    }

    /// Replace the device list. One field write plus the section commit.
    pub fn set_devices(&self, names: &[String]) -> KeyloomResult<()> {
        self.store.write(DEVICES_KEY, &names.join(" "))?;
        self.store.flush()
    }

    /// Configured PBKDF, when the field is present and recognised.
    pub fn pbkdf(&self) -> KeyloomResult<Option<Pbkdf>> {
        Ok(self
            .store
            .read(PBKDF_KEY)?
            .as_deref()
            .and_then(Pbkdf::parse))
    }

    /// Replace the PBKDF token. One field write plus the section commit.
    pub fn set_pbkdf(&self, pbkdf: Pbkdf) -> KeyloomResult<()> {
        self.store.write(PBKDF_KEY, pbkdf.as_str())?;
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyloomResult;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store that counts flushes so tests can assert the
    /// write-then-commit shape.
    #[derive(Default)]
    struct MemoryStore {
        committed: Mutex<HashMap<String, String>>,
        staged: Mutex<Vec<(String, String)>>,
        flushes: Mutex<u32>,
    }

    impl ConfigStore for MemoryStore {
        fn read(&self, key: &str) -> KeyloomResult<Option<String>> {
            Ok(self.committed.lock().unwrap().get(key).cloned())
        }

        fn write(&self, key: &str, value: &str) -> KeyloomResult<()> {
            self.staged
                .lock()
                .unwrap()
                .push((key.to_string(), value.to_string()));
            Ok(())
        }

        fn flush(&self) -> KeyloomResult<()> {
            *self.flushes.lock().unwrap() += 1;
            let mut committed = self.committed.lock().unwrap();
            for (key, value) in self.staged.lock().unwrap().drain(..) {
                committed.insert(key, value);
            }
            Ok(())
        }
    }

    #[test]
    fn devices_round_trip_through_space_separated_field() {
        let store = Arc::new(MemoryStore::default());
        let config = FdeConfig::new(store.clone());

        assert!(config.devices().unwrap().is_empty());

        let names = vec!["/dev/sda2".to_string(), "/dev/sdb2".to_string()];
        config.set_devices(&names).unwrap();
        assert_eq!(config.devices().unwrap(), names);
        assert_eq!(*store.flushes.lock().unwrap(), 1);
    }

    #[test]
    fn pbkdf_reads_are_uncached() {
        let store = Arc::new(MemoryStore::default());
        let config = FdeConfig::new(store.clone());

        assert_eq!(config.pbkdf().unwrap(), None);

        store
            .committed
            .lock()
            .unwrap()
            .insert(PBKDF_KEY.to_string(), "argon2id".to_string());
        assert_eq!(config.pbkdf().unwrap(), Some(Pbkdf::Argon2id));

        store
            .committed
            .lock()
            .unwrap()
            .insert(PBKDF_KEY.to_string(), "pbkdf2".to_string());
        assert_eq!(config.pbkdf().unwrap(), Some(Pbkdf::Pbkdf2));
    }

    #[test]
    fn unknown_pbkdf_token_reads_as_absent() {
        let store = Arc::new(MemoryStore::default());
        store
            .committed
            .lock()
            .unwrap()
            .insert(PBKDF_KEY.to_string(), "scrypt".to_string());
        let config = FdeConfig::new(store);
        assert_eq!(config.pbkdf().unwrap(), None);
    }
}
