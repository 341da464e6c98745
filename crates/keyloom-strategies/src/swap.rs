//! Swap strategies with volatile keys.
//!
//! The key never exists on disk: it is read at every activation from a
//! randomness source or from a kernel-exposed hardware key node, so the swap
//! content is unrecoverable after shutdown.

use crate::strategy::{base_device, CreateParams, EncryptionStrategy};
use keyloom_core::error::KeyloomResult;
use keyloom_device::{BlockDevice, EncryptionDevice, EncryptionMethod};
use std::path::PathBuf;

const SWAP_OPTION: &str = "swap";

const RANDOM_KEY_FILE: &str = "/dev/urandom";
const PROTECTED_KEY_FILE: &str = "/sys/devices/virtual/misc/pkey/protkey/protkey_aes_256_xts";
const SECURE_KEY_FILE: &str = "/sys/devices/virtual/misc/pkey/ccadata/ccadata_aes_256_xts";

const PAES_CIPHER: &str = "paes-xts-plain64";
const PAES_KEY_BITS: u32 = 1024;
const PAES_SECTOR_SIZE: u32 = 4096;

/// Swap over an ephemeral cipher key, with hardware-backed variants.
pub struct VolatileSwap {
    method: EncryptionMethod,
    key_file: &'static str,
    cipher: Option<&'static str>,
    key_size_bits: Option<u32>,
    sector_size: Option<u32>,
}

impl VolatileSwap {
    /// Ephemeral key from the kernel randomness source.
    pub fn random_swap() -> Self {
        Self {
            method: EncryptionMethod::RandomSwap,
            key_file: RANDOM_KEY_FILE,
            cipher: None,
            key_size_bits: None,
            sector_size: None,
        }
    }

    /// Protected AES key node exposed by the pkey driver.
    pub fn protected_swap() -> Self {
        Self {
            method: EncryptionMethod::ProtectedSwap,
            key_file: PROTECTED_KEY_FILE,
            cipher: Some(PAES_CIPHER),
            key_size_bits: Some(PAES_KEY_BITS),
            sector_size: Some(PAES_SECTOR_SIZE),
        }
    }

    /// CCA secure AES key node exposed by the pkey driver.
    pub fn secure_swap() -> Self {
        Self {
            method: EncryptionMethod::SecureSwap,
            key_file: SECURE_KEY_FILE,
            cipher: Some(PAES_CIPHER),
            key_size_bits: Some(PAES_KEY_BITS),
            sector_size: Some(PAES_SECTOR_SIZE),
        }
    }

    /// Option entries shared by the persistent record and the activation
    /// call: the swap marker plus whichever cipher facts are configured.
    fn option_list(&self) -> Vec<String> {
        [
            Some(SWAP_OPTION.to_string()),
            self.cipher.map(|cipher| format!("cipher={cipher}")),
            self.key_size_bits.map(|bits| format!("size={bits}")),
            self.sector_size.map(|bytes| format!("sector-size={bytes}")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

impl EncryptionStrategy for VolatileSwap {
    fn method(&self) -> EncryptionMethod {
        self.method
    }

    /// A pre-existing device belongs to the swap family exactly when its
    /// crypt options carry the swap marker, whatever its spelling.
    fn applies_to(&self, existing: &EncryptionDevice) -> bool {
        existing.has_crypt_option(SWAP_OPTION)
    }

    fn create_device(
        &mut self,
        plain: &BlockDevice,
        dm_name: &str,
        params: CreateParams,
    ) -> KeyloomResult<EncryptionDevice> {
        let mut device = base_device(plain, dm_name, self.method, &params)?;
        device.key_file = Some(PathBuf::from(self.key_file));

        let mut crypt_options = self.option_list();
        crypt_options.append(&mut device.crypt_options);
        device.crypt_options = crypt_options;
        device.open_options = self.option_list();

        Ok(device)
    }
}
