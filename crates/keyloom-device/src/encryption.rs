//! Encryption-layer snapshot types.
//!
//! An [`EncryptionDevice`] is configured by a strategy but not yet committed to
//! disk; the commit pipeline drives the strategy's pre/post hooks around it.

use crate::blockdev::BlockDevice;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Identifier of the encryption strategy that configured a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionMethod {
    /// Plain LUKS version 1.
    Luks1,
    /// Plain LUKS version 2.
    Luks2,
    /// Swap with an ephemeral key read from the kernel randomness source.
    RandomSwap,
    /// Swap keyed by a hardware-derived protected AES key.
    ProtectedSwap,
    /// Swap keyed by a CCA secure AES key.
    SecureSwap,
    /// LUKS2 with a systemd-enrolled authentication token (TPM2/FIDO2).
    SystemdFde,
    /// LUKS2 backed by a secure key on a crypto coprocessor.
    PervasiveLuks2,
    /// LUKS2 enrolled into TPM-backed full-disk encryption at end of install.
    TpmFde,
}

impl EncryptionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Luks1 => "luks1",
            Self::Luks2 => "luks2",
            Self::RandomSwap => "random_swap",
            Self::ProtectedSwap => "protected_swap",
            Self::SecureSwap => "secure_swap",
            Self::SystemdFde => "systemd_fde",
            Self::PervasiveLuks2 => "pervasive_luks2",
            Self::TpmFde => "tpm_fde",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "luks1" => Some(Self::Luks1),
            "luks2" => Some(Self::Luks2),
            "random_swap" => Some(Self::RandomSwap),
            "protected_swap" => Some(Self::ProtectedSwap),
            "secure_swap" => Some(Self::SecureSwap),
            "systemd_fde" => Some(Self::SystemdFde),
            "pervasive_luks2" => Some(Self::PervasiveLuks2),
            "tpm_fde" => Some(Self::TpmFde),
            _ => None,
        }
    }

    /// All known methods, in strategy-selection order.
    pub fn all() -> &'static [EncryptionMethod] {
        &[
            Self::Luks1,
            Self::Luks2,
            Self::RandomSwap,
            Self::ProtectedSwap,
            Self::SecureSwap,
            Self::SystemdFde,
            Self::PervasiveLuks2,
            Self::TpmFde,
        ]
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Password-based key derivation function for LUKS2 keyslots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pbkdf {
    Pbkdf2,
    Argon2i,
    Argon2id,
}

impl Pbkdf {
    /// Lower-case token as used by cryptsetup and the persisted FDE config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pbkdf2 => "pbkdf2",
            Self::Argon2i => "argon2i",
            Self::Argon2id => "argon2id",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pbkdf2" => Some(Self::Pbkdf2),
            "argon2i" => Some(Self::Argon2i),
            "argon2id" => Some(Self::Argon2id),
            _ => None,
        }
    }
}

impl fmt::Display for Pbkdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External authentication descriptor for systemd-style enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthToken {
    Password,
    Tpm2,
    Fido2,
}

impl AuthToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Tpm2 => "tpm2",
            Self::Fido2 => "fido2",
        }
    }
}

/// LUKS passphrase held in zeroized memory.
///
/// Debug output never shows the contents.
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

impl PartialEq for Passphrase {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl Eq for Passphrase {}

/// An encryption layer configured over a plain device, not yet on disk.
#[derive(Debug, Clone)]
pub struct EncryptionDevice {
    /// The device being encrypted.
    pub plain: BlockDevice,

    /// Device-mapper name the layer exposes once activated.
    pub dm_name: String,

    /// Strategy that configured this device.
    pub method: EncryptionMethod,

    /// Key file used instead of a passphrase, when set.
    pub key_file: Option<PathBuf>,

    /// Whether the key file participates in the on-disk commit. The TPM
    /// strategy records a virtual key file that only becomes meaningful after
    /// the finalize phase, so it disables this.
    pub key_file_active: bool,

    pub label: Option<String>,
    pub pbkdf: Option<Pbkdf>,
    pub auth: Option<AuthToken>,
    pub password: Option<Passphrase>,

    /// Options recorded in the persistent device entry.
    pub crypt_options: Vec<String>,

    /// Options applied when the mapping is activated.
    pub open_options: Vec<String>,
}

impl EncryptionDevice {
    pub fn new(plain: BlockDevice, dm_name: impl Into<String>, method: EncryptionMethod) -> Self {
        Self {
            plain,
            dm_name: dm_name.into(),
            method,
            key_file: None,
            key_file_active: true,
            label: None,
            pbkdf: None,
            auth: None,
            password: None,
            crypt_options: Vec::new(),
            open_options: Vec::new(),
        }
    }

    /// Case-insensitive crypt-option lookup.
    pub fn has_crypt_option(&self, option: &str) -> bool {
        self.crypt_options
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(option))
    }

    /// Append `option` unless an equivalent entry is already present.
    pub fn add_crypt_option_once(&mut self, option: &str) {
        if !self.has_crypt_option(option) {
            self.crypt_options.push(option.to_string());
        }
    }
}
