//! Installation-scoped state shared by every strategy call.
//!
//! The original protocol kept one process-wide device list for the TPM-backed
//! FDE flow. Here the list lives in an explicit session value: the storage
//! pipeline creates one per installation run, threads it through commit hooks,
//! and hands it to the finalizer at the end.

use crate::error::{KeyloomError, KeyloomResult};
use keyloom_device::{EncryptionDevice, Passphrase};
use log::debug;

/// Which flow this session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Fresh installation; devices are accumulated for the finalize step.
    Installation,
    /// Running installed system; the TPM strategy does not accumulate here.
    InstalledSystem,
}

/// Per-run accumulator plus the single shared recovery password.
///
/// States: empty accumulator (idle), devices recorded (accumulating), and back
/// to idle after a successful finalize. A failed finalize leaves the devices
/// in place so the call can be retried.
pub struct InstallSession {
    mode: SessionMode,
    accumulated: Vec<EncryptionDevice>,
    recovery_password: Option<Passphrase>,
}

impl InstallSession {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            accumulated: Vec::new(),
            recovery_password: None,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_installation(&self) -> bool {
        self.mode == SessionMode::Installation
    }

    /// Record a committed device for the finalize step.
    pub fn accumulate(&mut self, device: EncryptionDevice) {
        debug!(
            "session: accumulated {} ({})",
            device.plain.name, device.dm_name
        );
        self.accumulated.push(device);
    }

    pub fn accumulated(&self) -> &[EncryptionDevice] {
        &self.accumulated
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated.is_empty()
    }

    /// Reset to idle. Called only after a fully successful finalize.
    pub fn clear_accumulated(&mut self) {
        self.accumulated.clear();
    }

    /// Accept the shared recovery password.
    ///
    /// Every device in one run must be configured with the same password; the
    /// first one offered wins, offering the same value again is a no-op, and a
    /// different value is a caller bug.
    pub fn adopt_recovery_password(&mut self, password: Passphrase) -> KeyloomResult<()> {
        match &self.recovery_password {
            None => {
                self.recovery_password = Some(password);
                Ok(())
            }
            Some(existing) if *existing == password => Ok(()),
            Some(_) => Err(KeyloomError::Precondition(
                "devices in one installation run must share a single recovery password".into(),
            )),
        }
    }

    pub fn recovery_password(&self) -> Option<&Passphrase> {
        self.recovery_password.as_ref()
    }
}
