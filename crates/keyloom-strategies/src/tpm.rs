//! TPM-backed full-disk encryption.
//!
//! Two phases: every device configured with [`TpmFde`] is recorded in the
//! installation session after its commit, and [`TpmEnrollment::finalize`]
//! runs the enrollment protocol exactly once at the end of the run. A failed
//! finalize keeps the session intact so the call can be retried.

use crate::strategy::{base_device, CreateParams, EncryptionStrategy, StrategyEnv};
use keyloom_core::cmd::CommandRunner;
use keyloom_core::error::{KeyloomError, KeyloomResult};
use keyloom_core::{FdeConfig, InstallSession, KeyloomConfig, Readiness};
use keyloom_device::{BlockDevice, EncryptionDevice, EncryptionMethod, Passphrase};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Placeholder key file recorded on every FDE device. It only starts to
/// exist once the enrollment service has run on first boot, which is why the
/// commit pipeline must not try to use it.
pub const VIRTUAL_KEY_FILE: &str = "/.virtual-root.keyfile";

/// Keeps the device attachable from the initrd, where the TPM unseal runs.
pub const INITRD_ATTACH_OPTION: &str = "x-initrd.attach";

/// Execution wrapper for the FDE enrollment tool.
///
/// The recovery password travels over stdin, newline-terminated, so it never
/// shows up in process listings or in the command log.
#[derive(Clone)]
pub struct FdectlCommand {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
}

impl FdectlCommand {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: PathBuf) -> Self {
        Self { runner, binary }
    }

    pub fn from_config(config: &KeyloomConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, config.fdectl_binary())
    }

    /// Whether a usable TPM is present on this host.
    pub fn tpm_present(&self) -> Readiness {
        match self.runner.run(&self.binary, &["tpm-present"], None) {
            Ok(output) if output.success() => Readiness::Ready,
            Ok(output) => {
                info!(
                    "TPM probe exited with status {}: {}",
                    output.status,
                    output.diagnostic()
                );
                Readiness::Unavailable
            }
            Err(err) => {
                info!("TPM probe could not run: {err}");
                Readiness::Unavailable
            }
        }
    }

    pub fn add_secondary_password(&self, password: &Passphrase) -> Result<(), String> {
        self.enroll_step("add-secondary-password", password)
    }

    pub fn add_secondary_key(&self, password: &Passphrase) -> Result<(), String> {
        self.enroll_step("add-secondary-key", password)
    }

    fn enroll_step(&self, subcommand: &str, password: &Passphrase) -> Result<(), String> {
        let mut payload = Zeroizing::new(Vec::new());
        payload.extend_from_slice(password.expose().as_bytes());
        payload.push(b'\n');

        match self.runner.run(&self.binary, &[subcommand], Some(&payload)) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(format!(
                "`{subcommand}` exited with status {}: {}",
                output.status,
                output.diagnostic()
            )),
            Err(err) => Err(format!("`{subcommand}` could not run: {err}")),
        }
    }
}

/// Phase 1: configure devices and record them for the finalize step.
pub struct TpmFde {
    fdectl: FdectlCommand,
    fde: FdeConfig,
}

impl TpmFde {
    pub fn new(env: &StrategyEnv) -> Self {
        Self {
            fdectl: FdectlCommand::from_config(&env.config, env.runner.clone()),
            fde: env.fde.clone(),
        }
    }
}

impl EncryptionStrategy for TpmFde {
    fn method(&self) -> EncryptionMethod {
        EncryptionMethod::TpmFde
    }

    fn availability(&self) -> Readiness {
        self.fdectl.tpm_present()
    }

    fn create_device(
        &mut self,
        plain: &BlockDevice,
        dm_name: &str,
        params: CreateParams,
    ) -> KeyloomResult<EncryptionDevice> {
        let mut device = base_device(plain, dm_name, EncryptionMethod::TpmFde, &params)?;
        device.label = params.label;
        device.add_crypt_option_once(INITRD_ATTACH_OPTION);
        device.key_file = Some(PathBuf::from(VIRTUAL_KEY_FILE));
        device.key_file_active = false;
        // Read through to the persisted configuration on every call; the
        // enrollment tooling may change it between devices.
        device.pbkdf = self.fde.pbkdf()?;
        Ok(device)
    }

    fn post_commit(
        &mut self,
        device: &EncryptionDevice,
        session: &mut InstallSession,
    ) -> KeyloomResult<()> {
        if !session.is_installation() {
            debug!(
                "not an installation run; {} is not recorded for enrollment",
                device.plain.name
            );
            return Ok(());
        }

        if let Some(password) = &device.password {
            session.adopt_recovery_password(password.clone())?;
        }
        session.accumulate(device.clone());
        Ok(())
    }
}

/// Step of the finalize protocol that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStep {
    /// Writing or verifying the persisted device list.
    DeviceList,
    SecondaryPassword,
    SecondaryKey,
    EnrollmentService,
}

/// Result of one finalize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Nothing accumulated; the call was a no-op.
    NothingToDo,
    /// All enrollment steps ran; the session is idle again.
    Completed,
    /// A step failed; the session keeps its devices for a retry.
    Failed { step: FinalizeStep, detail: String },
}

/// Phase 2: drain the session and run the enrollment protocol once.
pub struct TpmEnrollment {
    fdectl: FdectlCommand,
    fde: FdeConfig,
    runner: Arc<dyn CommandRunner>,
    systemctl: PathBuf,
    service: String,
}

impl TpmEnrollment {
    pub fn new(env: &StrategyEnv) -> Self {
        Self {
            fdectl: FdectlCommand::from_config(&env.config, env.runner.clone()),
            fde: env.fde.clone(),
            runner: env.runner.clone(),
            systemctl: env.config.systemctl_binary(),
            service: env.config.fde.enroll_service.clone(),
        }
    }

    /// Run the enrollment protocol over every accumulated device.
    ///
    /// Steps are short-circuited: a failure stops the sequence and leaves the
    /// session accumulating so a later call can retry. Only full success
    /// clears it, making a second call a no-op.
    pub fn finalize(&self, session: &mut InstallSession) -> KeyloomResult<FinalizeOutcome> {
        if session.is_empty() {
            debug!("no devices accumulated; nothing to finalize");
            return Ok(FinalizeOutcome::NothingToDo);
        }

        let mut names: Vec<String> = session
            .accumulated()
            .iter()
            .map(|device| device.plain.preferred_name().to_string())
            .collect();
        names.sort();

        self.fde.set_devices(&names)?;
        let readback = self.fde.devices()?;
        if readback != names {
            warn!(
                "persisted device list does not match what was written \
                 (wrote {names:?}, read {readback:?}); aborting enrollment"
            );
            return Ok(FinalizeOutcome::Failed {
                step: FinalizeStep::DeviceList,
                detail: "device list verification failed".into(),
            });
        }

        let password = session
            .recovery_password()
            .cloned()
            .ok_or_else(|| {
                KeyloomError::Precondition(
                    "accumulated devices carry no recovery password".into(),
                )
            })?;

        if let Err(detail) = self.fdectl.add_secondary_password(&password) {
            warn!("enrollment aborted: {detail}");
            return Ok(FinalizeOutcome::Failed {
                step: FinalizeStep::SecondaryPassword,
                detail,
            });
        }
        if let Err(detail) = self.fdectl.add_secondary_key(&password) {
            warn!("enrollment aborted: {detail}");
            return Ok(FinalizeOutcome::Failed {
                step: FinalizeStep::SecondaryKey,
                detail,
            });
        }
        if let Err(detail) = self.enable_enrollment_service() {
            warn!("enrollment aborted: {detail}");
            return Ok(FinalizeOutcome::Failed {
                step: FinalizeStep::EnrollmentService,
                detail,
            });
        }

        info!(
            "TPM enrollment prepared for {} device(s): {}",
            names.len(),
            names.join(" ")
        );
        session.clear_accumulated();
        Ok(FinalizeOutcome::Completed)
    }

    fn enable_enrollment_service(&self) -> Result<(), String> {
        match self
            .runner
            .run(&self.systemctl, &["enable", &self.service], None)
        {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(format!(
                "enabling {} exited with status {}: {}",
                self.service,
                output.status,
                output.diagnostic()
            )),
            Err(err) => Err(format!("enabling {} could not run: {err}", self.service)),
        }
    }
}
