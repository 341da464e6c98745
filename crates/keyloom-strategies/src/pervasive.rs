//! Pervasive LUKS2 backed by secure keys on crypto coprocessors.

use crate::strategy::{base_device, CreateParams, EncryptionStrategy};
use keyloom_core::cmd::CommandRunner;
use keyloom_core::error::KeyloomResult;
use keyloom_core::{InstallSession, Readiness};
use keyloom_device::{BlockDevice, EncryptionDevice, EncryptionMethod};
use keyloom_securekey::adapter;
use keyloom_securekey::{SecureKey, VolumeAssociation, ZkeyCommand};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::strategy::StrategyEnv;

/// Secure keys are generated for a 4096-byte sector size; the mapping has to
/// be opened with the same value.
const SECTOR_SIZE_OPTION: &str = "sector-size=4096";

/// LUKS2 whose volume key is a CCA secure key that never leaves the
/// coprocessor in the clear.
pub struct PervasiveLuks2 {
    runner: Arc<dyn CommandRunner>,
    lszcrypt: PathBuf,
    zkey_cryptsetup: PathBuf,
    zkey: ZkeyCommand,
    /// Key acquired while configuring the device; working state only.
    secure_key: Option<SecureKey>,
    /// Conversion commands collected at pre-commit, run at post-commit.
    commit_commands: Vec<String>,
}

impl PervasiveLuks2 {
    pub fn new(env: &StrategyEnv) -> Self {
        Self {
            runner: env.runner.clone(),
            lszcrypt: env.config.lszcrypt_binary(),
            zkey_cryptsetup: env.config.zkey_cryptsetup_binary(),
            zkey: ZkeyCommand::from_config(&env.config, env.runner.clone()),
            secure_key: None,
            commit_commands: Vec::new(),
        }
    }

    pub fn secure_key(&self) -> Option<&SecureKey> {
        self.secure_key.as_ref()
    }

    /// Run one conversion command line. The `setvp` step verifies the key
    /// against the LUKS header and needs the passphrase on stdin.
    fn run_commit_command(&self, line: &str, device: &EncryptionDevice) -> bool {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(program) = tokens.first() else {
            return true;
        };

        let program_path = if Path::new(program)
            .file_name()
            .is_some_and(|name| name == "zkey-cryptsetup")
        {
            self.zkey_cryptsetup.clone()
        } else {
            PathBuf::from(program)
        };

        let needs_password = tokens.iter().any(|token| *token == "setvp");
        let payload = match (&device.password, needs_password) {
            (Some(password), true) => {
                let mut bytes = Zeroizing::new(Vec::new());
                bytes.extend_from_slice(password.expose().as_bytes());
                bytes.push(b'\n');
                Some(bytes)
            }
            (None, true) => {
                info!(
                    "skipping `{program}` for {}: no passphrase configured",
                    device.plain.name
                );
                return false;
            }
            _ => None,
        };

        match self.runner.run(
            &program_path,
            &tokens[1..],
            payload.as_deref().map(|bytes| bytes.as_slice()),
        ) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                info!(
                    "post-commit step `{program}` for {} exited with status {}: {}",
                    device.plain.name,
                    output.status,
                    output.diagnostic()
                );
                false
            }
            Err(err) => {
                info!(
                    "post-commit step `{program}` for {} could not run: {err}",
                    device.plain.name
                );
                false
            }
        }
    }
}

impl EncryptionStrategy for PervasiveLuks2 {
    fn method(&self) -> EncryptionMethod {
        EncryptionMethod::PervasiveLuks2
    }

    /// Usable only when an online coprocessor adapter exists.
    fn availability(&self) -> Readiness {
        adapter::any_online(self.runner.as_ref(), &self.lszcrypt)
    }

    fn create_device(
        &mut self,
        plain: &BlockDevice,
        dm_name: &str,
        params: CreateParams,
    ) -> KeyloomResult<EncryptionDevice> {
        // A key that already covers this device dictates the mapping name it
        // was registered with.
        let existing = SecureKey::for_plain_device(&self.zkey, plain);
        let dm_name = existing
            .as_ref()
            .and_then(|key| key.dm_name_for(plain))
            .map(str::to_string)
            .unwrap_or_else(|| dm_name.to_string());

        let key = existing.or_else(|| {
            SecureKey::generate(
                &self.zkey,
                &dm_name,
                vec![VolumeAssociation::new(
                    plain.name.clone(),
                    Some(dm_name.clone()),
                )],
            )
        });
        if key.is_none() {
            info!(
                "no secure key available for {}; conversion steps will be skipped",
                plain.name
            );
        }
        self.secure_key = key;

        let mut device = base_device(plain, &dm_name, EncryptionMethod::PervasiveLuks2, &params)?;
        device.label = params.label;
        device.pbkdf = params.pbkdf;
        device.open_options = vec![SECTOR_SIZE_OPTION.to_string()];
        Ok(device)
    }

    /// Collect the conversion command sequence while the tool can still see
    /// the pre-commit state.
    fn pre_commit(&mut self, device: &mut EncryptionDevice) -> KeyloomResult<()> {
        if self.secure_key.is_none() {
            debug!("no secure key for {}; nothing to collect", device.plain.name);
            return Ok(());
        }
        let volume = format!("{}:{}", device.plain.name, device.dm_name);
        self.commit_commands = self.zkey.cryptsetup_commands(&volume);
        Ok(())
    }

    /// Run the collected conversion commands against the committed device.
    fn post_commit(
        &mut self,
        device: &EncryptionDevice,
        _session: &mut InstallSession,
    ) -> KeyloomResult<()> {
        let commands = std::mem::take(&mut self.commit_commands);
        for line in &commands {
            if !self.run_commit_command(line, device) {
                break;
            }
        }
        Ok(())
    }
}
