//! Strategy contract and selection.

use crate::{Luks, PervasiveLuks2, SystemdFde, TpmFde, VolatileSwap};
use keyloom_core::cmd::CommandRunner;
use keyloom_core::error::{KeyloomError, KeyloomResult};
use keyloom_core::sysconfig::ConfigStore;
use keyloom_core::{FdeConfig, InstallSession, KeyloomConfig, Readiness, SysconfigFile};
use keyloom_device::{
    AuthToken, BlockDevice, EncryptionDevice, EncryptionMethod, Passphrase, Pbkdf,
};
use log::debug;
use std::sync::Arc;

/// Shared handles a strategy needs: tool configuration, command execution,
/// and the persisted FDE configuration.
#[derive(Clone)]
pub struct StrategyEnv {
    pub config: Arc<KeyloomConfig>,
    pub runner: Arc<dyn CommandRunner>,
    pub fde: FdeConfig,
}

impl StrategyEnv {
    /// Production wiring: the FDE configuration lives in the sysconfig file
    /// named by the tool configuration.
    pub fn new(config: Arc<KeyloomConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        let store = Arc::new(SysconfigFile::new(config.fde_sysconfig_path()));
        Self::with_store(config, runner, store)
    }

    /// Wiring with an explicit configuration store (tests, alternate agents).
    pub fn with_store(
        config: Arc<KeyloomConfig>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            config,
            runner,
            fde: FdeConfig::new(store),
        }
    }
}

/// Method-specific parameters accepted by `create_device`.
///
/// Strategies ignore the fields they have no use for; a strategy that
/// *requires* a field treats its absence as a caller bug.
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    pub label: Option<String>,
    pub pbkdf: Option<Pbkdf>,
    pub auth: Option<AuthToken>,
    pub password: Option<Passphrase>,
    /// Crypt options the caller already decided on.
    pub crypt_options: Vec<String>,
}

/// Capability set every encryption strategy implements.
///
/// External-command failures never escape these methods; they degrade into
/// empty or unavailable results at the point they occur. Errors returned here
/// mean caller bugs or I/O on local state.
pub trait EncryptionStrategy {
    /// Method identifier this strategy configures.
    fn method(&self) -> EncryptionMethod;

    /// Whether this strategy recognises `existing` as one of its own devices.
    fn applies_to(&self, _existing: &EncryptionDevice) -> bool {
        false
    }

    /// Whether the host can use this strategy at all.
    fn availability(&self) -> Readiness {
        Readiness::Ready
    }

    /// Configure an encryption layer over `plain`, returning the device ready
    /// for the commit pipeline.
    fn create_device(
        &mut self,
        plain: &BlockDevice,
        dm_name: &str,
        params: CreateParams,
    ) -> KeyloomResult<EncryptionDevice>;

    /// Invoked immediately before the change reaches disk.
    fn pre_commit(&mut self, device: &mut EncryptionDevice) -> KeyloomResult<()> {
        debug!(
            "no pre-commit work for {} on {}",
            self.method(),
            device.plain.name
        );
        Ok(())
    }

    /// Invoked immediately after the change reached disk.
    fn post_commit(
        &mut self,
        device: &EncryptionDevice,
        _session: &mut InstallSession,
    ) -> KeyloomResult<()> {
        debug!(
            "no post-commit work for {} on {}",
            self.method(),
            device.plain.name
        );
        Ok(())
    }
}

/// Shared `create_device` base: validates the mapped name and carries the
/// caller's password and options onto the device.
pub(crate) fn base_device(
    plain: &BlockDevice,
    dm_name: &str,
    method: EncryptionMethod,
    params: &CreateParams,
) -> KeyloomResult<EncryptionDevice> {
    if dm_name.trim().is_empty() {
        return Err(KeyloomError::Precondition(format!(
            "cannot configure {method} on {} without a device-mapper name",
            plain.name
        )));
    }

    let mut device = EncryptionDevice::new(plain.clone(), dm_name, method);
    device.password = params.password.clone();
    device.crypt_options = params.crypt_options.clone();
    Ok(device)
}

/// Build the strategy for an explicitly requested method.
pub fn strategy_for_method(
    method: EncryptionMethod,
    env: &StrategyEnv,
) -> Box<dyn EncryptionStrategy> {
    match method {
        EncryptionMethod::Luks1 => Box::new(Luks::luks1()),
        EncryptionMethod::Luks2 => Box::new(Luks::luks2()),
        EncryptionMethod::RandomSwap => Box::new(VolatileSwap::random_swap()),
        EncryptionMethod::ProtectedSwap => Box::new(VolatileSwap::protected_swap()),
        EncryptionMethod::SecureSwap => Box::new(VolatileSwap::secure_swap()),
        EncryptionMethod::SystemdFde => Box::new(SystemdFde::new()),
        EncryptionMethod::PervasiveLuks2 => Box::new(PervasiveLuks2::new(env)),
        EncryptionMethod::TpmFde => Box::new(TpmFde::new(env)),
    }
}

/// Recognise the strategy responsible for an already-encrypted device, e.g.
/// a swap entry carried over from a previous installation.
pub fn strategy_for_existing(
    existing: &EncryptionDevice,
    env: &StrategyEnv,
) -> Option<Box<dyn EncryptionStrategy>> {
    EncryptionMethod::all()
        .iter()
        .map(|method| strategy_for_method(*method, env))
        .find(|strategy| strategy.applies_to(existing))
}

/// Availability of every method on this host, in selection order.
pub fn availability_report(env: &StrategyEnv) -> Vec<(EncryptionMethod, Readiness)> {
    EncryptionMethod::all()
        .iter()
        .map(|method| (*method, strategy_for_method(*method, env).availability()))
        .collect()
}
