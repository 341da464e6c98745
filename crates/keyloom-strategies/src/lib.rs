#![forbid(unsafe_code)]

//! Encryption-strategy dispatch for KeyLoom.
//!
//! Each strategy knows how to configure an encryption layer for its method
//! and what to run around the on-disk commit. Selection is an explicit
//! function from device/context facts to a strategy value; nothing is decided
//! by inheritance-style fallthrough.

mod luks;
mod pervasive;
mod strategy;
mod swap;
mod systemd;
mod tpm;

pub use luks::Luks;
pub use pervasive::PervasiveLuks2;
pub use strategy::{
    availability_report, strategy_for_existing, strategy_for_method, CreateParams,
    EncryptionStrategy, StrategyEnv,
};
pub use swap::VolatileSwap;
pub use systemd::SystemdFde;
pub use tpm::{
    FdectlCommand, FinalizeOutcome, FinalizeStep, TpmEnrollment, TpmFde, INITRD_ATTACH_OPTION,
    VIRTUAL_KEY_FILE,
};
