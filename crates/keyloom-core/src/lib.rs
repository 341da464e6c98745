#![forbid(unsafe_code)]

//! Core building blocks shared by KeyLoom crates.
//!
//! Configuration, external-command execution, the persisted FDE configuration,
//! and the installation session live here so the strategy and secure-key
//! crates can focus on their protocols.

pub mod cmd;
pub mod config;
pub mod error;
pub mod fdecfg;
pub mod logging;
pub mod session;
pub mod sysconfig;

pub use cmd::{CmdOutput, CommandRunner, Readiness, SystemRunner};
pub use config::{KeyloomConfig, DEFAULT_CONFIG_PATH};
pub use error::{KeyloomError, KeyloomResult};
pub use fdecfg::FdeConfig;
pub use session::{InstallSession, SessionMode};
pub use sysconfig::{ConfigStore, SysconfigFile};
