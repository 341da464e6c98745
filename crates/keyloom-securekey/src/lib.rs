#![forbid(unsafe_code)]

//! Pervasive secure-key subsystem.
//!
//! Integrates with the host via:
//! - `lszcrypt` (crypto coprocessor adapter listing)
//! - per-adapter sysfs master-key status files
//! - `zkey` (secure AES key listing and generation)

pub mod adapter;
pub mod key;
pub mod zkey;

pub use adapter::Adapter;
pub use key::{secure_key_support, SecureKey, VolumeAssociation};
pub use zkey::ZkeyCommand;
