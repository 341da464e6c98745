#![forbid(unsafe_code)]

//! Device-model contracts shared across KeyLoom.
//!
//! The storage graph that creates partitions and filesystems lives outside this
//! workspace; strategies only ever see the snapshot types defined here.

pub mod blockdev;
pub mod encryption;

pub use blockdev::BlockDevice;
pub use encryption::{
    AuthToken, EncryptionDevice, EncryptionMethod, Passphrase, Pbkdf,
};
