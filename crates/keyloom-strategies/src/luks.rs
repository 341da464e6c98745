//! Plain LUKS strategies.

use crate::strategy::{base_device, CreateParams, EncryptionStrategy};
use keyloom_core::error::{KeyloomError, KeyloomResult};
use keyloom_device::{BlockDevice, EncryptionDevice, EncryptionMethod};

/// LUKS1 or LUKS2 with a caller-supplied passphrase.
pub struct Luks {
    method: EncryptionMethod,
}

impl Luks {
    pub fn luks1() -> Self {
        Self {
            method: EncryptionMethod::Luks1,
        }
    }

    pub fn luks2() -> Self {
        Self {
            method: EncryptionMethod::Luks2,
        }
    }
}

impl EncryptionStrategy for Luks {
    fn method(&self) -> EncryptionMethod {
        self.method
    }

    fn create_device(
        &mut self,
        plain: &BlockDevice,
        dm_name: &str,
        params: CreateParams,
    ) -> KeyloomResult<EncryptionDevice> {
        if params.password.is_none() {
            return Err(KeyloomError::Precondition(format!(
                "{} on {} requires a passphrase",
                self.method, plain.name
            )));
        }

        let mut device = base_device(plain, dm_name, self.method, &params)?;

        // Labels and PBKDF tuning only exist in the LUKS2 header format.
        if self.method == EncryptionMethod::Luks2 {
            device.label = params.label;
            device.pbkdf = params.pbkdf;
        }

        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::CreateParams;
    use keyloom_device::{Passphrase, Pbkdf};

    fn params() -> CreateParams {
        CreateParams {
            label: Some("root".to_string()),
            pbkdf: Some(Pbkdf::Argon2id),
            password: Some(Passphrase::new("s3cret")),
            ..CreateParams::default()
        }
    }

    #[test]
    fn luks2_applies_label_and_pbkdf() {
        let plain = BlockDevice::new("/dev/sda2");
        let device = Luks::luks2()
            .create_device(&plain, "cr_root", params())
            .unwrap();

        assert_eq!(device.method, EncryptionMethod::Luks2);
        assert_eq!(device.label.as_deref(), Some("root"));
        assert_eq!(device.pbkdf, Some(Pbkdf::Argon2id));
        assert_eq!(device.dm_name, "cr_root");
    }

    #[test]
    fn luks1_ignores_label_and_pbkdf() {
        let plain = BlockDevice::new("/dev/sda2");
        let device = Luks::luks1()
            .create_device(&plain, "cr_root", params())
            .unwrap();

        assert_eq!(device.method, EncryptionMethod::Luks1);
        assert_eq!(device.label, None);
        assert_eq!(device.pbkdf, None);
    }

    #[test]
    fn missing_passphrase_is_a_precondition_error() {
        let plain = BlockDevice::new("/dev/sda2");
        let err = Luks::luks2()
            .create_device(&plain, "cr_root", CreateParams::default())
            .unwrap_err();
        assert!(matches!(err, KeyloomError::Precondition(_)));
    }

    #[test]
    fn empty_dm_name_is_a_precondition_error() {
        let plain = BlockDevice::new("/dev/sda2");
        let err = Luks::luks2()
            .create_device(&plain, "  ", params())
            .unwrap_err();
        assert!(matches!(err, KeyloomError::Precondition(_)));
    }
}
