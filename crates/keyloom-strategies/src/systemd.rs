//! LUKS2 with a systemd-enrolled authentication token.

use crate::strategy::{base_device, CreateParams, EncryptionStrategy};
use keyloom_core::error::{KeyloomError, KeyloomResult};
use keyloom_device::{BlockDevice, EncryptionDevice, EncryptionMethod};

/// LUKS2 whose keyslot is unlocked through an external token (TPM2, FIDO2)
/// enrolled by systemd tooling after commit. The descriptor rides on the
/// device so the enrollment step knows what to set up.
#[derive(Default)]
pub struct SystemdFde;

impl SystemdFde {
    pub fn new() -> Self {
        Self
    }
}

impl EncryptionStrategy for SystemdFde {
    fn method(&self) -> EncryptionMethod {
        EncryptionMethod::SystemdFde
    }

    fn create_device(
        &mut self,
        plain: &BlockDevice,
        dm_name: &str,
        params: CreateParams,
    ) -> KeyloomResult<EncryptionDevice> {
        let Some(auth) = params.auth else {
            return Err(KeyloomError::Precondition(format!(
                "systemd_fde on {} requires an authentication descriptor",
                plain.name
            )));
        };

        let mut device = base_device(plain, dm_name, EncryptionMethod::SystemdFde, &params)?;
        device.label = params.label;
        device.pbkdf = params.pbkdf;
        device.auth = Some(auth);
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyloom_device::{AuthToken, Passphrase, Pbkdf};

    #[test]
    fn stores_authentication_descriptor_on_device() {
        let plain = BlockDevice::new("/dev/nvme0n1p3");
        let params = CreateParams {
            label: Some("system".to_string()),
            pbkdf: Some(Pbkdf::Pbkdf2),
            auth: Some(AuthToken::Tpm2),
            password: Some(Passphrase::new("s3cret")),
            ..CreateParams::default()
        };

        let device = SystemdFde::new()
            .create_device(&plain, "cr_system", params)
            .unwrap();
        assert_eq!(device.auth, Some(AuthToken::Tpm2));
        assert_eq!(device.label.as_deref(), Some("system"));
        assert_eq!(device.pbkdf, Some(Pbkdf::Pbkdf2));
    }

    #[test]
    fn missing_descriptor_is_a_precondition_error() {
        let plain = BlockDevice::new("/dev/nvme0n1p3");
        let err = SystemdFde::new()
            .create_device(&plain, "cr_system", CreateParams::default())
            .unwrap_err();
        assert!(matches!(err, KeyloomError::Precondition(_)));
    }
}
