//! Secure AES keys and their volume associations.

use crate::zkey::ZkeyCommand;
use keyloom_core::cmd::CommandRunner;
use keyloom_core::Readiness;
use log::info;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use keyloom_device::{BlockDevice, EncryptionDevice};

fn volumes_header() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*Volumes\s*:(.*)$").expect("static regex"))
}

/// Links a plain device name to the device-mapper name it uses when protected
/// by a secure key. Textual form is `plain[:mapped]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAssociation {
    pub plain: String,
    pub dm: Option<String>,
}

impl VolumeAssociation {
    pub fn new(plain: impl Into<String>, dm: Option<String>) -> Self {
        Self {
            plain: plain.into(),
            dm,
        }
    }

    /// Parse the `plain[:mapped]` form.
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((plain, dm)) if !dm.is_empty() => Self::new(plain, Some(dm.to_string())),
            Some((plain, _)) => Self::new(plain, None),
            None => Self::new(s, None),
        }
    }

    /// Association describing a configured encryption device.
    pub fn from_encryption(device: &EncryptionDevice) -> Self {
        Self::new(device.plain.name.clone(), Some(device.dm_name.clone()))
    }

    /// Match against a plain device: any of its aliases equals the recorded
    /// plain name.
    pub fn matches_block_device(&self, device: &BlockDevice) -> bool {
        device.known_as(&self.plain)
    }

    /// Match against an encryption device: alias match on the underlying
    /// plain device, or mapped-name equality.
    pub fn matches_encryption(&self, device: &EncryptionDevice) -> bool {
        device.plain.known_as(&self.plain)
            || self.dm.as_deref() == Some(device.dm_name.as_str())
    }
}

impl fmt::Display for VolumeAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dm {
            Some(dm) => write!(f, "{}:{}", self.plain, dm),
            None => f.write_str(&self.plain),
        }
    }
}

/// A named secure AES key and the volumes it protects.
///
/// Snapshots of the key-management tool's report; never mutated, only
/// replaced by re-listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureKey {
    name: String,
    volumes: Vec<VolumeAssociation>,
}

impl SecureKey {
    pub fn new(name: impl Into<String>, volumes: Vec<VolumeAssociation>) -> Self {
        Self {
            name: name.into(),
            volumes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volumes(&self) -> &[VolumeAssociation] {
        &self.volumes
    }

    /// Pick a name not yet in use: `base` when free, otherwise `base0`,
    /// `base1`, ... probing upwards.
    pub fn exclusive_name(existing: &[String], base: &str) -> String {
        if !existing.iter().any(|name| name == base) {
            return base.to_string();
        }
        (0u32..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !existing.iter().any(|name| name == candidate))
            .expect("name space exhausted")
    }

    /// Parse the key-listing report: records separated by blank lines, the
    /// first line's last token names the key, and an indented `Volumes:`
    /// block lists `plain[:mapped]` entries one per line.
    pub fn parse_listing(report: &str) -> Vec<SecureKey> {
        let mut keys = Vec::new();

        for record in report.split("\n\n") {
            let lines: Vec<&str> = record
                .lines()
                .filter(|line| !line.trim().is_empty())
                .collect();
            let Some(first) = lines.first() else {
                continue;
            };
            let Some(name) = first.split_whitespace().last() else {
                continue;
            };

            let mut volumes = Vec::new();
            let mut in_volumes = false;
            for line in &lines[1..] {
                if let Some(captures) = volumes_header().captures(line) {
                    in_volumes = true;
                    let inline = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                    if !inline.is_empty() && !inline.contains(char::is_whitespace) {
                        volumes.push(VolumeAssociation::parse(inline));
                    }
                    continue;
                }
                if in_volumes {
                    let indented = line.starts_with(char::is_whitespace);
                    let trimmed = line.trim();
                    if indented && !trimmed.contains(char::is_whitespace) {
                        volumes.push(VolumeAssociation::parse(trimmed));
                    } else {
                        in_volumes = false;
                    }
                }
            }

            keys.push(SecureKey::new(name, volumes));
        }

        keys
    }

    /// Find the key protecting `device`, querying the tool with the device's
    /// full alias set. `None` means no key covers the device.
    pub fn for_plain_device(zkey: &ZkeyCommand, device: &BlockDevice) -> Option<SecureKey> {
        let aliases: Vec<String> = device.aliases().iter().map(|s| s.to_string()).collect();
        zkey.list_for_volumes(&aliases)
            .into_iter()
            .find(|key| key.matches_block_device(device))
    }

    /// Generate a key protecting `volumes`, deriving an unused name from
    /// `base`. `None` when the tool failed (logged, not raised).
    pub fn generate(
        zkey: &ZkeyCommand,
        base: &str,
        volumes: Vec<VolumeAssociation>,
    ) -> Option<SecureKey> {
        let name = Self::exclusive_name(&zkey.known_names(), base);
        if zkey.generate(&name, &volumes) {
            Some(SecureKey::new(name, volumes))
        } else {
            None
        }
    }

    pub fn matches_block_device(&self, device: &BlockDevice) -> bool {
        self.volumes
            .iter()
            .any(|volume| volume.matches_block_device(device))
    }

    pub fn matches_encryption(&self, device: &EncryptionDevice) -> bool {
        self.volumes
            .iter()
            .any(|volume| volume.matches_encryption(device))
    }

    /// Device-mapper name recorded for `device`, when an association matches
    /// and carries one.
    pub fn dm_name_for(&self, device: &BlockDevice) -> Option<&str> {
        self.volumes
            .iter()
            .find(|volume| volume.matches_block_device(device))
            .and_then(|volume| volume.dm.as_deref())
    }
}

/// Quick host probe: the verbose adapter listing mentioning an online adapter
/// means secure keys can be used here. Any failure reads as unavailable.
pub fn secure_key_support(runner: &dyn CommandRunner, lszcrypt: &Path) -> Readiness {
    match runner.run(lszcrypt, &["-V"], None) {
        Ok(output) if output.success() => Readiness::from_bool(
            output
                .stdout
                .split_whitespace()
                .any(|token| token == "online"),
        ),
        Ok(output) => {
            info!(
                "verbose adapter listing exited with status {}: {}",
                output.status,
                output.diagnostic()
            );
            Readiness::Unavailable
        }
        Err(err) => {
            info!("verbose adapter listing could not run: {err}");
            Readiness::Unavailable
        }
    }
}
