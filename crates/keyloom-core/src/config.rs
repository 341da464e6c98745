//! Tool configuration for KeyLoom binaries.

use crate::error::{KeyloomError, KeyloomResult};
use directories_next::ProjectDirs;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/keyloom.toml";
const BOOTSTRAP_FILE_NAME: &str = "keyloom.toml";
const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "KeyLoom";
const APP_NAME: &str = "keyloom";

const KNOWN_LSZCRYPT_PATHS: &[&str] = &["/usr/sbin/lszcrypt", "/sbin/lszcrypt"];
const KNOWN_ZKEY_PATHS: &[&str] = &["/usr/bin/zkey", "/usr/sbin/zkey"];
const KNOWN_ZKEY_CRYPTSETUP_PATHS: &[&str] =
    &["/usr/bin/zkey-cryptsetup", "/usr/sbin/zkey-cryptsetup"];
const KNOWN_FDECTL_PATHS: &[&str] = &["/usr/sbin/fdectl", "/usr/bin/fdectl"];
const KNOWN_SYSTEMCTL_PATHS: &[&str] = &["/usr/bin/systemctl", "/bin/systemctl"];

const DEFAULT_FDE_SYSCONFIG_PATH: &str = "/etc/sysconfig/fde-tools";
const DEFAULT_ENROLL_SERVICE: &str = "fde-tpm-enroll.service";

/// Paths of the external tools this subsystem drives.
///
/// Every field is optional; unset fields fall back to well-known install
/// locations, then to a `PATH` lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Tools {
    #[serde(default)]
    pub lszcrypt_path: Option<String>,

    #[serde(default)]
    pub zkey_path: Option<String>,

    #[serde(default)]
    pub zkey_cryptsetup_path: Option<String>,

    #[serde(default)]
    pub fdectl_path: Option<String>,

    #[serde(default)]
    pub systemctl_path: Option<String>,
}

/// TPM-backed FDE settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FdeCfg {
    #[serde(default = "default_fde_sysconfig_path")]
    pub sysconfig_path: String,

    #[serde(default = "default_enroll_service")]
    pub enroll_service: String,
}

fn default_fde_sysconfig_path() -> String {
    DEFAULT_FDE_SYSCONFIG_PATH.to_string()
}

fn default_enroll_service() -> String {
    DEFAULT_ENROLL_SERVICE.to_string()
}

impl Default for FdeCfg {
    fn default() -> Self {
        Self {
            sysconfig_path: default_fde_sysconfig_path(),
            enroll_service: default_enroll_service(),
        }
    }
}

/// Timeouts for external command execution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CryptoCfg {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for CryptoCfg {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct KeyloomConfig {
    #[serde(default)]
    pub tools: Tools,

    #[serde(default)]
    pub fde: FdeCfg,

    #[serde(default)]
    pub crypto: CryptoCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default, JsonSchema)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl KeyloomConfig {
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Per-user configuration path used for bootstrapping when the system path
    /// is not writable.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Load configuration from disk, creating a bootstrap copy when missing.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> KeyloomResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }

        match ensure_bootstrap_file(target) {
            Ok(created) => {
                if created {
                    info!("keyloom config bootstrap created at {}", target.display());
                }
                Self::load(target)
            }
            Err(err) => {
                if target != Self::default_path() {
                    return Err(KeyloomError::InvalidConfig(format!(
                        "failed to initialise configuration at {}: {err}",
                        target.display()
                    )));
                }

                let user_path = Self::user_config_path().ok_or_else(|| {
                    KeyloomError::InvalidConfig(
                        "unable to determine user configuration directory; \
                        create /etc/keyloom.toml manually"
                            .to_string(),
                    )
                })?;

                if ensure_bootstrap_file(&user_path).map_err(|io_err| {
                    KeyloomError::InvalidConfig(format!(
                        "failed to prepare bootstrap configuration at {}: {io_err}",
                        user_path.display()
                    ))
                })? {
                    info!("keyloom config bootstrap created at {}", user_path.display());
                }

                warn!(
                    "configuration missing at {}; using per-user bootstrap at {}",
                    target.display(),
                    user_path.display()
                );

                Self::load(&user_path)
            }
        }
    }

    /// Read a config file from disk and detect its format.
    pub fn load<P: AsRef<Path>>(path: P) -> KeyloomResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_toml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("toml")
        );
        let mut cfg = if is_toml {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.format = if is_toml {
            ConfigFormat::Toml
        } else {
            ConfigFormat::Yaml
        };
        Ok(cfg)
    }

    /// Best-effort validation pass returning human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for (label, path) in [
            ("tools.lszcrypt_path", &self.tools.lszcrypt_path),
            ("tools.zkey_path", &self.tools.zkey_path),
            ("tools.zkey_cryptsetup_path", &self.tools.zkey_cryptsetup_path),
            ("tools.fdectl_path", &self.tools.fdectl_path),
            ("tools.systemctl_path", &self.tools.systemctl_path),
        ] {
            if let Some(path) = path.as_deref().map(str::trim) {
                if path.is_empty() {
                    issues.push(format!("{label} is set but empty"));
                } else if !Path::new(path).exists() {
                    issues.push(format!("{label} points at missing binary {path}"));
                }
            }
        }

        if self.fde.sysconfig_path.trim().is_empty() {
            issues.push("fde.sysconfig_path must not be empty".to_string());
        }
        if self.fde.enroll_service.trim().is_empty() {
            issues.push("fde.enroll_service must not be empty".to_string());
        }
        if self.crypto.timeout_secs == 0 {
            issues.push("crypto.timeout_secs must be at least 1".to_string());
        }

        issues
    }

    /// Translate the stored timeout into a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.crypto.timeout_secs)
    }

    pub fn lszcrypt_binary(&self) -> PathBuf {
        resolve_binary(
            self.tools.lszcrypt_path.as_deref(),
            KNOWN_LSZCRYPT_PATHS,
            "lszcrypt",
        )
    }

    pub fn zkey_binary(&self) -> PathBuf {
        resolve_binary(self.tools.zkey_path.as_deref(), KNOWN_ZKEY_PATHS, "zkey")
    }

    pub fn zkey_cryptsetup_binary(&self) -> PathBuf {
        resolve_binary(
            self.tools.zkey_cryptsetup_path.as_deref(),
            KNOWN_ZKEY_CRYPTSETUP_PATHS,
            "zkey-cryptsetup",
        )
    }

    pub fn fdectl_binary(&self) -> PathBuf {
        resolve_binary(
            self.tools.fdectl_path.as_deref(),
            KNOWN_FDECTL_PATHS,
            "fdectl",
        )
    }

    pub fn systemctl_binary(&self) -> PathBuf {
        resolve_binary(
            self.tools.systemctl_path.as_deref(),
            KNOWN_SYSTEMCTL_PATHS,
            "systemctl",
        )
    }

    pub fn fde_sysconfig_path(&self) -> PathBuf {
        PathBuf::from(&self.fde.sysconfig_path)
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> KeyloomResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

/// Configured override first, then known install locations, then `PATH`,
/// finally the bare name so the launch error names the missing tool.
fn resolve_binary(configured: Option<&str>, known: &[&str], name: &str) -> PathBuf {
    if let Some(path) = configured.map(str::trim).filter(|path| !path.is_empty()) {
        return PathBuf::from(path);
    }

    for candidate in known {
        let path = Path::new(candidate);
        if path.exists() {
            return path.to_path_buf();
        }
    }

    find_in_path(name).unwrap_or_else(|| PathBuf::from(name))
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        candidate.exists().then_some(candidate)
    })
}

pub fn bootstrap_template() -> String {
    format!(
        "# Auto-generated KeyLoom configuration bootstrap.\n\
         # Unset tool paths are resolved from well-known locations and PATH.\n\
         \n\
         [tools]\n\
         # lszcrypt_path = \"/usr/sbin/lszcrypt\"\n\
         # zkey_path = \"/usr/bin/zkey\"\n\
         # zkey_cryptsetup_path = \"/usr/bin/zkey-cryptsetup\"\n\
         # fdectl_path = \"/usr/sbin/fdectl\"\n\
         # systemctl_path = \"/usr/bin/systemctl\"\n\
         \n\
         [fde]\n\
         sysconfig_path = \"{DEFAULT_FDE_SYSCONFIG_PATH}\"\n\
         enroll_service = \"{DEFAULT_ENROLL_SERVICE}\"\n\
         \n\
         [crypto]\n\
         timeout_secs = 10\n"
    )
}

fn ensure_bootstrap_file(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().create_new(true).write(true).open(path) {
        Ok(mut file) => {
            file.write_all(bootstrap_template().as_bytes())?;
            file.flush()?;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_accepts_minimal_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyloom.toml");
        fs::write(&path, "[crypto]\ntimeout_secs = 3\n").unwrap();

        let cfg = KeyloomConfig::load(&path).unwrap();
        assert_eq!(cfg.crypto.timeout_secs, 3);
        assert_eq!(cfg.fde.sysconfig_path, DEFAULT_FDE_SYSCONFIG_PATH);
        assert_eq!(cfg.command_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn load_accepts_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyloom.yaml");
        fs::write(&path, "fde:\n  enroll_service: custom-enroll.service\n").unwrap();

        let cfg = KeyloomConfig::load(&path).unwrap();
        assert_eq!(cfg.fde.enroll_service, "custom-enroll.service");
        assert!(matches!(cfg.format, ConfigFormat::Yaml));
    }

    #[test]
    fn bootstrap_template_parses_back() {
        let cfg: KeyloomConfig = toml::from_str(&bootstrap_template()).unwrap();
        assert_eq!(cfg.crypto.timeout_secs, 10);
        assert_eq!(cfg.fde.enroll_service, DEFAULT_ENROLL_SERVICE);
    }

    #[test]
    fn validate_flags_missing_override_binary() {
        let mut cfg = KeyloomConfig::default();
        cfg.tools.zkey_path = Some("/nonexistent/zkey".to_string());
        let issues = cfg.validate();
        assert!(issues.iter().any(|issue| issue.contains("tools.zkey_path")));
    }

    #[test]
    fn configured_override_wins_over_probing() {
        let dir = tempdir().unwrap();
        let fake = dir.path().join("zkey");
        fs::write(&fake, "").unwrap();

        let mut cfg = KeyloomConfig::default();
        cfg.tools.zkey_path = Some(fake.to_string_lossy().into_owned());
        assert_eq!(cfg.zkey_binary(), fake);
    }

    #[test]
    fn load_or_bootstrap_materialises_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyloom.toml");
        let cfg = KeyloomConfig::load_or_bootstrap(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.path, path);
    }
}
