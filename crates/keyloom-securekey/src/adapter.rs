//! Crypto coprocessor adapter discovery.
//!
//! Adapters are snapshots of `lszcrypt` output at scan time: a card/domain
//! pair plus type, mode, and status labels. When the per-adapter sysfs status
//! file reports a valid AES master key, its verification-pattern fingerprint
//! is captured as well.

use keyloom_core::cmd::CommandRunner;
use keyloom_core::Readiness;
use log::info;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const DEFAULT_SYSFS_AP_ROOT: &str = "/sys/bus/ap/devices";

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.\d+$").expect("static regex"))
}

/// One crypto coprocessor card/domain pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub card: String,
    pub domain: String,
    /// Adapter type label, e.g. `CEX5C`.
    pub kind: String,
    /// Operating mode label, e.g. `CCA-Coproc`.
    pub mode: String,
    pub status: String,
    /// Verification pattern of the current AES master key, when valid.
    pub mkvp: Option<String>,
}

impl Adapter {
    /// Composite identifier as printed by the listing tool.
    pub fn id(&self) -> String {
        format!("{}.{}", self.card, self.domain)
    }

    pub fn online(&self) -> bool {
        self.status == "online"
    }

    /// Scan the host for adapters. A failed or empty listing yields an empty
    /// result; discovery never raises for environmental problems.
    pub fn scan_all(runner: &dyn CommandRunner, lszcrypt: &Path) -> Vec<Adapter> {
        Self::scan_all_at(runner, lszcrypt, Path::new(DEFAULT_SYSFS_AP_ROOT))
    }

    /// Like [`Adapter::scan_all`] with an explicit sysfs root (tests).
    pub fn scan_all_at(
        runner: &dyn CommandRunner,
        lszcrypt: &Path,
        sysfs_root: &Path,
    ) -> Vec<Adapter> {
        let output = match runner.run(lszcrypt, &[], None) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                info!(
                    "adapter listing exited with status {}: {}",
                    output.status,
                    output.diagnostic()
                );
                return Vec::new();
            }
            Err(err) => {
                info!("adapter listing could not run: {err}");
                return Vec::new();
            }
        };

        parse_table(&output.stdout)
            .into_iter()
            .map(|mut adapter| {
                adapter.mkvp = read_master_key_fingerprint(sysfs_root, &adapter);
                adapter
            })
            .collect()
    }
}

/// Parse the tabular listing: two header lines (when present) are discarded,
/// remaining rows count only when their first token is a `card.domain` pair.
fn parse_table(output: &str) -> Vec<Adapter> {
    let lines: Vec<&str> = output.lines().collect();
    let data_lines: &[&str] = if lines.len() >= 3 { &lines[2..] } else { &lines };

    data_lines
        .iter()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let id = tokens.first()?;
            if !id_pattern().is_match(id) {
                return None;
            }
            let (card, domain) = id.split_once('.')?;
            Some(Adapter {
                card: card.to_string(),
                domain: domain.to_string(),
                kind: tokens.get(1).copied().unwrap_or_default().to_string(),
                mode: tokens.get(2).copied().unwrap_or_default().to_string(),
                status: tokens.get(3).copied().unwrap_or_default().to_string(),
                mkvp: None,
            })
        })
        .collect()
}

/// Look up the adapter's master-key status file and pull the fingerprint from
/// its `AES CUR: valid ...` line. Any read failure means "no fingerprint".
fn read_master_key_fingerprint(sysfs_root: &Path, adapter: &Adapter) -> Option<String> {
    let path = master_key_status_path(sysfs_root, adapter);
    let contents = fs::read_to_string(path).ok()?;
    contents
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("AES CUR: valid"))
        .and_then(|line| line.split_whitespace().last())
        .filter(|token| *token != "valid")
        .map(str::to_string)
}

fn master_key_status_path(sysfs_root: &Path, adapter: &Adapter) -> PathBuf {
    sysfs_root
        .join(format!("card{}", adapter.card))
        .join(adapter.id())
        .join("mkvps")
}

/// Whether at least one online adapter exists on this host.
pub fn any_online(runner: &dyn CommandRunner, lszcrypt: &Path) -> Readiness {
    Readiness::from_bool(
        Adapter::scan_all(runner, lszcrypt)
            .iter()
            .any(Adapter::online),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyloom_core::cmd::CmdOutput;
    use keyloom_core::error::KeyloomResult;
    use tempfile::tempdir;

    const SAMPLE_TABLE: &str = "\
CARD.DOMAIN TYPE  MODE        STATUS  REQUESTS
----------------------------------------------
01.0001     CEX5C CCA-Coproc  online         1
01.0002     CEX5C CCA-Coproc  online         2
01.0003     CEX5C CCA-Coproc  offline        0
01.0004     CEX5C CCA-Coproc  online         5
";

    struct CannedRunner {
        output: KeyloomResult<CmdOutput>,
    }

    impl CannedRunner {
        fn ok(stdout: &str) -> Self {
            Self {
                output: Ok(CmdOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    status: 0,
                }),
            }
        }

        fn failing() -> Self {
            Self {
                output: Ok(CmdOutput {
                    stdout: String::new(),
                    stderr: "error: no AP bus support".to_string(),
                    status: 1,
                }),
            }
        }
    }

    impl CommandRunner for CannedRunner {
        fn run(
            &self,
            _program: &Path,
            _args: &[&str],
            _input: Option<&[u8]>,
        ) -> KeyloomResult<CmdOutput> {
            match &self.output {
                Ok(output) => Ok(output.clone()),
                Err(_) => Err(keyloom_core::KeyloomError::Precondition(
                    "unreachable".into(),
                )),
            }
        }
    }

    #[test]
    fn scan_parses_all_data_rows() {
        let runner = CannedRunner::ok(SAMPLE_TABLE);
        let dir = tempdir().unwrap();
        let adapters = Adapter::scan_all_at(&runner, Path::new("lszcrypt"), dir.path());

        assert_eq!(adapters.len(), 4);
        assert!(adapters.iter().all(|adapter| adapter.card == "01"));
        assert_eq!(adapters[0].id(), "01.0001");
        assert_eq!(adapters[0].kind, "CEX5C");
        assert_eq!(adapters[0].mode, "CCA-Coproc");
        assert!(adapters[0].online());
        assert!(!adapters[2].online());
    }

    #[test]
    fn rows_with_malformed_ids_are_excluded() {
        let table = "\
CARD.DOMAIN TYPE  MODE        STATUS  REQUESTS
----------------------------------------------
01.0001     CEX5C CCA-Coproc  online         1
card42      CEX5C CCA-Coproc  online         1
01.woops    CEX5C CCA-Coproc  online         1
";
        let runner = CannedRunner::ok(table);
        let dir = tempdir().unwrap();
        let adapters = Adapter::scan_all_at(&runner, Path::new("lszcrypt"), dir.path());
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].id(), "01.0001");
    }

    #[test]
    fn header_only_output_yields_no_adapters() {
        let runner = CannedRunner::ok(
            "CARD.DOMAIN TYPE  MODE        STATUS  REQUESTS\n\
             ----------------------------------------------\n",
        );
        let dir = tempdir().unwrap();
        assert!(Adapter::scan_all_at(&runner, Path::new("lszcrypt"), dir.path()).is_empty());
    }

    #[test]
    fn failed_listing_yields_no_adapters() {
        let runner = CannedRunner::failing();
        let dir = tempdir().unwrap();
        assert!(Adapter::scan_all_at(&runner, Path::new("lszcrypt"), dir.path()).is_empty());
    }

    #[test]
    fn fingerprint_comes_from_aes_cur_line() {
        let dir = tempdir().unwrap();
        let status_dir = dir.path().join("card01").join("01.0001");
        fs::create_dir_all(&status_dir).unwrap();
        fs::write(
            status_dir.join("mkvps"),
            "AES NEW: empty -\nAES CUR: valid 0xd2344cc79bf3419f\nAES OLD: invalid -\n",
        )
        .unwrap();

        let runner = CannedRunner::ok(SAMPLE_TABLE);
        let adapters = Adapter::scan_all_at(&runner, Path::new("lszcrypt"), dir.path());
        assert_eq!(adapters[0].mkvp.as_deref(), Some("0xd2344cc79bf3419f"));
        // No status file for the remaining adapters.
        assert_eq!(adapters[1].mkvp, None);
    }

    #[test]
    fn invalid_master_key_yields_no_fingerprint() {
        let dir = tempdir().unwrap();
        let status_dir = dir.path().join("card01").join("01.0001");
        fs::create_dir_all(&status_dir).unwrap();
        fs::write(status_dir.join("mkvps"), "AES CUR: invalid -\n").unwrap();

        let runner = CannedRunner::ok(SAMPLE_TABLE);
        let adapters = Adapter::scan_all_at(&runner, Path::new("lszcrypt"), dir.path());
        assert_eq!(adapters[0].mkvp, None);
    }

    #[test]
    fn any_online_reflects_adapter_status() {
        let dir = tempdir().unwrap();
        let online = CannedRunner::ok(SAMPLE_TABLE);
        assert!(
            Adapter::scan_all_at(&online, Path::new("lszcrypt"), dir.path())
                .iter()
                .any(Adapter::online)
        );

        let offline = CannedRunner::ok(
            "CARD.DOMAIN TYPE  MODE        STATUS  REQUESTS\n\
             ----------------------------------------------\n\
             01.0001     CEX5C CCA-Coproc  offline        0\n",
        );
        assert!(
            !Adapter::scan_all_at(&offline, Path::new("lszcrypt"), dir.path())
                .iter()
                .any(Adapter::online)
        );
    }
}
