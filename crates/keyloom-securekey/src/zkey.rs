//! Execution wrapper for the secure-key management tool.

use crate::key::{SecureKey, VolumeAssociation};
use keyloom_core::cmd::CommandRunner;
use keyloom_core::KeyloomConfig;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

/// Fixed generation parameters: 256-bit XTS keys for LUKS2 volumes with a
/// 4096-byte sector size.
const GENERATE_ARGS: &[&str] = &[
    "--xts",
    "--keybits",
    "256",
    "--volume-type",
    "LUKS2",
    "--sector-size",
    "4096",
];

#[derive(Clone)]
pub struct ZkeyCommand {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
}

impl ZkeyCommand {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: PathBuf) -> Self {
        Self { runner, binary }
    }

    pub fn from_config(config: &KeyloomConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, config.zkey_binary())
    }

    /// All keys known to the tool. Failure reads as "no keys".
    pub fn list_all(&self) -> Vec<SecureKey> {
        self.list(None)
    }

    /// Keys restricted to the given volume names.
    pub fn list_for_volumes(&self, volumes: &[String]) -> Vec<SecureKey> {
        if volumes.is_empty() {
            return Vec::new();
        }
        self.list(Some(volumes.join(",")))
    }

    /// Names currently in use, for exclusive-name probing.
    pub fn known_names(&self) -> Vec<String> {
        self.list_all()
            .into_iter()
            .map(|key| key.name().to_string())
            .collect()
    }

    /// Ask the tool for the command sequence that finishes converting
    /// `volume` (`plain:mapped`) once the encryption layer is on disk.
    /// Failure reads as "nothing to run".
    pub fn cryptsetup_commands(&self, volume: &str) -> Vec<String> {
        match self
            .runner
            .run(&self.binary, &["cryptsetup", "--volumes", volume], None)
        {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect(),
            Ok(output) => {
                info!(
                    "post-commit command lookup for `{volume}` exited with status {}: {}",
                    output.status,
                    output.diagnostic()
                );
                Vec::new()
            }
            Err(err) => {
                info!("post-commit command lookup for `{volume}` could not run: {err}");
                Vec::new()
            }
        }
    }

    /// Create a new secure key. Returns whether the tool succeeded; failures
    /// are logged and degrade into "no key material".
    pub fn generate(&self, name: &str, volumes: &[VolumeAssociation]) -> bool {
        let mut args: Vec<String> = vec!["generate".into(), "--name".into(), name.into()];
        args.extend(GENERATE_ARGS.iter().map(|arg| arg.to_string()));
        let rendered;
        if !volumes.is_empty() {
            rendered = volumes
                .iter()
                .map(VolumeAssociation::to_string)
                .collect::<Vec<_>>()
                .join(",");
            args.push("--volumes".into());
            args.push(rendered);
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.runner.run(&self.binary, &arg_refs, None) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                info!(
                    "secure key generation for `{name}` exited with status {}: {}",
                    output.status,
                    output.diagnostic()
                );
                false
            }
            Err(err) => {
                info!("secure key generation for `{name}` could not run: {err}");
                false
            }
        }
    }

    fn list(&self, volumes: Option<String>) -> Vec<SecureKey> {
        let mut args: Vec<&str> = vec!["list"];
        if let Some(volumes) = volumes.as_deref() {
            args.push("--volumes");
            args.push(volumes);
        }

        match self.runner.run(&self.binary, &args, None) {
            Ok(output) if output.success() => SecureKey::parse_listing(&output.stdout),
            Ok(output) => {
                info!(
                    "secure key listing exited with status {}: {}",
                    output.status,
                    output.diagnostic()
                );
                Vec::new()
            }
            Err(err) => {
                info!("secure key listing could not run: {err}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyloom_core::cmd::CmdOutput;
    use keyloom_core::error::KeyloomResult;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
        status: i32,
    }

    impl CommandRunner for RecordingRunner {
        fn run(
            &self,
            _program: &Path,
            args: &[&str],
            _input: Option<&[u8]>,
        ) -> KeyloomResult<CmdOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|s| s.to_string()).collect());
            Ok(CmdOutput {
                stdout: String::new(),
                stderr: String::new(),
                status: self.status,
            })
        }
    }

    #[test]
    fn generate_passes_fixed_parameters_and_volume_list() {
        let runner = Arc::new(RecordingRunner::default());
        let zkey = ZkeyCommand::new(runner.clone(), PathBuf::from("zkey"));

        let volumes = vec![
            VolumeAssociation::new("/dev/dasdb1", Some("cr_dasdb1".into())),
            VolumeAssociation::new("/dev/dasdc1", None),
        ];
        assert!(zkey.generate("cr_dasdb1", &volumes));

        let calls = runner.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            vec![
                "generate",
                "--name",
                "cr_dasdb1",
                "--xts",
                "--keybits",
                "256",
                "--volume-type",
                "LUKS2",
                "--sector-size",
                "4096",
                "--volumes",
                "/dev/dasdb1:cr_dasdb1,/dev/dasdc1",
            ]
        );
    }

    #[test]
    fn generate_without_volumes_omits_the_flag() {
        let runner = Arc::new(RecordingRunner::default());
        let zkey = ZkeyCommand::new(runner.clone(), PathBuf::from("zkey"));
        assert!(zkey.generate("bare", &[]));

        let calls = runner.calls.lock().unwrap();
        assert!(!calls[0].iter().any(|arg| arg == "--volumes"));
    }

    #[test]
    fn failed_listing_reads_as_no_keys() {
        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
            status: 1,
        });
        let zkey = ZkeyCommand::new(runner, PathBuf::from("zkey"));
        assert!(zkey.list_all().is_empty());
        assert!(zkey.known_names().is_empty());
    }

    #[test]
    fn empty_volume_filter_skips_the_query() {
        let runner = Arc::new(RecordingRunner::default());
        let zkey = ZkeyCommand::new(runner.clone(), PathBuf::from("zkey"));
        assert!(zkey.list_for_volumes(&[]).is_empty());
        assert!(runner.calls.lock().unwrap().is_empty());
    }
}
