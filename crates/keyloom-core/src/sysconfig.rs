//! Key/value access to a sysconfig-style configuration section.
//!
//! Writes are buffered until `flush`, mirroring the two-step behaviour of the
//! system configuration agent: set the field value, then commit the whole
//! section. Reads always go back to the backing file.

use crate::error::{KeyloomError, KeyloomResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One backing configuration section.
pub trait ConfigStore: Send + Sync {
    /// Current value for `key`, `None` when absent.
    fn read(&self, key: &str) -> KeyloomResult<Option<String>>;

    /// Stage a value for `key`; not visible to `read` until `flush`.
    fn write(&self, key: &str, value: &str) -> KeyloomResult<()>;

    /// Commit every staged value to the backing section.
    fn flush(&self) -> KeyloomResult<()>;
}

/// Shell-style `KEY="value"` file, e.g. `/etc/sysconfig/fde-tools`.
///
/// Unrelated lines and comments survive a flush; keys are replaced in place
/// or appended at the end. A missing file reads as empty and is created on
/// the first flush.
pub struct SysconfigFile {
    path: PathBuf,
    pending: Mutex<Vec<(String, String)>>,
}

impl SysconfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> KeyloomResult<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(KeyloomError::Io(err)),
        }
    }
}

impl ConfigStore for SysconfigFile {
    fn read(&self, key: &str) -> KeyloomResult<Option<String>> {
        for line in self.read_lines()? {
            if let Some((name, value)) = parse_assignment(&line) {
                if name == key {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    fn write(&self, key: &str, value: &str) -> KeyloomResult<()> {
        self.pending
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn flush(&self) -> KeyloomResult<()> {
        let staged: Vec<(String, String)> = self.pending.lock().unwrap().drain(..).collect();
        if staged.is_empty() {
            return Ok(());
        }

        let mut lines = self.read_lines()?;
        for (key, value) in staged {
            let rendered = format!("{key}=\"{value}\"");
            let existing = lines
                .iter()
                .position(|line| parse_assignment(line).is_some_and(|(name, _)| name == key));
            match existing {
                Some(index) => lines[index] = rendered,
                None => lines.push(rendered),
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut payload = lines.join("\n");
        payload.push('\n');
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

/// Split a `KEY=value` or `KEY="value"` line; comments and malformed lines
/// yield `None`.
fn parse_assignment(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let (name, raw_value) = trimmed.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return None;
    }

    let raw_value = raw_value.trim();
    let value = raw_value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(raw_value);
    Some((name.to_string(), value.to_string()))
}
