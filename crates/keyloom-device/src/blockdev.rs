//! Snapshot of a block device as handed over by the storage graph.

use serde::{Deserialize, Serialize};

/// A plain (unencrypted) block device and its stable udev aliases.
///
/// The kernel name (`/dev/dasdb1`, `/dev/sda2`, ...) can change across boots;
/// the `by-id` and `by-path` links are stable and are what external tools
/// record. Matching logic therefore always works on the full alias set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Kernel device node, e.g. `/dev/sda1`.
    pub name: String,

    /// Stable `/dev/disk/by-id/...` links pointing at this device.
    #[serde(default)]
    pub by_id: Vec<String>,

    /// Stable `/dev/disk/by-path/...` links pointing at this device.
    #[serde(default)]
    pub by_path: Vec<String>,
}

impl BlockDevice {
    /// Device known only by its kernel name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            by_id: Vec::new(),
            by_path: Vec::new(),
        }
    }

    /// Device with its stable udev links.
    pub fn with_udev_links(
        name: impl Into<String>,
        by_id: Vec<String>,
        by_path: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            by_id,
            by_path,
        }
    }

    /// Every name this device is known by: kernel name first, then the stable
    /// links.
    pub fn aliases(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(1 + self.by_id.len() + self.by_path.len());
        names.push(self.name.as_str());
        names.extend(self.by_id.iter().map(String::as_str));
        names.extend(self.by_path.iter().map(String::as_str));
        names
    }

    /// Name to persist in configuration files: the first `by-id` link when one
    /// exists (stable across boots), otherwise the kernel name.
    pub fn preferred_name(&self) -> &str {
        self.by_id.first().map(String::as_str).unwrap_or(&self.name)
    }

    /// Whether `candidate` is one of this device's known names.
    pub fn known_as(&self, candidate: &str) -> bool {
        self.aliases().contains(&candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlockDevice {
        BlockDevice::with_udev_links(
            "/dev/sda1",
            vec!["/dev/disk/by-id/scsi-0QEMU_HARDDISK-part1".to_string()],
            vec!["/dev/disk/by-path/pci-0000:00:1f.2-ata-1-part1".to_string()],
        )
    }

    #[test]
    fn aliases_cover_all_udev_links() {
        let device = sample();
        let aliases = device.aliases();
        assert_eq!(aliases.len(), 3);
        assert_eq!(aliases[0], "/dev/sda1");
        assert!(aliases.contains(&"/dev/disk/by-id/scsi-0QEMU_HARDDISK-part1"));
        assert!(aliases.contains(&"/dev/disk/by-path/pci-0000:00:1f.2-ata-1-part1"));
    }

    #[test]
    fn preferred_name_favours_by_id() {
        assert_eq!(
            sample().preferred_name(),
            "/dev/disk/by-id/scsi-0QEMU_HARDDISK-part1"
        );
        assert_eq!(BlockDevice::new("/dev/sdb2").preferred_name(), "/dev/sdb2");
    }

    #[test]
    fn known_as_rejects_unrelated_names() {
        let device = sample();
        assert!(device.known_as("/dev/sda1"));
        assert!(!device.known_as("/dev/sdb1"));
    }
}
