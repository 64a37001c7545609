//! Block device model.
//!
//! A [`BlockDevice`] is read-only to the core until the pipeline's Wiping
//! stage: discovery fills it in from sysfs and probe commands, and nothing
//! mutates the device before the destructive stages begin.

pub mod fitness;
pub mod inspect;
pub mod sector;

use std::fs;
use std::path::{Path, PathBuf};

use bytesize::ByteSize;

use crate::error::{ProvisionError, Result};

/// Storage controller class, detected from the device name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerClass {
    Nvme,
    Sata,
    Mmc,
    Virtual,
    Unknown,
}

impl ControllerClass {
    pub fn is_nvme(&self) -> bool {
        matches!(self, Self::Nvme)
    }
}

impl std::fmt::Display for ControllerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nvme => write!(f, "NVMe"),
            Self::Sata => write!(f, "SATA"),
            Self::Mmc => write!(f, "MMC"),
            Self::Virtual => write!(f, "Virtual"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Advisory SMART health, as reported by smartctl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmartHealth {
    Passed,
    Failed,
    #[default]
    Unknown,
}

/// One advertised NVMe LBA format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbaFormat {
    /// Format index, as passed to `nvme format --lbaf`.
    pub index: u32,
    /// Logical block data size in bytes.
    pub data_size: u32,
    /// Whether the namespace currently uses this format.
    pub in_use: bool,
}

/// An existing partition discovered on a device.
#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub number: u32,
    pub path: PathBuf,
}

/// A candidate block device.
#[derive(Debug, Clone)]
pub struct BlockDevice {
    /// Kernel name (e.g. sda, nvme0n1).
    pub name: String,
    /// Device node (e.g. /dev/sda).
    pub path: PathBuf,
    /// Sysfs directory (e.g. /sys/block/sda).
    pub sys_path: PathBuf,
    pub controller: ControllerClass,
    /// Size in bytes.
    pub size: u64,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
    pub rotational: bool,
    pub removable: bool,
    pub readonly: bool,
    /// Partitions currently present, sorted by number.
    pub partitions: Vec<Partition>,
    /// NVMe LBA formats; empty for other controllers or when unreadable.
    pub lba_formats: Vec<LbaFormat>,
    pub smart: SmartHealth,
    pub trim_supported: bool,
}

impl BlockDevice {
    /// Build a device record from sysfs. SMART health, TRIM capability and
    /// NVMe LBA formats are filled in separately by the inspector.
    pub fn from_name(name: &str) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/{}", name));
        let sys_path = PathBuf::from(format!("/sys/block/{}", name));

        if !sys_path.exists() {
            return Err(ProvisionError::validation(format!(
                "{} is not a block device",
                path.display()
            )));
        }

        // sysfs reports size in 512-byte sectors
        let size = read_sys_value(&sys_path, "size")?
            .parse::<u64>()
            .map_err(|e| ProvisionError::Parse(e.to_string()))?
            * 512;

        let logical_block_size = read_sys_value(&sys_path, "queue/logical_block_size")?
            .parse::<u32>()
            .map_err(|e| ProvisionError::Parse(e.to_string()))?;
        let physical_block_size = read_sys_value(&sys_path, "queue/physical_block_size")?
            .parse::<u32>()
            .map_err(|e| ProvisionError::Parse(e.to_string()))?;

        let rotational = read_sys_value(&sys_path, "queue/rotational")
            .unwrap_or_else(|_| "1".to_string())
            == "1";
        let removable =
            read_sys_value(&sys_path, "removable").unwrap_or_else(|_| "0".to_string()) == "1";
        let readonly = read_sys_value(&sys_path, "ro").unwrap_or_else(|_| "0".to_string()) == "1";

        let partitions = discover_partitions(&sys_path, name);

        Ok(Self {
            name: name.to_string(),
            path,
            sys_path,
            controller: detect_controller(name),
            size,
            logical_block_size,
            physical_block_size,
            rotational,
            removable,
            readonly,
            partitions,
            lba_formats: Vec::new(),
            smart: SmartHealth::Unknown,
            trim_supported: false,
        })
    }

    /// Device node for partition `number`, using the shared naming rule.
    pub fn partition_path(&self, number: u32) -> PathBuf {
        partition_device_path(&self.name, number)
    }

    pub fn size_human(&self) -> String {
        ByteSize(self.size).to_string_as(true)
    }
}

/// Device node path for a numbered partition on the named device.
///
/// NVMe-pattern devices (and MMC, which shares the convention) take a `pN`
/// infix; everything else takes a bare numeric suffix. Every consumer of
/// partition paths goes through this one rule.
pub fn partition_device_path(device_name: &str, number: u32) -> PathBuf {
    if uses_p_infix(device_name) {
        PathBuf::from(format!("/dev/{}p{}", device_name, number))
    } else {
        PathBuf::from(format!("/dev/{}{}", device_name, number))
    }
}

fn uses_p_infix(device_name: &str) -> bool {
    device_name.starts_with("nvme") || device_name.starts_with("mmcblk")
}

/// Strip a trailing partition number (and the `pN` infix for NVMe-pattern
/// names) to get the base device name. A whole-device name passes through
/// unchanged.
pub fn base_device_name(name: &str) -> &str {
    if uses_p_infix(name) {
        if let Some(idx) = name.rfind('p') {
            let suffix = &name[idx + 1..];
            let prefix = &name[..idx];
            if !suffix.is_empty()
                && suffix.chars().all(|c| c.is_ascii_digit())
                && prefix.ends_with(|c: char| c.is_ascii_digit())
            {
                return prefix;
            }
        }
        name
    } else {
        name.trim_end_matches(|c: char| c.is_ascii_digit())
    }
}

fn detect_controller(name: &str) -> ControllerClass {
    if name.starts_with("nvme") {
        ControllerClass::Nvme
    } else if name.starts_with("sd") {
        ControllerClass::Sata
    } else if name.starts_with("mmcblk") {
        ControllerClass::Mmc
    } else if name.starts_with("vd") || name.starts_with("loop") {
        ControllerClass::Virtual
    } else {
        ControllerClass::Unknown
    }
}

fn read_sys_value(sys_path: &Path, attr: &str) -> Result<String> {
    let path = sys_path.join(attr);
    fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(ProvisionError::Io)
}

fn discover_partitions(sys_path: &Path, device_name: &str) -> Vec<Partition> {
    let mut partitions = Vec::new();

    let Ok(entries) = fs::read_dir(sys_path) else {
        return partitions;
    };
    for entry in entries.flatten() {
        let entry_name = entry.file_name();
        let entry_name = entry_name.to_string_lossy();
        if !entry_name.starts_with(device_name) || entry_name.len() == device_name.len() {
            continue;
        }

        let suffix = &entry_name[device_name.len()..];
        let number_str = suffix.strip_prefix('p').unwrap_or(suffix);
        if let Ok(number) = number_str.parse::<u32>() {
            partitions.push(Partition {
                name: entry_name.to_string(),
                number,
                path: PathBuf::from(format!("/dev/{}", entry_name)),
            });
        }
    }

    partitions.sort_by_key(|p| p.number);
    partitions
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_detection() {
        assert_eq!(detect_controller("sda"), ControllerClass::Sata);
        assert_eq!(detect_controller("nvme0n1"), ControllerClass::Nvme);
        assert_eq!(detect_controller("mmcblk0"), ControllerClass::Mmc);
        assert_eq!(detect_controller("vda"), ControllerClass::Virtual);
        assert_eq!(detect_controller("hda"), ControllerClass::Unknown);
    }

    #[test]
    fn partition_paths_use_p_infix_for_nvme_only() {
        assert_eq!(
            partition_device_path("sda", 3),
            PathBuf::from("/dev/sda3")
        );
        assert_eq!(
            partition_device_path("nvme0n1", 3),
            PathBuf::from("/dev/nvme0n1p3")
        );
        assert_eq!(
            partition_device_path("mmcblk0", 1),
            PathBuf::from("/dev/mmcblk0p1")
        );
    }

    #[test]
    fn base_name_strips_partition_suffix() {
        assert_eq!(base_device_name("sda2"), "sda");
        assert_eq!(base_device_name("sda12"), "sda");
        assert_eq!(base_device_name("vda1"), "vda");
        assert_eq!(base_device_name("nvme0n1p2"), "nvme0n1");
        assert_eq!(base_device_name("mmcblk0p1"), "mmcblk0");
    }

    #[test]
    fn base_name_leaves_whole_devices_alone() {
        assert_eq!(base_device_name("sda"), "sda");
        assert_eq!(base_device_name("nvme0n1"), "nvme0n1");
        assert_eq!(base_device_name("mmcblk0"), "mmcblk0");
    }

    #[test]
    fn partitions_discovered_from_sysfs_layout() {
        let sys = tempfile::tempdir().unwrap();
        fs::create_dir(sys.path().join("sda2")).unwrap();
        fs::create_dir(sys.path().join("sda1")).unwrap();
        fs::create_dir(sys.path().join("queue")).unwrap();

        let partitions = discover_partitions(sys.path(), "sda");
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].number, 1);
        assert_eq!(partitions[0].path, PathBuf::from("/dev/sda1"));
        assert_eq!(partitions[1].number, 2);
    }

    #[test]
    fn nvme_partitions_discovered_with_infix() {
        let sys = tempfile::tempdir().unwrap();
        fs::create_dir(sys.path().join("nvme0n1p1")).unwrap();

        let partitions = discover_partitions(sys.path(), "nvme0n1");
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].path, PathBuf::from("/dev/nvme0n1p1"));
    }
}
