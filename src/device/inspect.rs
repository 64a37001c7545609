//! Device discovery and enrichment.
//!
//! Walks /sys/class/block for whole-disk devices, resolves configured device
//! paths to [`BlockDevice`] records, and enriches them with SMART health,
//! TRIM capability and NVMe LBA formats via read-only probes. Nothing here
//! mutates a device.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::device::{base_device_name, BlockDevice, LbaFormat, SmartHealth};
use crate::error::{ProvisionError, Result};
use crate::exec::{probe, Invocation};

/// Scan for all whole-disk block devices, skipping partitions, loop devices
/// and optical drives.
pub fn scan() -> Result<Vec<BlockDevice>> {
    let block_path = Path::new("/sys/class/block");
    if !block_path.exists() {
        return Err(ProvisionError::validation(
            "/sys/class/block not found - are you on Linux?",
        ));
    }

    let mut devices = Vec::new();
    for entry in fs::read_dir(block_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if is_partition_name(&name) || name.starts_with("loop") || name.starts_with("sr") {
            continue;
        }

        match BlockDevice::from_name(&name) {
            Ok(mut device) => {
                enrich(&mut device);
                devices.push(device);
            }
            Err(e) => debug!(device = %name, error = %e, "skipping device"),
        }
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

/// Resolve configured device paths to enriched device records, preserving
/// the session order.
pub fn resolve(paths: &[PathBuf]) -> Result<Vec<BlockDevice>> {
    let mut devices = Vec::new();
    for path in paths {
        let name = path
            .file_name()
            .ok_or_else(|| {
                ProvisionError::validation(format!("{} is not a device path", path.display()))
            })?
            .to_string_lossy()
            .to_string();
        let mut device = BlockDevice::from_name(&name)?;
        enrich(&mut device);
        devices.push(device);
    }
    Ok(devices)
}

/// Whether a /sys/class/block entry names a partition rather than a disk.
fn is_partition_name(name: &str) -> bool {
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return base_device_name(name) != name;
    }
    matches!(name.chars().last(), Some(c) if c.is_ascii_digit())
}

/// Fill in the advisory fields sysfs alone cannot provide.
fn enrich(device: &mut BlockDevice) {
    device.trim_supported = trim_supported(&device.sys_path);
    device.smart = smart_health(&device.path);
    if device.controller.is_nvme() {
        device.lba_formats = nvme_lba_formats(&device.path);
    }
}

fn trim_supported(sys_path: &Path) -> bool {
    fs::read_to_string(sys_path.join("queue/discard_granularity"))
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|granularity| granularity > 0)
        .unwrap_or(false)
}

/// SMART health via smartctl; anything that doesn't clearly say PASSED or
/// FAILED is Unknown. Health is advisory, so probe failures are fine.
fn smart_health(dev_path: &Path) -> SmartHealth {
    let inv = Invocation::new("smartctl").arg("-H").arg_path(dev_path);
    match probe(&inv) {
        Ok(out) => {
            let text = out.stdout;
            if text.contains("PASSED") || text.contains("OK") {
                SmartHealth::Passed
            } else if text.contains("FAILED") {
                SmartHealth::Failed
            } else {
                SmartHealth::Unknown
            }
        }
        Err(e) => {
            debug!(device = %dev_path.display(), error = %e, "smartctl unavailable");
            SmartHealth::Unknown
        }
    }
}

/// Supported LBA formats from `nvme id-ns -o json`: the `lbafs` array
/// carries `ds` (log2 of the data size) and `flbas` names the in-use index.
fn nvme_lba_formats(dev_path: &Path) -> Vec<LbaFormat> {
    let inv = Invocation::new("nvme")
        .arg("id-ns")
        .arg_path(dev_path)
        .args(["-o", "json"]);
    let out = match probe(&inv) {
        Ok(out) if out.success() => out,
        _ => return Vec::new(),
    };
    parse_lba_formats(&out.stdout).unwrap_or_default()
}

fn parse_lba_formats(json: &str) -> Option<Vec<LbaFormat>> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    // Low nibble of flbas selects the in-use format.
    let in_use = (value.get("flbas")?.as_u64()? & 0x0f) as u32;
    let lbafs = value.get("lbafs")?.as_array()?;

    let mut formats = Vec::new();
    for (index, entry) in lbafs.iter().enumerate() {
        let ds = entry.get("ds")?.as_u64()?;
        if ds == 0 {
            continue; // unformatted slot
        }
        formats.push(LbaFormat {
            index: index as u32,
            data_size: 1u32 << ds,
            in_use: index as u32 == in_use,
        });
    }
    Some(formats)
}

/// The base name of the device backing the running root filesystem, or None
/// when the root is not directly /dev-backed (ZFS or overlay roots).
pub fn root_backing_device() -> Option<String> {
    let mounts = fs::read_to_string("/proc/mounts").ok()?;
    root_backing_device_from(&mounts)
}

fn root_backing_device_from(mounts: &str) -> Option<String> {
    // Later mount entries override earlier ones.
    let source = mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            (target == "/").then(|| source.to_string())
        })
        .last()?;

    if !source.starts_with("/dev/") {
        return None;
    }

    // Resolve by-uuid/by-id symlinks to the real node.
    let resolved = fs::canonicalize(&source).unwrap_or_else(|_| PathBuf::from(&source));
    let name = resolved.file_name()?.to_string_lossy().to_string();
    Some(base_device_name(&name).to_string())
}

/// Partition names from the live mount table whose name is prefixed by the
/// device name.
pub fn mounted_partitions_of(mounts: &str, device_name: &str) -> Vec<String> {
    let prefix = format!("/dev/{}", device_name);
    let mut seen = HashSet::new();
    let mut mounted = Vec::new();
    for line in mounts.lines() {
        let Some(source) = line.split_whitespace().next() else {
            continue;
        };
        if source.starts_with(&prefix) && seen.insert(source.to_string()) {
            mounted.push(source.trim_start_matches("/dev/").to_string());
        }
    }
    mounted
}

/// Device names that appear as members in the software-RAID state table.
pub fn mdraid_members(mdstat: &str) -> HashSet<String> {
    let mut members = HashSet::new();
    // Format: "md0 : active raid1 sda1[0] sdb1[1]"
    for line in mdstat.lines() {
        if !line.starts_with("md") {
            continue;
        }
        let Some((_, rest)) = line.split_once(':') else {
            continue;
        };
        for token in rest.split_whitespace() {
            if let Some((name, _)) = token.split_once('[') {
                members.insert(base_device_name(name).to_string());
            }
        }
    }
    members
}
