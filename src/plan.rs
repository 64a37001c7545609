//! Partition topology planning.
//!
//! Turns a redundancy class and a device list into a concrete, per-device
//! partition plan. Partition numbering restarts at 1 on every device; the
//! plan is per-device, not global. The serialized plan is the boundary
//! artifact handed to downstream collaborators.

use std::path::PathBuf;

use bytesize::ByteSize;
use serde::Serialize;

use crate::config::RedundancyClass;
use crate::device::{partition_device_path, BlockDevice};
use crate::error::{ProvisionError, Result};

/// Floor reserved for the ZFS partition when checking that fixed-size
/// partitions fit on a device.
pub const ZFS_MIN_SIZE: ByteSize = ByteSize(1024 * 1024 * 1024);

/// What a partition is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    Efi,
    Swap,
    Zfs,
}

impl PartitionRole {
    /// GPT type code, as understood by sgdisk.
    pub fn type_code(&self) -> &'static str {
        match self {
            Self::Efi => "EF00",  // EFI System
            Self::Swap => "8200", // Linux swap
            Self::Zfs => "BF00",  // Solaris root (ZFS)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Efi => "EFI",
            Self::Swap => "swap",
            Self::Zfs => "zfs",
        }
    }
}

/// How a partition is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizePolicy {
    Fixed(ByteSize),
    /// All remaining space on the device. Always and only the final
    /// (ZFS) partition.
    Remainder,
}

/// One planned partition on one device.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionSpec {
    /// 1-based index within its device.
    pub number: u32,
    pub role: PartitionRole,
    pub size: SizePolicy,
}

/// The ordered partition layout for a single device.
#[derive(Debug, Clone, Serialize)]
pub struct DevicePlan {
    pub device: String,
    pub device_path: PathBuf,
    pub partitions: Vec<PartitionSpec>,
}

impl DevicePlan {
    /// Partition node path via the shared naming rule.
    pub fn partition_path(&self, number: u32) -> PathBuf {
        partition_device_path(&self.device, number)
    }

    fn path_of_role(&self, role: PartitionRole) -> Option<PathBuf> {
        self.partitions
            .iter()
            .find(|p| p.role == role)
            .map(|p| self.partition_path(p.number))
    }

    pub fn efi_partition(&self) -> PathBuf {
        // Every plan has an EFI partition by construction.
        self.path_of_role(PartitionRole::Efi)
            .unwrap_or_else(|| self.partition_path(1))
    }

    pub fn swap_partition(&self) -> Option<PathBuf> {
        self.path_of_role(PartitionRole::Swap)
    }

    pub fn zfs_partition(&self) -> PathBuf {
        let number = self
            .partitions
            .last()
            .map(|p| p.number)
            .unwrap_or(1);
        self.partition_path(number)
    }
}

/// The complete plan: one entry per device, in session order.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionPlan {
    pub devices: Vec<DevicePlan>,
}

impl PartitionPlan {
    pub fn zfs_partitions(&self) -> Vec<PathBuf> {
        self.devices.iter().map(|d| d.zfs_partition()).collect()
    }

    pub fn efi_partitions(&self) -> Vec<PathBuf> {
        self.devices.iter().map(|d| d.efi_partition()).collect()
    }
}

/// Plan partitions for every device.
///
/// Each device gets the same layout, assigned independently: partition 1 is
/// the EFI system partition, partition 2 is swap (omitted entirely when
/// `swap_size` is zero), and the final partition is ZFS taking all remaining
/// space.
pub fn plan(
    devices: &[BlockDevice],
    redundancy: RedundancyClass,
    efi_size: ByteSize,
    swap_size: ByteSize,
) -> Result<PartitionPlan> {
    redundancy.require_devices(devices.len())?;

    let mut too_small = Vec::new();
    let mut device_plans = Vec::new();

    for device in devices {
        let fixed_total = efi_size.0 + swap_size.0;
        if fixed_total + ZFS_MIN_SIZE.0 > device.size {
            too_small.push(format!(
                "{} cannot hold {} of fixed partitions plus a ZFS partition ({} available)",
                device.path.display(),
                ByteSize(fixed_total).to_string_as(true),
                device.size_human()
            ));
            continue;
        }

        let mut partitions = Vec::new();
        let mut number = 1;

        partitions.push(PartitionSpec {
            number,
            role: PartitionRole::Efi,
            size: SizePolicy::Fixed(efi_size),
        });
        number += 1;

        if swap_size.0 > 0 {
            partitions.push(PartitionSpec {
                number,
                role: PartitionRole::Swap,
                size: SizePolicy::Fixed(swap_size),
            });
            number += 1;
        }

        partitions.push(PartitionSpec {
            number,
            role: PartitionRole::Zfs,
            size: SizePolicy::Remainder,
        });

        device_plans.push(DevicePlan {
            device: device.name.clone(),
            device_path: device.path.clone(),
            partitions,
        });
    }

    if !too_small.is_empty() {
        return Err(ProvisionError::Validation(too_small.join("; ")));
    }

    Ok(PartitionPlan {
        devices: device_plans,
    })
}
