//! Sector geometry tuning.
//!
//! Maps device sector geometry to a ZFS ashift and, as a separate and
//! explicitly destructive operation, reformats an NVMe namespace to 4K
//! sectors. `optimal_ashift` never reformats anything.

use tracing::{info, warn};

use crate::device::BlockDevice;
use crate::error::{ProvisionError, Result};
use crate::exec::{Executor, Invocation};

/// Fallback when the sector size cannot be determined or mapped.
pub const DEFAULT_ASHIFT: u8 = 12;

/// The chosen ashift for one device, with a warning when it fell back.
#[derive(Debug, Clone)]
pub struct AshiftChoice {
    pub ashift: u8,
    pub warning: Option<String>,
}

/// Exact mapping from a power-of-two sector size to an ashift (512 -> 9
/// through 8192 -> 13). Anything else is unmappable.
pub fn ashift_for_block_size(size: u32) -> Option<u8> {
    match size {
        512 => Some(9),
        1024 => Some(10),
        2048 => Some(11),
        4096 => Some(12),
        8192 => Some(13),
        _ => None,
    }
}

/// Compute the optimal ashift for a device.
///
/// NVMe devices use their in-use LBA format's data size when known, else the
/// largest supported size not exceeding 8192. Other devices use the reported
/// physical block size.
pub fn optimal_ashift(device: &BlockDevice) -> AshiftChoice {
    let size = if device.controller.is_nvme() {
        nvme_sector_size(device)
    } else if device.physical_block_size > 0 {
        Some(device.physical_block_size)
    } else {
        None
    };

    match size.and_then(ashift_for_block_size) {
        Some(ashift) => AshiftChoice {
            ashift,
            warning: None,
        },
        None => {
            let warning = format!(
                "{}: sector size {} - defaulting to ashift {}",
                device.path.display(),
                size.map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                DEFAULT_ASHIFT
            );
            warn!("{}", warning);
            AshiftChoice {
                ashift: DEFAULT_ASHIFT,
                warning: Some(warning),
            }
        }
    }
}

fn nvme_sector_size(device: &BlockDevice) -> Option<u32> {
    if let Some(in_use) = device.lba_formats.iter().find(|f| f.in_use) {
        return Some(in_use.data_size);
    }
    device
        .lba_formats
        .iter()
        .map(|f| f.data_size)
        .filter(|&size| size <= 8192)
        .max()
}

/// The pool-wide ashift: the largest value any member device requires, so no
/// device is under-aligned. An explicit override wins.
pub fn pool_ashift(devices: &[BlockDevice], override_ashift: Option<u8>) -> u8 {
    if let Some(ashift) = override_ashift {
        info!(ashift, "using explicit ashift override");
        return ashift;
    }
    devices
        .iter()
        .map(|d| optimal_ashift(d).ashift)
        .max()
        .unwrap_or(DEFAULT_ASHIFT)
}

/// Reformat an NVMe namespace to 4096-byte sectors. Destroys all data on the
/// namespace; requires an advertised 4K LBA format and a confirmation unless
/// forced. Never invoked implicitly.
pub fn reformat_to_4k(
    device: &BlockDevice,
    executor: &mut Executor,
    force: bool,
    confirm: &dyn Fn(&str) -> bool,
) -> Result<()> {
    if !device.controller.is_nvme() {
        return Err(ProvisionError::capability(format!(
            "{} is not an NVMe device",
            device.path.display()
        )));
    }

    let target = device
        .lba_formats
        .iter()
        .find(|f| f.data_size == 4096)
        .ok_or_else(|| {
            ProvisionError::capability(format!(
                "{} does not advertise a 4096-byte LBA format",
                device.path.display()
            ))
        })?;

    if target.in_use {
        info!(device = %device.path.display(), "already formatted with 4096-byte sectors");
        return Ok(());
    }

    if !force {
        let prompt = format!(
            "Reformat {} to 4096-byte sectors? This destroys ALL data on the namespace.",
            device.path.display()
        );
        if !confirm(&prompt) {
            return Err(ProvisionError::validation(format!(
                "reformat of {} declined",
                device.path.display()
            )));
        }
    }

    executor.run(
        Invocation::new("nvme")
            .arg("format")
            .arg_path(&device.path)
            .arg(format!("--lbaf={}", target.index))
            .arg("--force"),
    )?;
    info!(device = %device.path.display(), lbaf = target.index, "namespace reformatted to 4K");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{device, gib};
    use crate::device::LbaFormat;

    #[test]
    fn block_size_mapping_is_exact() {
        assert_eq!(ashift_for_block_size(512), Some(9));
        assert_eq!(ashift_for_block_size(4096), Some(12));
        assert_eq!(ashift_for_block_size(8192), Some(13));
        assert_eq!(ashift_for_block_size(520), None);
        assert_eq!(ashift_for_block_size(0), None);
    }

    #[test]
    fn sata_device_uses_physical_block_size() {
        let mut dev = device("sda", gib(64));
        dev.physical_block_size = 512;
        assert_eq!(optimal_ashift(&dev).ashift, 9);

        dev.physical_block_size = 4096;
        assert_eq!(optimal_ashift(&dev).ashift, 12);
    }

    #[test]
    fn odd_block_size_warns_and_defaults() {
        let mut dev = device("sda", gib(64));
        dev.physical_block_size = 520;
        let choice = optimal_ashift(&dev);
        assert_eq!(choice.ashift, DEFAULT_ASHIFT);
        assert!(choice.warning.is_some());
    }

    #[test]
    fn nvme_prefers_in_use_format() {
        let mut dev = device("nvme0n1", gib(256));
        dev.lba_formats = vec![
            LbaFormat {
                index: 0,
                data_size: 512,
                in_use: true,
            },
            LbaFormat {
                index: 1,
                data_size: 4096,
                in_use: false,
            },
        ];
        assert_eq!(optimal_ashift(&dev).ashift, 9);
    }

    #[test]
    fn nvme_without_in_use_takes_largest_not_above_8k() {
        let mut dev = device("nvme0n1", gib(256));
        dev.lba_formats = vec![
            LbaFormat {
                index: 0,
                data_size: 512,
                in_use: false,
            },
            LbaFormat {
                index: 1,
                data_size: 4096,
                in_use: false,
            },
            LbaFormat {
                index: 2,
                data_size: 16384,
                in_use: false,
            },
        ];
        assert_eq!(optimal_ashift(&dev).ashift, 12);
    }

    #[test]
    fn nvme_without_formats_warns_and_defaults() {
        let dev = device("nvme0n1", gib(256));
        let choice = optimal_ashift(&dev);
        assert_eq!(choice.ashift, DEFAULT_ASHIFT);
        assert!(choice.warning.is_some());
    }

    #[test]
    fn pool_ashift_takes_the_maximum() {
        let mut a = device("sda", gib(64));
        a.physical_block_size = 512;
        let mut b = device("sdb", gib(64));
        b.physical_block_size = 8192;
        assert_eq!(pool_ashift(&[a, b], None), 13);
    }

    #[test]
    fn pool_ashift_override_wins() {
        let mut a = device("sda", gib(64));
        a.physical_block_size = 512;
        assert_eq!(pool_ashift(&[a], Some(12)), 12);
    }

    #[test]
    fn reformat_requires_nvme() {
        let dev = device("sda", gib(64));
        let mut ex = Executor::new(true);
        let err = reformat_to_4k(&dev, &mut ex, true, &|_| true).unwrap_err();
        assert!(matches!(err, ProvisionError::Capability(_)));
    }

    #[test]
    fn reformat_requires_4k_format() {
        let mut dev = device("nvme0n1", gib(256));
        dev.lba_formats = vec![LbaFormat {
            index: 0,
            data_size: 512,
            in_use: true,
        }];
        let mut ex = Executor::new(true);
        let err = reformat_to_4k(&dev, &mut ex, true, &|_| true).unwrap_err();
        assert!(matches!(err, ProvisionError::Capability(_)));
    }

    #[test]
    fn reformat_declined_without_confirmation() {
        let mut dev = device("nvme0n1", gib(256));
        dev.lba_formats = vec![
            LbaFormat {
                index: 0,
                data_size: 512,
                in_use: true,
            },
            LbaFormat {
                index: 1,
                data_size: 4096,
                in_use: false,
            },
        ];
        let mut ex = Executor::new(true);
        let err = reformat_to_4k(&dev, &mut ex, false, &|_| false).unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
        assert!(ex.transcript().is_empty());
    }

    #[test]
    fn reformat_runs_nvme_format_with_target_lbaf() {
        let mut dev = device("nvme0n1", gib(256));
        dev.lba_formats = vec![
            LbaFormat {
                index: 0,
                data_size: 512,
                in_use: true,
            },
            LbaFormat {
                index: 1,
                data_size: 4096,
                in_use: false,
            },
        ];
        let mut ex = Executor::new(true);
        reformat_to_4k(&dev, &mut ex, true, &|_| true).unwrap();
        assert_eq!(ex.transcript().len(), 1);
        assert!(ex.transcript()[0].command.contains("--lbaf=1"));
    }

    #[test]
    fn reformat_noop_when_already_4k() {
        let mut dev = device("nvme0n1", gib(256));
        dev.lba_formats = vec![LbaFormat {
            index: 0,
            data_size: 4096,
            in_use: true,
        }];
        let mut ex = Executor::new(true);
        reformat_to_4k(&dev, &mut ex, true, &|_| true).unwrap();
        assert!(ex.transcript().is_empty());
    }
}
