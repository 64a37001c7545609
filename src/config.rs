//! Provisioning configuration.
//!
//! An explicit [`ProvisioningConfig`] value is passed to every stage; there is
//! no ambient global state. The CLI builds one from its arguments and
//! validates it before a session is created.

use std::path::PathBuf;

use bytesize::ByteSize;
use serde::Serialize;

use crate::error::{ProvisionError, Result};

/// Redundancy policy for the root pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RedundancyClass {
    /// Single device or stripe, no fault tolerance.
    None,
    /// All devices mirrored; survives loss of all but one.
    Mirror,
    /// Single parity.
    Raidz1,
    /// Double parity.
    Raidz2,
    /// Triple parity.
    Raidz3,
}

impl RedundancyClass {
    /// Minimum number of member devices.
    pub fn min_devices(&self) -> usize {
        match self {
            Self::None => 1,
            Self::Mirror => 2,
            Self::Raidz1 => 3,
            Self::Raidz2 => 4,
            Self::Raidz3 => 5,
        }
    }

    /// How many member devices may fail without data loss.
    pub fn fault_tolerance(&self, n_devices: usize) -> usize {
        match self {
            Self::None => 0,
            Self::Mirror => n_devices.saturating_sub(1),
            Self::Raidz1 => 1,
            Self::Raidz2 => 2,
            Self::Raidz3 => 3,
        }
    }

    /// The vdev token passed to pool creation, if any.
    pub fn vdev_token(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Mirror => Some("mirror"),
            Self::Raidz1 => Some("raidz1"),
            Self::Raidz2 => Some("raidz2"),
            Self::Raidz3 => Some("raidz3"),
        }
    }

    /// Fail with the exact deficit when too few devices are supplied.
    pub fn require_devices(&self, have: usize) -> Result<()> {
        let need = self.min_devices();
        if have < need {
            return Err(ProvisionError::validation(format!(
                "{} requires at least {} drives, got {}",
                self, need, have
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for RedundancyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Mirror => write!(f, "mirror"),
            Self::Raidz1 => write!(f, "raidz1"),
            Self::Raidz2 => write!(f, "raidz2"),
            Self::Raidz3 => write!(f, "raidz3"),
        }
    }
}

/// Pool compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Off,
    Lz4,
    #[default]
    Zstd,
    Gzip,
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Lz4 => write!(f, "lz4"),
            Self::Zstd => write!(f, "zstd"),
            Self::Gzip => write!(f, "gzip"),
        }
    }
}

/// Everything a provisioning session needs to know.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// ZFS pool name.
    pub pool_name: String,
    /// Target devices, in session order.
    pub devices: Vec<PathBuf>,
    /// Redundancy class for the pool.
    pub redundancy: RedundancyClass,
    /// EFI system partition size.
    pub efi_size: ByteSize,
    /// Swap partition size; zero disables swap entirely.
    pub swap_size: ByteSize,
    /// Explicit ashift override. None means auto-detect per device.
    pub ashift: Option<u8>,
    /// Compression algorithm.
    pub compression: Compression,
    /// Log every action but execute nothing destructive.
    pub dry_run: bool,
    /// Override overridable fatal fitness findings and skip confirmations.
    pub force: bool,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            pool_name: "zroot".to_string(),
            devices: Vec::new(),
            redundancy: RedundancyClass::None,
            efi_size: ByteSize::gib(1),
            swap_size: ByteSize::gib(8),
            ashift: None,
            compression: Compression::default(),
            dry_run: false,
            force: false,
        }
    }
}

impl ProvisioningConfig {
    /// Validate the configuration before a session starts.
    pub fn validate(&self) -> Result<()> {
        if self.pool_name.is_empty() {
            return Err(ProvisionError::validation("pool name cannot be empty"));
        }
        if !self
            .pool_name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(ProvisionError::validation(format!(
                "pool name '{}' may only contain alphanumerics, '_', '-' and '.'",
                self.pool_name
            )));
        }

        if self.devices.is_empty() {
            return Err(ProvisionError::validation(
                "at least one device must be selected",
            ));
        }
        self.redundancy.require_devices(self.devices.len())?;

        if let Some(ashift) = self.ashift {
            if !(9..=13).contains(&ashift) {
                return Err(ProvisionError::validation(format!(
                    "ashift must be between 9 and 13, got {}",
                    ashift
                )));
            }
        }

        if self.efi_size < ByteSize::mib(100) {
            return Err(ProvisionError::validation(
                "EFI partition must be at least 100 MiB",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_devices_per_class() {
        assert_eq!(RedundancyClass::None.min_devices(), 1);
        assert_eq!(RedundancyClass::Mirror.min_devices(), 2);
        assert_eq!(RedundancyClass::Raidz1.min_devices(), 3);
        assert_eq!(RedundancyClass::Raidz2.min_devices(), 4);
        assert_eq!(RedundancyClass::Raidz3.min_devices(), 5);
    }

    #[test]
    fn fault_tolerance_counts() {
        assert_eq!(RedundancyClass::None.fault_tolerance(1), 0);
        assert_eq!(RedundancyClass::Mirror.fault_tolerance(3), 2);
        assert_eq!(RedundancyClass::Raidz1.fault_tolerance(4), 1);
        assert_eq!(RedundancyClass::Raidz2.fault_tolerance(6), 2);
        assert_eq!(RedundancyClass::Raidz3.fault_tolerance(8), 3);
    }

    #[test]
    fn deficit_message_is_exact() {
        let err = RedundancyClass::Raidz1.require_devices(2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed: raidz1 requires at least 3 drives, got 2"
        );
    }

    #[test]
    fn empty_device_list_rejected() {
        let config = ProvisioningConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn mirror_with_one_device_rejected() {
        let config = ProvisioningConfig {
            devices: vec![PathBuf::from("/dev/sda")],
            redundancy: RedundancyClass::Mirror,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_mirror_config_accepted() {
        let config = ProvisioningConfig {
            devices: vec![PathBuf::from("/dev/sda"), PathBuf::from("/dev/sdb")],
            redundancy: RedundancyClass::Mirror,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn pool_name_charset_enforced() {
        let config = ProvisioningConfig {
            pool_name: "pool/name".to_string(),
            devices: vec![PathBuf::from("/dev/sda")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn ashift_override_range_enforced() {
        let config = ProvisioningConfig {
            devices: vec![PathBuf::from("/dev/sda")],
            ashift: Some(14),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
