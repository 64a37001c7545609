//! Device fitness validation.
//!
//! Decides whether a candidate device may be destructively operated on. The
//! rules run in a fixed order; the root-device safety check is second and is
//! the only fatal finding that `--force` can never clear.

use std::collections::HashSet;
use std::fs;

use tracing::warn;

use crate::device::{base_device_name, BlockDevice, SmartHealth};
use crate::device::inspect;

/// Minimum usable device size.
pub const MIN_DEVICE_SIZE: u64 = 8 * 1024 * 1024 * 1024;

/// Snapshot of the host facts the validator consults. Captured once per
/// session so every device is judged against the same state.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// Base name of the device backing the running root, if /dev-backed.
    pub root_base: Option<String>,
    /// Contents of the live mount table.
    pub mounts: String,
    /// Contents of the software-RAID state table.
    pub mdstat: String,
}

impl HostState {
    pub fn capture() -> Self {
        Self {
            root_base: inspect::root_backing_device(),
            mounts: fs::read_to_string("/proc/mounts").unwrap_or_default(),
            mdstat: fs::read_to_string("/proc/mdstat").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingCode {
    NoSuchDevice,
    SafetyViolation,
    MountedPartitions,
    RaidMember,
    ReadOnly,
    TooSmall,
    SmartFailed,
    SmartHealth,
    TrimCapable,
}

/// A single fitness finding, in evaluation order within its report.
#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub code: FindingCode,
    pub message: String,
}

impl Finding {
    fn fatal(code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            code,
            message: message.into(),
        }
    }

    fn warning(code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
        }
    }

    fn info(code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code,
            message: message.into(),
        }
    }

    /// The safety violation is the one fatal finding force can never clear.
    pub fn force_overridable(&self) -> bool {
        self.code != FindingCode::SafetyViolation
    }
}

/// Immutable result of validating one device. Produced once per device per
/// session.
#[derive(Debug, Clone)]
pub struct FitnessReport {
    pub device: String,
    pub findings: Vec<Finding>,
    pub eligible: bool,
}

impl FitnessReport {
    pub fn has_safety_violation(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.code == FindingCode::SafetyViolation)
    }

    /// Fatal findings that block the session (after the force override).
    pub fn blocking_findings(&self, force: bool) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(move |f| f.severity == Severity::Fatal && (!force || !f.force_overridable()))
    }
}

/// Validate one device against the host state. Rules run in fixed order;
/// a safety violation short-circuits the rest.
pub fn validate(device: &BlockDevice, host: &HostState, force: bool) -> FitnessReport {
    let mut findings = Vec::new();

    // 1. The node must exist as a block device.
    if !device.sys_path.exists() {
        findings.push(Finding::fatal(
            FindingCode::NoSuchDevice,
            format!("{} is not a block device", device.path.display()),
        ));
    }

    // 2. Never the device backing the running root. Checked before anything
    //    else that could be overridden; a match ends evaluation here.
    if let Some(root_base) = host.root_base.as_deref() {
        if base_device_name(&device.name) == root_base {
            findings.push(Finding::fatal(
                FindingCode::SafetyViolation,
                format!(
                    "{} backs the running root filesystem ({})",
                    device.path.display(),
                    root_base
                ),
            ));
            return finish(device, findings, force);
        }
    }

    // 3. No mounted partitions.
    let mounted = inspect::mounted_partitions_of(&host.mounts, &device.name);
    if !mounted.is_empty() {
        findings.push(Finding::fatal(
            FindingCode::MountedPartitions,
            format!(
                "{} has mounted partitions: {}",
                device.path.display(),
                mounted.join(", ")
            ),
        ));
    }

    // 4. Not a software-RAID member (overridable with force).
    let raid_members: HashSet<String> = inspect::mdraid_members(&host.mdstat);
    if raid_members.contains(base_device_name(&device.name)) {
        findings.push(Finding::fatal(
            FindingCode::RaidMember,
            format!(
                "{} is a member of a software RAID array",
                device.path.display()
            ),
        ));
    }

    // 5. The kernel must allow writes to the device.
    if device.readonly {
        findings.push(Finding::fatal(
            FindingCode::ReadOnly,
            format!("{} is read-only", device.path.display()),
        ));
    }

    // 6. Size floor.
    if device.size < MIN_DEVICE_SIZE {
        findings.push(Finding::fatal(
            FindingCode::TooSmall,
            format!(
                "{} is too small ({}, need at least 8 GiB)",
                device.path.display(),
                device.size_human()
            ),
        ));
    }

    // 7. SMART health is advisory.
    match device.smart {
        SmartHealth::Failed => {
            let msg = format!(
                "{} reports SMART health FAILED - the drive may be dying",
                device.path.display()
            );
            warn!("{}", msg);
            findings.push(Finding::warning(FindingCode::SmartFailed, msg));
        }
        SmartHealth::Passed => findings.push(Finding::info(
            FindingCode::SmartHealth,
            format!("{} SMART health: PASSED", device.path.display()),
        )),
        SmartHealth::Unknown => findings.push(Finding::info(
            FindingCode::SmartHealth,
            format!("{} SMART health: unknown", device.path.display()),
        )),
    }

    // 8. TRIM capability feeds the pool discard hint.
    if device.trim_supported {
        findings.push(Finding::info(
            FindingCode::TrimCapable,
            format!("{} supports TRIM/discard", device.path.display()),
        ));
    }

    finish(device, findings, force)
}

fn finish(device: &BlockDevice, findings: Vec<Finding>, force: bool) -> FitnessReport {
    let eligible = !findings
        .iter()
        .any(|f| f.severity == Severity::Fatal && (!force || !f.force_overridable()));
    if force {
        for finding in findings
            .iter()
            .filter(|f| f.severity == Severity::Fatal && f.force_overridable())
        {
            warn!("overridden by --force: {}", finding.message);
        }
    }
    FitnessReport {
        device: device.name.clone(),
        findings,
        eligible,
    }
}
