//! The provisioning pipeline state machine.
//!
//! Executes wipe -> partition -> format -> pool-create -> dataset-create ->
//! finalize, strictly in session order and never interleaving two devices'
//! partition-table operations. Transitions are strictly forward except to
//! RolledBack. Validating and Planning never mutate device state, so their
//! failures end the session without rollback; any failure at or after Wiping
//! runs the compensating actions.
//!
//! Known limitation: rollback does not restore partition tables or wiped
//! filesystem signatures. Those steps are inherently destructive and
//! non-reversible.

pub mod rollback;

use std::fmt;

use tracing::{info, warn};
use which::which;

use crate::config::ProvisioningConfig;
use crate::device::fitness::{self, FitnessReport, HostState};
use crate::device::sector;
use crate::device::BlockDevice;
use crate::error::{ProvisionError, Result};
use crate::exec::{Executor, Invocation, TranscriptEntry};
use crate::plan::{self, PartitionPlan, SizePolicy};
use crate::pool::{PoolSpec, DATASET_HIERARCHY};
use rollback::RollbackGuard;

/// External tools the destructive stages invoke.
const REQUIRED_TOOLS: &[&str] = &["sgdisk", "wipefs", "mkfs.vfat", "zpool", "zfs"];

/// Compute the partition plan and pool spec for a config and its resolved
/// devices. Touches nothing; this is what `plan` prints and what the session
/// commits to.
pub fn plan_pool(
    config: &ProvisioningConfig,
    devices: &[BlockDevice],
) -> Result<(PartitionPlan, PoolSpec)> {
    let plan = plan::plan(
        devices,
        config.redundancy,
        config.efi_size,
        config.swap_size,
    )?;
    let ashift = sector::pool_ashift(devices, config.ashift);
    let autotrim = !devices.is_empty() && devices.iter().all(|d| d.trim_supported);

    let pool = PoolSpec {
        name: config.pool_name.clone(),
        ashift,
        compression: config.compression,
        redundancy: config.redundancy,
        zfs_partitions: plan.zfs_partitions(),
        autotrim,
    };
    Ok((plan, pool))
}

/// Session lifecycle. Strictly forward, except that RolledBack is reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    Validating,
    Planning,
    Wiping,
    Partitioning,
    FormattingEfi,
    PoolCreating,
    DatasetCreating,
    Finalizing,
    Committed,
    RolledBack,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Planning => "planning",
            Self::Wiping => "wiping",
            Self::Partitioning => "partitioning",
            Self::FormattingEfi => "formatting-efi",
            Self::PoolCreating => "pool-creating",
            Self::DatasetCreating => "dataset-creating",
            Self::Finalizing => "finalizing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        };
        write!(f, "{}", name)
    }
}

/// One provisioning session: owns the devices for its duration and is
/// discarded after reaching Committed or RolledBack.
pub struct ProvisioningSession {
    config: ProvisioningConfig,
    devices: Vec<BlockDevice>,
    host: HostState,
    executor: Executor,
    state: SessionState,
    reports: Vec<FitnessReport>,
    plan: Option<PartitionPlan>,
    pool: Option<PoolSpec>,
    pool_created: bool,
}

impl ProvisioningSession {
    pub fn new(
        config: ProvisioningConfig,
        devices: Vec<BlockDevice>,
        host: HostState,
        executor: Executor,
    ) -> Self {
        Self {
            config,
            devices,
            host,
            executor,
            state: SessionState::Idle,
            reports: Vec::new(),
            plan: None,
            pool: None,
            pool_created: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reports(&self) -> &[FitnessReport] {
        &self.reports
    }

    pub fn plan(&self) -> Option<&PartitionPlan> {
        self.plan.as_ref()
    }

    pub fn pool_spec(&self) -> Option<&PoolSpec> {
        self.pool.as_ref()
    }

    /// The full record of destructive operations attempted, for post-mortem.
    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.executor.transcript()
    }

    /// Run the session to a terminal state. The confirmation callback is
    /// consulted once, before Wiping begins, unless forced or in dry-run.
    pub fn run(&mut self, confirm: &dyn Fn(&str) -> bool) -> Result<()> {
        self.config.validate()?;
        self.preflight_tools()?;

        self.transition(SessionState::Validating);
        self.validate_devices()?;

        self.transition(SessionState::Planning);
        self.plan_topology()?;

        if !self.config.force && !self.executor.dry_run() {
            let prompt = format!(
                "About to DESTROY all data on: {}. Continue?",
                self.devices
                    .iter()
                    .map(|d| d.path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            if !confirm(&prompt) {
                return Err(ProvisionError::validation(
                    "provisioning declined at confirmation",
                ));
            }
        }

        let mut guard = RollbackGuard::new(self.executor.dry_run());
        guard.arm();
        match self.destructive_stages(&mut guard) {
            Ok(()) => {
                guard.disarm();
                info!(pool = %self.config.pool_name, "session committed");
                Ok(())
            }
            Err(e) => {
                self.rollback(&mut guard);
                Err(e)
            }
        }
    }

    fn destructive_stages(&mut self, guard: &mut RollbackGuard) -> Result<()> {
        self.transition(SessionState::Wiping);
        self.wipe()?;

        self.transition(SessionState::Partitioning);
        self.partition()?;

        self.transition(SessionState::FormattingEfi);
        self.format_efi()?;

        self.transition(SessionState::PoolCreating);
        self.create_pool(guard)?;

        self.transition(SessionState::DatasetCreating);
        self.create_datasets()?;

        self.transition(SessionState::Finalizing);
        self.finalize()?;

        self.transition(SessionState::Committed);
        Ok(())
    }

    /// Check that every tool the destructive stages need is installed.
    /// Skipped in dry-run, where nothing will be invoked.
    fn preflight_tools(&self) -> Result<()> {
        if self.executor.dry_run() {
            return Ok(());
        }
        let missing: Vec<&str> = REQUIRED_TOOLS
            .iter()
            .copied()
            .filter(|tool| which(tool).is_err())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProvisionError::validation(format!(
                "required tools not found: {}",
                missing.join(", ")
            )))
        }
    }

    /// Run the fitness validator over every device and aggregate. A safety
    /// violation anywhere ends the session immediately; otherwise every
    /// blocking finding across all devices is reported at once.
    fn validate_devices(&mut self) -> Result<()> {
        self.reports = self
            .devices
            .iter()
            .map(|device| fitness::validate(device, &self.host, self.config.force))
            .collect();

        if let Some(report) = self.reports.iter().find(|r| r.has_safety_violation()) {
            let device = self
                .devices
                .iter()
                .find(|d| d.name == report.device)
                .map(|d| d.path.clone())
                .unwrap_or_default();
            return Err(ProvisionError::SafetyViolation {
                device,
                root_base: self.host.root_base.clone().unwrap_or_default(),
            });
        }

        let blocking: Vec<String> = self
            .reports
            .iter()
            .flat_map(|r| r.blocking_findings(self.config.force))
            .map(|f| f.message.clone())
            .collect();
        if !blocking.is_empty() {
            return Err(ProvisionError::Validation(blocking.join("; ")));
        }
        Ok(())
    }

    fn plan_topology(&mut self) -> Result<()> {
        let (plan, pool) = plan_pool(&self.config, &self.devices)?;
        self.plan = Some(plan);
        self.pool = Some(pool);
        Ok(())
    }

    /// Wipe devices one at a time, in session order. Stray unmounts and the
    /// partition-table reread are advisory; signature erase and table zap
    /// are fatal.
    fn wipe(&mut self) -> Result<()> {
        for device in &self.devices {
            info!(device = %device.path.display(), "wiping");
            for partition in &device.partitions {
                self.executor
                    .run_advisory(Invocation::new("umount").arg_path(&partition.path));
            }
            self.executor
                .run(Invocation::new("wipefs").arg("-a").arg_path(&device.path))?;
            self.executor
                .run(Invocation::new("sgdisk").arg("--zap-all").arg_path(&device.path))?;
            self.executor
                .run_advisory(Invocation::new("partprobe").arg_path(&device.path));
        }
        Ok(())
    }

    /// Apply the partition plan per device, in the same fixed order. A
    /// failure on any device aborts the whole session; partial partitioning
    /// is not repaired.
    fn partition(&mut self) -> Result<()> {
        let plan = self.take_plan()?;
        for device_plan in &plan.devices {
            info!(device = %device_plan.device_path.display(), "partitioning");
            for spec in &device_plan.partitions {
                let end = match spec.size {
                    SizePolicy::Fixed(size) => format!("+{}M", size.0 / (1024 * 1024)),
                    SizePolicy::Remainder => "0".to_string(),
                };
                self.executor.run(
                    Invocation::new("sgdisk")
                        .arg(format!("--new={}:0:{}", spec.number, end))
                        .arg(format!("--typecode={}:{}", spec.number, spec.role.type_code()))
                        .arg(format!("--change-name={}:{}", spec.number, spec.role.label()))
                        .arg_path(&device_plan.device_path),
                )?;
            }
            self.executor
                .run_advisory(Invocation::new("partprobe").arg_path(&device_plan.device_path));
        }
        Ok(())
    }

    fn format_efi(&mut self) -> Result<()> {
        let plan = self.take_plan()?;
        for device_plan in &plan.devices {
            self.executor.run(
                Invocation::new("mkfs.vfat")
                    .args(["-F32", "-n", "EFI"])
                    .arg_path(&device_plan.efi_partition()),
            )?;
            if let Some(swap) = device_plan.swap_partition() {
                self.executor
                    .run(Invocation::new("mkswap").arg_path(&swap))?;
            }
        }
        Ok(())
    }

    fn create_pool(&mut self, guard: &mut RollbackGuard) -> Result<()> {
        let pool = self.take_pool()?;
        self.executor.run(pool.create_invocation())?;
        self.pool_created = true;
        guard.register_pool(&pool.name);
        info!(pool = %pool.name, ashift = pool.ashift, "pool created");
        Ok(())
    }

    fn create_datasets(&mut self) -> Result<()> {
        let pool = self.take_pool()?;
        for dataset in DATASET_HIERARCHY {
            self.executor.run(pool.dataset_invocation(dataset))?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let pool = self.take_pool()?;
        self.executor.run(pool.set_bootfs_invocation())?;
        self.executor.run(pool.set_cachefile_invocation())?;
        self.executor.run(pool.snapshot_invocation())?;
        Ok(())
    }

    /// Compensating actions, in reverse dependency order. The pool is
    /// exported only if creation actually succeeded. Partition tables and
    /// wiped signatures are not restored.
    fn rollback(&mut self, guard: &mut RollbackGuard) {
        warn!(state = %self.state, "stage failed, rolling back");
        if self.pool_created {
            if let Some(pool) = &self.pool {
                self.executor.run_advisory(pool.export_invocation());
            }
        }
        guard.disarm();
        self.state = SessionState::RolledBack;
        warn!("rolled back; partition tables are NOT restored");
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            next > self.state,
            "illegal transition {} -> {}",
            self.state,
            next
        );
        info!(from = %self.state, to = %next, "stage transition");
        self.state = next;
    }

    fn take_plan(&self) -> Result<PartitionPlan> {
        self.plan
            .clone()
            .ok_or_else(|| ProvisionError::validation("no partition plan computed"))
    }

    fn take_pool(&self) -> Result<PoolSpec> {
        self.pool
            .clone()
            .ok_or_else(|| ProvisionError::validation("no pool spec computed"))
    }
}
