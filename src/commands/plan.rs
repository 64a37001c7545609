//! Plan command - validates devices and prints the computed topology.

use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use serde::Serialize;

use crate::config::ProvisioningConfig;
use crate::device::fitness::{self, HostState};
use crate::device::inspect;
use crate::pipeline;
use crate::plan::{PartitionPlan, SizePolicy};
use crate::pool::{PoolSpec, DATASET_HIERARCHY};

/// The combined boundary artifact: what `--json` emits for downstream
/// collaborators such as the bootloader installer.
#[derive(Serialize)]
struct PlanOutput<'a> {
    plan: &'a PartitionPlan,
    pool: &'a PoolSpec,
}

/// Validate the configured devices and print the partition plan and pool
/// spec. Touches nothing.
pub fn cmd_plan(config: &ProvisioningConfig, json: bool) -> Result<()> {
    config.validate()?;
    let devices = inspect::resolve(&config.devices).context("device resolution failed")?;
    let host = HostState::capture();

    let mut blocking = Vec::new();
    for device in &devices {
        let report = fitness::validate(device, &host, config.force);
        if report.has_safety_violation() {
            bail!(
                "refusing to plan against {}: it backs the running root filesystem",
                device.path.display()
            );
        }
        blocking.extend(
            report
                .blocking_findings(config.force)
                .map(|f| f.message.clone()),
        );
    }
    if !blocking.is_empty() {
        bail!("validation failed: {}", blocking.join("; "));
    }

    let (plan, pool) = pipeline::plan_pool(config, &devices)?;

    if json {
        let output = PlanOutput {
            plan: &plan,
            pool: &pool,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for device_plan in &plan.devices {
        println!("{}:", device_plan.device_path.display());
        for spec in &device_plan.partitions {
            let size = match spec.size {
                SizePolicy::Fixed(size) => size.to_string_as(true),
                SizePolicy::Remainder => "remainder".to_string(),
            };
            println!(
                "  {}  {}  ({})  {}",
                device_plan.partition_path(spec.number).display(),
                spec.role.label(),
                spec.role.type_code(),
                size
            );
        }
    }

    println!();
    println!("pool: {}", pool.name);
    println!(
        "  redundancy: {} (survives {} drive failure{})",
        pool.redundancy,
        pool.redundancy.fault_tolerance(devices.len()),
        if pool.redundancy.fault_tolerance(devices.len()) == 1 {
            ""
        } else {
            "s"
        }
    );
    println!(
        "  ashift: {} ({} sectors)",
        pool.ashift,
        ByteSize(1u64 << pool.ashift).to_string_as(true)
    );
    println!("  compression: {}", pool.compression);
    println!("  autotrim: {}", if pool.autotrim { "on" } else { "off" });
    println!("  datasets: {}", DATASET_HIERARCHY.len());
    println!();
    println!("would run: {}", pool.create_invocation());
    Ok(())
}
