//! Inspect command - lists candidate devices with fitness findings.

use anyhow::{Context, Result};

use crate::device::fitness::{self, HostState, Severity};
use crate::device::inspect;

/// Scan the host for whole-disk devices and report what the fitness
/// validator makes of each. Read-only; prints findings without force
/// overrides applied.
pub fn cmd_inspect() -> Result<()> {
    let devices = inspect::scan().context("device scan failed")?;
    if devices.is_empty() {
        println!("No block devices found.");
        return Ok(());
    }

    let host = HostState::capture();

    for device in &devices {
        println!(
            "{}  {}  {}  {}{}",
            device.path.display(),
            device.controller,
            device.size_human(),
            if device.rotational { "HDD" } else { "SSD" },
            if device.removable { "  removable" } else { "" },
        );

        if !device.partitions.is_empty() {
            let names: Vec<&str> = device.partitions.iter().map(|p| p.name.as_str()).collect();
            println!("    existing partitions: {}", names.join(", "));
        }

        let report = fitness::validate(device, &host, false);
        for finding in &report.findings {
            let tag = match finding.severity {
                Severity::Fatal => "fatal",
                Severity::Warning => "warn ",
                Severity::Info => "info ",
            };
            println!("    [{}] {}", tag, finding.message);
        }
        println!(
            "    {}",
            if report.eligible {
                "eligible for provisioning"
            } else {
                "NOT eligible"
            }
        );
        println!();
    }
    Ok(())
}
