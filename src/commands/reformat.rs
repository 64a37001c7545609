//! Reformat command - switches an NVMe namespace to 4096-byte sectors.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::commands::confirm;
use crate::device::inspect;
use crate::device::sector;
use crate::exec::Executor;

/// Explicitly reformat one NVMe namespace to 4K sectors. Never part of the
/// provisioning pipeline; destroys all data on the namespace.
pub fn cmd_reformat(device: PathBuf, force: bool, dry_run: bool) -> Result<()> {
    let devices =
        inspect::resolve(std::slice::from_ref(&device)).context("device resolution failed")?;
    let target = devices
        .into_iter()
        .next()
        .context("device resolution returned nothing")?;

    let mut executor = Executor::new(dry_run);
    sector::reformat_to_4k(&target, &mut executor, force, &confirm)?;

    if dry_run {
        for entry in executor.transcript() {
            println!("dry run: would execute: {}", entry.command);
        }
    } else {
        println!(
            "{} now uses 4096-byte sectors; re-run partitioning before use",
            target.path.display()
        );
    }
    Ok(())
}
