//! Provision command - runs the full destructive pipeline.

use anyhow::{Context, Result};
use tracing::error;

use crate::commands::confirm;
use crate::config::ProvisioningConfig;
use crate::device::fitness::HostState;
use crate::device::inspect;
use crate::exec::{Executor, Outcome};
use crate::pipeline::ProvisioningSession;

/// Run a provisioning session end to end. `assume_yes` answers the
/// destruction confirmation non-interactively; dry-run and force come from
/// the config.
pub fn cmd_provision(config: ProvisioningConfig, assume_yes: bool) -> Result<()> {
    config.validate()?;
    let devices = inspect::resolve(&config.devices).context("device resolution failed")?;
    let host = HostState::capture();
    let executor = Executor::new(config.dry_run);
    let dry_run = config.dry_run;
    let pool_name = config.pool_name.clone();

    let mut session = ProvisioningSession::new(config, devices, host, executor);
    let always_yes = |_: &str| true;
    let ask: &dyn Fn(&str) -> bool = if assume_yes { &always_yes } else { &confirm };

    let result = session.run(ask);

    if let Err(e) = &result {
        error!(error = %e, state = %session.state(), "provisioning failed");
        if !session.transcript().is_empty() {
            eprintln!("operations attempted before failure:");
            for entry in session.transcript() {
                eprintln!("  {:?}  {}", entry.outcome, entry.command);
            }
        }
    }
    result?;

    if dry_run {
        println!("dry run: no changes were made. Would have executed:");
        for entry in session.transcript() {
            debug_assert_eq!(entry.outcome, Outcome::Skipped);
            println!("  {}", entry.command);
        }
    } else {
        println!(
            "pool '{}' provisioned ({} operations)",
            pool_name,
            session.transcript().len()
        );
        if let Some(pool) = session.pool_spec() {
            println!("boot environment: {}/ROOT/default", pool.name);
        }
    }
    Ok(())
}
