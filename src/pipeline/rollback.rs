//! Scoped rollback guard.
//!
//! Armed when the first destructive stage begins and disarmed on commit or
//! after an explicit rollback. If the session unwinds any other way (panic,
//! external cancellation), the guard's Drop runs the same compensating
//! actions, so cleanup happens on every exit path without a process-wide
//! signal handler.

use tracing::warn;

use crate::exec::{Executor, Invocation};

#[derive(Debug)]
pub struct RollbackGuard {
    armed: bool,
    dry_run: bool,
    /// Pool to export, registered only once creation actually succeeded.
    export_pool: Option<String>,
}

impl RollbackGuard {
    pub fn new(dry_run: bool) -> Self {
        Self {
            armed: false,
            dry_run,
            export_pool: None,
        }
    }

    /// Arm the guard; destructive work may begin after this.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Disarm after a commit or an explicit rollback; Drop becomes a no-op.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Record that the pool exists and must be exported on rollback.
    pub fn register_pool(&mut self, name: &str) {
        self.export_pool = Some(name.to_string());
    }

    pub fn pool(&self) -> Option<&str> {
        self.export_pool.as_deref()
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("session interrupted, running compensating actions");
        // Best effort: rollback failures cannot propagate out of Drop.
        let mut executor = Executor::new(self.dry_run);
        if let Some(pool) = &self.export_pool {
            executor.run_advisory(Invocation::new("zpool").arg("export").arg(pool));
        }
    }
}
