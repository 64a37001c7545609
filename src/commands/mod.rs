//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `inspect` - List candidate devices with fitness findings
//! - `plan` - Compute and print the partition/pool plan
//! - `provision` - Run the full destructive pipeline
//! - `reformat` - Reformat an NVMe namespace to 4K sectors

pub mod inspect;
pub mod plan;
pub mod provision;
pub mod reformat;

pub use inspect::cmd_inspect;
pub use plan::cmd_plan;
pub use provision::cmd_provision;
pub use reformat::cmd_reformat;

use std::io::{self, BufRead, Write};

/// Interactive yes/no prompt. Only an explicit "y"/"yes" proceeds.
pub(crate) fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
