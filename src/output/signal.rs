//! Completion signal for the external scheduler
//!
//! A scheduled CI job reads `continue_execution` to decide whether to
//! re-invoke the harvester against the same checkpoint database.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub const CONTINUE_KEY: &str = "continue_execution";

/// Formats the `key=value` line for the flag
pub fn continue_line(more_work_remains: bool) -> String {
    format!("{}={}", CONTINUE_KEY, more_work_remains)
}

/// Appends the flag to a step-output file, or prints it when none is given
///
/// # Arguments
///
/// * `output_file` - The scheduler's step-output file, usually `$GITHUB_OUTPUT`
/// * `more_work_remains` - Whether another invocation is needed
pub fn emit_continue_flag(
    output_file: Option<&Path>,
    more_work_remains: bool,
) -> std::io::Result<()> {
    let line = continue_line(more_work_remains);

    match output_file {
        Some(path) => {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", line)?;
            tracing::debug!("Wrote {} to {}", line, path.display());
        }
        None => println!("{}", line),
    }

    Ok(())
}
