//! Validate command - reports every problem of a plan file.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use stratus_plan::validate_plan;

use super::read_plan;

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Plan file (JSON)
    pub plan: PathBuf,
}

/// Run the validate command.
pub fn run(args: ValidateArgs) -> Result<ExitCode> {
    let plan = read_plan(&args.plan)?;
    let errors = validate_plan(&plan);
    if errors.is_empty() {
        println!("plan {} is valid ({} nodes)", plan.uuid(), plan.nodes().len());
        return Ok(ExitCode::SUCCESS);
    }

    for error in &errors {
        println!("error: {error}");
    }
    println!("plan {} has {} problem(s)", plan.uuid(), errors.len());
    Ok(ExitCode::FAILURE)
}
