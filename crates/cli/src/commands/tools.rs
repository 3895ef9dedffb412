//! `unison tools`: print the built-in tool schemas.

use super::CliResult;

pub fn run() -> CliResult {
    let registry = unison_tools::default_registry()?;
    println!("{}", serde_json::to_string_pretty(&registry.parameter_schemas())?);
    Ok(())
}
