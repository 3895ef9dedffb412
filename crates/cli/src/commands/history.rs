//! `unison history`: inspect or clear an agent's persisted steps.

use super::{CliResult, history_store, load_config};

pub async fn run(identity: &str, clear: bool) -> CliResult {
    let config = load_config()?;
    let store = history_store(&config);

    if clear {
        store.clear(identity).await?;
        println!("Cleared history for '{identity}'.");
        return Ok(());
    }

    let steps = store.load(identity).await?;
    if steps.is_empty() {
        println!("No history for '{identity}'.");
        return Ok(());
    }
    for step in &steps {
        println!("{}", serde_json::to_string(step)?);
    }
    Ok(())
}
