//! `unison clan`: run a clan definition file.

use std::path::Path;
use std::sync::Arc;
use unison_agent::{Clan, ClanLimits};
use unison_config::{ClanFile, MemberFile};
use unison_core::{AgentProfile, EventBus};

use super::{CliResult, history_store, load_config, require_api_key};

fn profile(member: &MemberFile) -> CliResult<AgentProfile> {
    let profile = AgentProfile::new(&member.identity, &member.description)?;
    Ok(match &member.task {
        Some(task) => profile.with_task(task),
        None => profile,
    })
}

pub async fn run(path: &Path) -> CliResult {
    let config = load_config()?;
    let file = ClanFile::load(path)?;
    let registry = unison_tools::default_registry()?;
    file.validate(&registry.names())?;
    require_api_key(&config)?;

    let events = Arc::new(EventBus::default());
    let provider = unison_providers::from_config(&config, Some(events.clone()))?;

    let mut builder = Clan::builder(&file.name, provider, history_store(&config))
        .shared_instruction(&file.shared_instruction)
        .manager(profile(&file.manager)?)
        .tools(Arc::new(registry))
        .loop_config(config.loop_config())
        .limits(ClanLimits {
            max_depth: config.clan.max_delegation_depth,
            member_timeout: config.clan.member_timeout(),
            clan_timeout: config.clan.clan_timeout(),
            synthesis_timeout: config.clan.synthesis_timeout(),
        })
        .events(events);
    for member in &file.members {
        builder = if member.tools.is_empty() {
            builder.member(profile(member)?)
        } else {
            builder.member_with_tools(profile(member)?, &member.tools)
        };
    }
    if let Some(output) = &file.output_file {
        builder = builder.output_file(output);
    }
    let clan = builder.build()?;

    println!();
    println!("  Clan:     {}", clan.name());
    println!("  Manager:  {}", clan.manager().identity);
    println!("  Members:  {}", clan.member_identities().join(", "));
    println!("  Goal:     {}", file.goal);
    println!();

    let outcome = clan.run(&file.goal).await;

    for report in &outcome.members {
        let status = match report.outcome.reason() {
            None => "ok".to_string(),
            Some(reason) => format!("failed: {reason}"),
        };
        println!(
            "  - {:<16} {status} ({} iterations, {:.1}s)",
            report.identity,
            report.outcome.iterations,
            report.outcome.execution_time.as_secs_f64()
        );
    }
    println!();

    match &outcome.answer {
        Some(answer) => {
            println!("{answer}");
            Ok(())
        }
        None => {
            let reason = outcome.reason.map(|r| r.to_string()).unwrap_or_default();
            let detail = outcome.detail.unwrap_or_default();
            Err(format!("clan '{}' failed: {reason} ({detail})", outcome.clan).into())
        }
    }
}
