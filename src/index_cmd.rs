//! `reposearch index`: bring one repository up to date.

use anyhow::Result;

use reposearch_core::plan::ForceFlags;

use crate::config::Config;
use crate::engine::SearchEngine;
use crate::repos::print_record;

pub async fn run_index(config: &Config, repository: &str, force: ForceFlags) -> Result<()> {
    let engine = SearchEngine::open(config).await?;
    let outcome = engine.index(repository, force).await;
    engine.close().await;
    let outcome = outcome?;

    if outcome.plan.is_noop() {
        println!("Already up to date.");
    } else {
        let stages: Vec<&str> = outcome.plan.stages().map(|s| s.as_str()).collect();
        println!("Ran {} ({}).", stages.join(", "), outcome.plan.reason);
    }
    println!();
    print_record(&outcome.record);
    Ok(())
}
