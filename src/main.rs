//! Demo binary for llm-call-dispatcher
//!
//! Builds a dispatcher, runs a small batch of prompts through it at mixed
//! priorities, and prints the resulting stats.
//!
//! ## Environment Variables
//!
//! - `DISPATCHER_CONFIG` — path to a TOML config (defaults are used if unset)
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter

use std::path::Path;
use std::time::Duration;

use llm_call_dispatcher::config::loader::load_from_file;
use llm_call_dispatcher::{
    init_tracing, metrics, BatchCoordinator, CallRequest, CallSpec, Dispatcher, DispatcherConfig,
    Priority,
};
use tracing::info;

const DEMO_USER: i64 = 1;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let config = match std::env::var("DISPATCHER_CONFIG") {
        Ok(path) => {
            info!(path = %path, "loading dispatcher config");
            load_from_file(Path::new(&path))?
        }
        Err(_) => DispatcherConfig::default(),
    };
    let wait = config.defaults.timeout();

    let dispatcher = Dispatcher::try_from_config(config)?;
    dispatcher.start_processing();
    info!("Starting llm-call-dispatcher demo");

    // One urgent call ahead of the batch.
    let urgent = dispatcher.submit(
        CallRequest::new("Evaluate the riskiest assumption in this plan", DEMO_USER)
            .with_priority(Priority::Critical),
    );

    let batch = BatchCoordinator::new(dispatcher.clone());
    let specs = vec![
        CallSpec::new("Generate five product ideas for remote teams"),
        CallSpec::new("Evaluate each idea for feasibility"),
        CallSpec::new("Iterate on the strongest idea"),
        CallSpec::new("Summarise the plan in two sentences"),
    ];
    let (ids, results) = batch
        .run_batch(specs, DEMO_USER, Priority::Normal, wait)
        .await;

    if let Some(text) = dispatcher.wait_for_call(&urgent, Duration::from_secs(1)).await {
        println!("[critical] {urgent}: {text}");
    }
    for (id, result) in ids.iter().zip(&results) {
        match result {
            Some(text) => println!("[normal] {id}: {text}"),
            None => println!("[normal] {id}: no result"),
        }
    }

    let user_stats = dispatcher.get_user_call_stats(DEMO_USER, 24);
    println!("user stats:   {}", serde_json::to_string_pretty(&user_stats)?);
    let system_stats = dispatcher.get_system_stats();
    println!("system stats: {}", serde_json::to_string_pretty(&system_stats)?);

    dispatcher.stop_processing().await?;
    info!("Demo complete");

    let exposition = metrics::gather_metrics();
    if !exposition.is_empty() {
        println!("{exposition}");
    }
    Ok(())
}
