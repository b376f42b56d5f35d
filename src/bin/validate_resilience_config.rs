//! Validate a resilience config file and print the effective settings.
//!
//! Usage: `validate_resilience_config [path]`. Without a path, `OPS_RESILIENCE_CONFIG`
//! is used; without either, only defaults and `OPS_*` overrides are shown.

use anyhow::Context;
use ops_resilience::ResilienceConfig;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OPS_RESILIENCE_CONFIG").ok());

    let config = match &path {
        Some(p) => {
            tracing::info!(path = p.as_str(), "loading resilience config");
            ResilienceConfig::from_path(p)
                .with_context(|| format!("failed to load {}", p))?
                .with_env_overrides()
        }
        None => {
            tracing::info!("no config file given, using defaults");
            ResilienceConfig::default().with_env_overrides()
        }
    };
    config
        .validate()
        .context("effective config is invalid after environment overrides")?;

    println!("=== Effective Resilience Settings ===");
    println!("{}", serde_yaml::to_string(&config)?);

    let retry = config.retry.to_retry_config();
    println!("=== Retry Schedule (without jitter) ===");
    let schedule = retry.delay_schedule();
    for (attempt, delay) in &schedule {
        println!("  after attempt {}: wait {}ms", attempt, delay.as_millis());
    }
    if let Some(&(last, delay)) = schedule.last() {
        let final_retry = retry.attempts() - 1;
        if final_retry > last {
            println!(
                "  after attempts {}..={}: wait {}ms each",
                last + 1,
                final_retry,
                delay.as_millis()
            );
        }
    }
    println!("✅ config is valid");
    Ok(())
}
