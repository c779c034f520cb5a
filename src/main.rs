use env_logger::Env;
use hostaudit::{
    features::{register_builtin, BuiltinOptions},
    shared::{
        config::AgentConfig,
        error::AgentError,
        event::{EventNormalizer, HostFacts},
        registry::CollectorRegistry,
        scheduler::{Scheduler, SchedulerOptions},
        sink,
    },
};
use log::{error, info};

async fn run() -> Result<(), AgentError> {
    let config = match std::env::args().nth(1) {
        Some(path) => AgentConfig::load(path)?,
        None => {
            info!("No config file given, using defaults");
            AgentConfig::default()
        }
    };

    let mut registry = CollectorRegistry::new();
    register_builtin(&mut registry, &BuiltinOptions::from(&config))?;
    registry.apply_config(&config.datasets)?;

    let mut facts = HostFacts::detect();
    if let Some(name) = &config.name {
        facts = facts.with_host_name(name.clone());
    }
    info!(
        "Starting {} {} on {}",
        facts.agent_name, facts.agent_version, facts.host_name
    );

    let sink = sink::from_config(&config.output).await?;
    info!("Publishing events to {}", sink.name());

    let mut scheduler = Scheduler::new(
        registry,
        EventNormalizer::new(facts),
        sink,
        SchedulerOptions {
            max_timeout: config.max_timeout,
        },
    );
    scheduler.start()?;
    info!("Running datasets: {}", scheduler.running_datasets().join(", "));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down...");
    scheduler.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}
