use std::sync::Arc;

use sentinel_agent::application::deps::AppDeps;
use sentinel_agent::application::execution_loop::TradeExecutionLoop;
use sentinel_agent::application::scheduler::SchedulerRunner;
use sentinel_agent::application::tasks::build_task_registry;
use sentinel_agent::config::Config;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.observability.log_filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_logging(&config);

    info!("initializing sentinel agent");

    let deps: Arc<AppDeps> = AppDeps::build(config).await?;
    let registry = build_task_registry(&deps).await?;

    let scheduler = SchedulerRunner::new(deps.clone(), registry);
    scheduler.start().await?;
    info!("scheduler started");

    let execution_loop = TradeExecutionLoop::new(deps.clone());
    tokio::spawn(execution_loop.run());
    info!("trade execution loop started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.stop().await;

    Ok(())
}
