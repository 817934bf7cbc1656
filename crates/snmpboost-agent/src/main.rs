mod cache;
mod config;
mod runner;


use anyhow::{Context, Result};
use chrono::Utc;
use snmpboost_poller::check::Poller;
use snmpboost_poller::transport::Snmp2Transport;
use snmpboost_poller::worker::PollWorker;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("snmpboost=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("cache") {
        let config_path = args.get(1).context(cache::USAGE)?;
        let command = cache::CacheCommand::parse(&args[2..])?;
        let config = config::AgentConfig::load(config_path)?;
        let store = config::open_store(&config).await?;
        for line in command.execute(store.as_ref()).await? {
            println!("{line}");
        }
        return Ok(());
    }

    let config_path = args
        .first()
        .cloned()
        .unwrap_or_else(|| "config/agent.toml".to_string());
    let config = config::AgentConfig::load(&config_path)
        .with_context(|| format!("loading {config_path}"))?;
    config.datasource.validate()?;
    snmpboost_common::id::init(config.machine_id, config.node_id);
    tracing::info!(
        devices = config.devices.len(),
        templates = config.datasource.templates.len(),
        "snmpboost-agent starting"
    );

    let store = config::open_store(&config).await?;
    let settings = config.poll_settings();
    let transport = Snmp2Transport::new().with_request_timeout(settings.timeout);
    let (worker, handle) = PollWorker::new(Arc::new(transport), config.max_in_flight);
    let worker_task = tokio::spawn(worker.with_request_timeout(settings.timeout).run());

    let poller = Arc::new(Poller::new(
        store,
        Arc::new(handle),
        Arc::new(config.datasource.clone()),
        settings,
    ));
    let mut runner = runner::Runner::new(
        poller,
        config.scheduled_checks(Utc::now()),
        config.spread,
        config.max_concurrent,
        config.interval_length,
    );
    runner.register_all().await?;

    let mut tick = interval(Duration::from_secs(config.tick_secs.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(
        tick_secs = config.tick_secs,
        checks = runner.checks().len(),
        spread = ?config.spread,
        "Starting check loop"
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let summary = runner.tick(Utc::now()).await;
                if summary.due > 0 {
                    tracing::debug!(
                        due = summary.due,
                        live = summary.live,
                        cached = summary.cached,
                        failed = summary.failed,
                        "Tick done"
                    );
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Shutting down gracefully");
                break;
            }
        }
    }

    // Dropping the runner drops the last worker handle.
    drop(runner);
    worker_task.await?;
    Ok(())
}
