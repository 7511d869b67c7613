//! obsidianstack-agent — scrapes configured pipeline components, derives
//! health snapshots and ships them to the server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use obsidianstack::compute::Engine;
use obsidianstack::config::{self, Config, Source};
use obsidianstack::scraper;
use obsidianstack::security;
use obsidianstack::shipper::{self, Shipper};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Disable config hot-reload
    #[arg(long)]
    no_watch: bool,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("obsidianstack", LevelFilter::DEBUG),
        ("agent", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let cfg = config::load(&args.config)?;
    info!(
        "obsidianstack-agent starting: server_endpoint={} sources={} scrape_interval={:?}",
        cfg.agent.server_endpoint,
        cfg.agent.sources.len(),
        cfg.agent.scrape_interval
    );

    let token = CancellationToken::new();

    let engine = Arc::new(Engine::new());
    let shipper = Arc::new(Shipper::new(cfg.agent.clone()));

    // Shipper drain loop — owns the outbound gRPC connection.
    {
        let shipper = shipper.clone();
        let token = token.clone();
        tokio::spawn(async move { shipper.run(token).await });
    }

    // Scrape fleet for the initial config; replaced wholesale on reload.
    let scrape_interval = cfg.agent.scrape_interval;
    let fleet_token = Arc::new(Mutex::new(spawn_fleet(
        &token,
        &cfg.agent.sources,
        scrape_interval,
        engine.clone(),
        shipper.clone(),
    )));

    if !args.no_watch {
        let watch_token = token.clone();
        let path = args.config.clone();
        let engine = engine.clone();
        let shipper = shipper.clone();
        let root = token.clone();
        tokio::spawn(async move {
            let result = config::watch(watch_token, path, move |updated: Config| {
                info!(
                    "config hot-reloaded: sources={}",
                    updated.agent.sources.len()
                );
                let mut current = fleet_token.lock().unwrap();
                current.cancel();
                *current = spawn_fleet(
                    &root,
                    &updated.agent.sources,
                    updated.agent.scrape_interval,
                    engine.clone(),
                    shipper.clone(),
                );
            })
            .await;
            if let Err(err) = result {
                error!("config watcher stopped: {err:#}");
            }
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping"),
        Err(err) => error!("unable to listen for shutdown signal: {err}"),
    }

    token.cancel();
    info!("obsidianstack-agent shutting down");
    Ok(())
}

/// Spawns one scrape loop per source under a child token, so a config
/// reload can cancel the whole fleet and start a fresh one.
fn spawn_fleet(
    parent: &CancellationToken,
    sources: &[Source],
    interval: Duration,
    engine: Arc<Engine>,
    shipper: Arc<Shipper>,
) -> CancellationToken {
    let fleet = parent.child_token();

    for src in sources {
        let scraper = match scraper::new_scraper(src) {
            Ok(s) => s,
            Err(err) => {
                error!("skipping source {:?}: {err:#}", src.id);
                continue;
            }
        };

        let src = src.clone();
        let engine = engine.clone();
        let shipper = shipper.clone();
        let token = fleet.clone();

        tokio::spawn(async move {
            info!("scrape loop started: source={} type={}", src.id, src.kind);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("scrape loop stopped: source={}", src.id);
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let result = scraper.scrape().await;
                let snapshot = engine.process(&result, chrono::Utc::now());

                // Certificate status rides only on successful-scrape
                // snapshots; a down endpoint already reads unknown.
                let certs = if result.is_success() {
                    security::check(&src).await.into_iter().collect()
                } else {
                    Vec::new()
                };

                if let Some(err) = &result.error {
                    warn!("scrape failed: source={} err={err}", src.id);
                }

                shipper.enqueue(shipper::to_proto(&snapshot, certs));
            }
        });
    }

    fleet
}
