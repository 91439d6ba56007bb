mod producer;
mod sim_configuration;
mod sim_observer;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use changefeed_core::feed::InMemoryChangeFeed;
use changefeed_core::store::MemoryStore;
use changefeed_lease_store::{
    DocumentLeaseStoreManager, LeaseContainer, LeaseStoreManagerSettings,
    SinglePartitionRequestOptionsFactory,
};
use changefeed_processor::{processor_metrics, ChangeFeedProcessorBuilder, PartitionManager};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::producer::start_producer;
use crate::sim_configuration::SimConfiguration;
use crate::sim_observer::CountingObserverFactory;

#[derive(Debug, Parser)]
#[command(name = "changefeed-sim")]
#[command(about = "Run change feed processor hosts against an in-memory feed and lease store")]
#[command(version)]
struct Args {
    #[arg(
        long,
        short = 'c',
        default_value = "./config/changefeed-sim.yml",
        help = "Path to the simulation config file"
    )]
    config_file: PathBuf,

    #[arg(long, help = "Number of processor hosts, overrides the config file")]
    hosts: Option<usize>,

    #[arg(long, help = "Number of partitions of the feed, overrides the config file")]
    partitions: Option<usize>,

    #[arg(long, help = "How long the simulation runs, in seconds")]
    duration_secs: Option<u64>,

    #[arg(long, help = "Prometheus exporter http address. Example: 0.0.0.0:9040")]
    prom_exporter: Option<String>,
}

enum Event {
    StopHost,
    Split,
}

struct SimHost {
    manager: PartitionManager,
    observers: CountingObserverFactory,
    running: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = SimConfiguration::load(&args.config_file)?;
    if let Some(hosts) = args.hosts {
        config.hosts = hosts.max(1);
    }
    if let Some(partitions) = args.partitions {
        config.partitions = partitions.max(1);
    }
    if let Some(duration_secs) = args.duration_secs {
        config.duration = std::time::Duration::from_secs(duration_secs);
    }

    if let Some(prom_exporter) = args.prom_exporter {
        let prom_address: SocketAddr = prom_exporter.parse().context(format!(
            "Failed to parse into Socket address: {}",
            prom_exporter
        ))?;
        PrometheusBuilder::new()
            .with_http_listener(prom_address)
            .install()
            .context("Failed to install Prometheus recorder")?;
        info!(address = %prom_address, "prometheus exporter listening");
    }
    processor_metrics::register_metrics();

    let feed = InMemoryChangeFeed::with_ranges(config.partitions);
    let store = MemoryStore::new();

    let cancel = CancellationToken::new();
    let producer = start_producer(feed.clone(), config.documents_per_second, cancel.clone());

    let mut hosts = Vec::with_capacity(config.hosts);
    for index in 0..config.hosts {
        let observers = CountingObserverFactory::default();
        let manager = ChangeFeedProcessorBuilder::new()
            .with_options(config.host_options(index))
            .with_feed_client(Arc::new(feed.clone()))
            .with_lease_store(Arc::new(store.clone()))
            .with_observer_factory(Arc::new(observers.clone()))
            .build()?;
        manager
            .start()
            .await
            .with_context(|| format!("Failed to start host {}", manager.host_name()))?;
        hosts.push(SimHost {
            manager,
            observers,
            running: true,
        });
    }
    info!(
        hosts = config.hosts,
        partitions = config.partitions,
        duration = ?config.duration,
        "simulation started"
    );

    let mut events: Vec<(std::time::Duration, Event)> = Vec::new();
    if let Some(at) = config.stop_host_after {
        events.push((at, Event::StopHost));
    }
    if let Some(at) = config.split_after {
        events.push((at, Event::Split));
    }
    events.retain(|(at, _)| *at < config.duration);
    events.sort_by_key(|(at, _)| *at);

    let started = Instant::now();
    let mut interrupted = false;
    for (at, event) in events {
        tokio::select! {
            _ = tokio::time::sleep_until(started + at) => {}
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
        }
        match event {
            Event::StopHost => {
                if let Some(host) = hosts.first_mut().filter(|_| config.hosts > 1) {
                    info!(host = %host.manager.host_name(), "stopping host");
                    host.manager.stop().await;
                    host.running = false;
                }
            }
            Event::Split => {
                let ranges = feed.active_range_ids().await;
                if let Some(parent) = ranges.first() {
                    let children = [format!("{}-a", parent), format!("{}-b", parent)];
                    let child_ids: Vec<&str> = children.iter().map(String::as_str).collect();
                    match feed.split_range(parent, &child_ids).await {
                        Ok(_) => info!(parent = %parent, children = ?children, "partition split"),
                        Err(e) => warn!(parent = %parent, error = %e, "partition split failed"),
                    }
                }
            }
        }
    }
    if !interrupted {
        tokio::select! {
            _ = tokio::time::sleep_until(started + config.duration) => {}
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
    }

    cancel.cancel();
    let written = producer.await.context("producer task failed")?;

    report(&config, &store, &hosts, written).await?;

    for host in hosts.iter().filter(|host| host.running) {
        host.manager.stop().await;
    }
    Ok(())
}

async fn report(
    config: &SimConfiguration,
    store: &MemoryStore,
    hosts: &[SimHost],
    written: u64,
) -> Result<()> {
    let inspector = DocumentLeaseStoreManager::new(
        LeaseStoreManagerSettings::new(&config.processor.lease_prefix, "sim-report"),
        Arc::new(store.clone()),
        Arc::new(SinglePartitionRequestOptionsFactory),
    );
    let leases = inspector.get_all_leases().await?.collect_leases().await?;

    println!();
    println!("{:<12} {:<16} {:>12}", "PARTITION", "OWNER", "CONTINUATION");
    for lease in &leases {
        println!(
            "{:<12} {:<16} {:>12}",
            lease.lease_token,
            lease.owner().unwrap_or("-"),
            lease.continuation_token.as_deref().unwrap_or("-")
        );
    }

    println!();
    println!("{:<16} {:>8} {:>10}", "HOST", "RUNNING", "PROCESSED");
    for host in hosts {
        println!(
            "{:<16} {:>8} {:>10}",
            host.manager.host_name(),
            host.running,
            host.observers.processed()
        );
    }

    let remaining = match hosts.iter().find(|host| host.running) {
        Some(host) => host
            .manager
            .remaining_work_estimator()
            .estimated_remaining_work()
            .await
            .context("Failed to estimate remaining work")?,
        None => 0,
    };
    println!();
    println!("documents written: {}, remaining work: {}", written, remaining);
    Ok(())
}
