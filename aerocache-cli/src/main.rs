mod cli;
mod keys;

use aerocache::{CacheConfig, CacheMap, HttpSourceFetcher, KeyValueStore, ReadThroughCache, UserKey};
use clap::Parser;
use cli::{Cli, Commands};
use futures::StreamExt;
use serde_json::Value;
use shared::config::Config;
use std::sync::Arc;
use storage_engine::MemoryCluster;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply(&mut config);
    info!(
        "Using {}/{} on {} in-memory node(s)",
        config.namespace, config.set, config.nodes
    );

    let cluster = Arc::new(MemoryCluster::new(config.nodes));

    match cli.command {
        Commands::Lookup { ids } => lookup(&config, cluster, &ids).await?,
        Commands::StoreKeys { count } => {
            let cache_key = keys::store_keys(cluster.as_ref(), &config.namespace, &config.set, count).await?;
            for descriptor in keys::load_keys(cluster.as_ref(), &cache_key).await? {
                println!("{descriptor}");
            }
        }
        Commands::Clear => {
            let cache = build_cache(&config, cluster)?;
            let cleared = cache.clear().await?;
            let names: Vec<_> = cleared.cleared_nodes.iter().map(ToString::to_string).collect();
            println!(
                "Cleared {}/{} on {} node(s): {}",
                cache.config().namespace,
                cache.config().set,
                names.len(),
                names.join(", ")
            );
        }
    }

    Ok(())
}

fn build_cache(config: &Config, store: Arc<dyn KeyValueStore>) -> shared::Result<ReadThroughCache<Value>> {
    let source = Arc::new(HttpSourceFetcher::from_config(config)?);
    ReadThroughCache::new(store, source, CacheConfig::from(config))
}

async fn lookup(config: &Config, cluster: Arc<MemoryCluster>, ids: &[String]) -> shared::Result<()> {
    let cache = build_cache(config, cluster)?;

    for id in ids {
        let key = UserKey::from(id.as_str());
        // The second read should be served from the store.
        for attempt in 1..=2 {
            match cache.get(&key).await {
                Ok(document) => println!("{id} (read {attempt}): {document}"),
                Err(e) => warn!("Lookup of '{}' failed: {}", id, e),
            }
        }
    }

    println!("size: {}", cache.size().await?);

    let mut digests = cache.key_set();
    while let Some(digest) = digests.next().await {
        println!("digest: {}", digest?);
    }

    let mut values = cache.values();
    while let Some(value) = values.next().await {
        println!("value: {}", value?);
    }

    let stats = cache.stats();
    info!(
        "hits={} misses={} fetches={} coalesced={} write_backs={} hit_rate={:.2}",
        stats.hits,
        stats.misses,
        stats.fetches,
        stats.coalesced,
        stats.write_backs,
        stats.hit_rate()
    );
    Ok(())
}
