use clap::{Parser, Subcommand};
use shared::config::Config;

#[derive(Parser, Debug)]
#[command(name = "aerocache")]
#[command(about = "Read-through cache lookups against an in-memory cluster")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Namespace of the cache set
    #[arg(short, long, global = true, env = "AEROCACHE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Set holding the cache records
    #[arg(short, long, global = true, env = "AEROCACHE_SET")]
    pub set: Option<String>,

    /// TTL in seconds for written-back records (0 = store default)
    #[arg(long, global = true, env = "AEROCACHE_TTL_SECS")]
    pub ttl: Option<u32>,

    /// Number of in-memory cluster nodes
    #[arg(long, global = true, env = "AEROCACHE_NODES")]
    pub nodes: Option<usize>,

    /// Base URL of the upstream source
    #[arg(long, global = true, env = "AEROCACHE_SOURCE_URL")]
    pub source_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read each identifier through the cache twice, then list the set
    Lookup {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Write descriptors of sample keys into a single `cache-key` record
    StoreKeys {
        #[arg(long, default_value_t = 20)]
        count: usize,
    },
    /// Delete every record of the set on every node
    Clear,
}

impl Cli {
    /// Flags win over the environment-derived settings.
    pub fn apply(&self, config: &mut Config) {
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(set) = &self.set {
            config.set = set.clone();
        }
        if let Some(ttl) = self.ttl {
            config.ttl_secs = ttl;
        }
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if let Some(url) = &self.source_url {
            config.source_url = url.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from(["aerocache", "-n", "bar", "--ttl", "60", "lookup", "IAD", "SFO"]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.namespace, "bar");
        assert_eq!(config.ttl_secs, 60);
        assert_eq!(config.set, "flights");
        match cli.command {
            Commands::Lookup { ids } => assert_eq!(ids, vec!["IAD", "SFO"]),
            other => panic!("Expected lookup, got {other:?}"),
        }
    }

    #[test]
    fn test_store_keys_defaults_to_twenty() {
        let cli = Cli::parse_from(["aerocache", "store-keys"]);
        assert!(matches!(cli.command, Commands::StoreKeys { count: 20 }));
    }

    #[test]
    fn test_lookup_needs_an_id() {
        assert!(Cli::try_parse_from(["aerocache", "lookup"]).is_err());
    }
}
