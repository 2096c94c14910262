//! `cardvault` binary: runs one process of the system per subcommand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cardvault_core::{ImportResult, HLC};
use cardvault_server::collection::{CollectionService, EventPublishingObserver};
use cardvault_server::events::{
    ActivityLogHandler, BrokerConfig, CardPopularityHandler, EventHandler, EventPublisher,
    InMemoryBroker, MessageBroker, Topology,
};
use cardvault_server::gateway::{BalancerKind, Gateway, GatewayConfig, RouteTable, ServiceRegistration};
use cardvault_server::importer::{Importer, ImporterConfig, PokemonTcgClient, SourceConfig};
use cardvault_server::network::handlers::{admin_router, catalog_router, collection_router};
use cardvault_server::network::{NetworkConfig, NetworkModule};
use cardvault_server::service::ServerConfig;
use cardvault_server::storage::{MemoryCatalogStore, MemoryCollectionStore};
use cardvault_server::telemetry::{self, LogFormat};
use clap::{Args, Parser, Subcommand};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "cardvault")]
#[command(about = "CardVault gateway, collection service and catalog importer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Bind address for served processes
    #[arg(long, global = true, env = "CARDVAULT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port for served processes
    #[arg(long, global = true, env = "CARDVAULT_PORT", default_value_t = 8080)]
    port: u16,

    /// Log line format
    #[arg(long, global = true, env = "CARDVAULT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Expose Prometheus metrics on this port
    #[arg(long, global = true, env = "CARDVAULT_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Node id stamped into event timestamps
    #[arg(long, global = true, env = "CARDVAULT_NODE_ID", default_value = "cardvault")]
    node_id: String,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the API gateway
    Gateway {
        /// JSON route file; the built-in routes are used when absent
        #[arg(long, env = "CARDVAULT_ROUTES")]
        routes: Option<PathBuf>,

        /// Service registration `name=host:port[:secure]`, repeatable
        #[arg(long = "service", env = "CARDVAULT_SERVICES", value_delimiter = ',')]
        services: Vec<ServiceRegistration>,

        #[arg(long, value_enum, default_value_t = BalancerKind::RoundRobin)]
        balancer: BalancerKind,

        /// Backend call budget in seconds
        #[arg(long, default_value_t = 30)]
        upstream_timeout: u64,
    },

    /// Run the catalog service: admin import API and catalog reads
    Catalog {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Run the collection service with in-process event fan-out
    Collection {
        /// Delivery attempts before a message is dead-lettered
        #[arg(long, default_value_t = 3)]
        max_deliveries: u32,
    },

    /// Dry-run import of one set into an in-memory catalog; prints the result, nothing is persisted
    ImportSet {
        set_id: String,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Dry-run import of the newest sets into an in-memory catalog; prints the results, nothing is persisted
    ImportRecent {
        #[arg(long, default_value_t = 5)]
        count: u32,

        #[command(flatten)]
        source: SourceArgs,
    },
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Pokémon TCG API base URL
    #[arg(long, env = "POKEMONTCG_BASE_URL", default_value = "https://api.pokemontcg.io/v2")]
    source_url: String,

    /// Pokémon TCG API key, sent as `X-Api-Key`
    #[arg(long, env = "POKEMONTCG_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Per-call source timeout in seconds
    #[arg(long, env = "CARDVAULT_SOURCE_TIMEOUT", default_value_t = 60)]
    source_timeout: u64,

    /// Sets imported in parallel by a batch import
    #[arg(long, env = "CARDVAULT_IMPORT_CONCURRENCY", default_value_t = 1)]
    import_concurrency: usize,
}

impl SourceArgs {
    fn importer(&self, store: Arc<MemoryCatalogStore>) -> anyhow::Result<Importer> {
        let timeout = Duration::from_secs(self.source_timeout);
        let client = PokemonTcgClient::new(&SourceConfig {
            base_url: self.source_url.clone(),
            api_key: self.api_key.clone(),
            timeout,
        })
        .context("failed to build Pokémon TCG client")?;
        let config = ImporterConfig {
            source_timeout: timeout,
            concurrency: self.import_concurrency.max(1),
            ..ImporterConfig::default()
        };
        Ok(Importer::new(Arc::new(client), store, config))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_format)?;

    let server_config = ServerConfig {
        node_id: cli.node_id.clone(),
        ..ServerConfig::default()
    };
    let network_config = NetworkConfig {
        host: cli.host.clone(),
        port: cli.port,
        ..NetworkConfig::default()
    };

    match cli.command {
        Command::Gateway {
            routes,
            services,
            balancer,
            upstream_timeout,
        } => {
            install_metrics(cli.metrics_port, "gateway")?;
            let mut config = GatewayConfig {
                balancer,
                upstream_timeout: Duration::from_secs(upstream_timeout),
                ..GatewayConfig::default()
            };
            if let Some(path) = routes {
                config.routes = RouteTable::load(&path)
                    .with_context(|| format!("failed to load routes from {}", path.display()))?;
            }
            if !services.is_empty() {
                config.registrations = services;
            }
            info!(
                routes = config.routes.rules().len(),
                services = config.registrations.len(),
                "gateway configured"
            );
            let gateway = Arc::new(Gateway::from_config(config).context("failed to build gateway")?);
            serve(network_config, "gateway", gateway.router()).await
        }
        Command::Catalog { source } => {
            install_metrics(cli.metrics_port, "catalog")?;
            let store = Arc::new(MemoryCatalogStore::new());
            let importer = Arc::new(source.importer(Arc::clone(&store))?);
            let app = admin_router(importer).merge(catalog_router(store));
            serve(network_config, "catalog", app).await
        }
        Command::Collection { max_deliveries } => {
            install_metrics(cli.metrics_port, "collection")?;
            run_collection(network_config, &server_config, max_deliveries).await
        }
        Command::ImportSet { set_id, source } => {
            let importer = source.importer(Arc::new(MemoryCatalogStore::new()))?;
            let result = match importer.import_set(&set_id).await {
                Ok(done) => {
                    info!("{}", done.message());
                    ImportResult::Imported {
                        set_code: done.set_code,
                        cards_imported: done.cards_imported,
                    }
                }
                Err(e) => ImportResult::Failed {
                    set_code: set_id,
                    error: e.to_string(),
                },
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
            anyhow::ensure!(result.is_success(), "import failed");
            Ok(())
        }
        Command::ImportRecent { count, source } => {
            let importer = source.importer(Arc::new(MemoryCatalogStore::new()))?;
            let batch = importer.import_recent_sets(count).await?;
            info!(
                succeeded = batch.succeeded(),
                failed = batch.failed(),
                "recent set import finished"
            );
            println!("{}", serde_json::to_string_pretty(&batch)?);
            Ok(())
        }
    }
}

/// Wires the broker, per-handler topology and consumers in front of the
/// collection API, then serves until ctrl-c.
async fn run_collection(
    network_config: NetworkConfig,
    server_config: &ServerConfig,
    max_deliveries: u32,
) -> anyhow::Result<()> {
    let broker = Arc::new(InMemoryBroker::new(BrokerConfig {
        max_deliveries,
        tick_interval_ms: server_config.housekeeping_interval_ms,
        ..BrokerConfig::default()
    }));
    let topology = Topology::per_handler();
    let handlers: Vec<Arc<dyn EventHandler>> = vec![
        Arc::new(ActivityLogHandler::card_added()),
        Arc::new(ActivityLogHandler::card_removed()),
        Arc::new(ActivityLogHandler::card_updated()),
        Arc::new(CardPopularityHandler::new()),
    ];
    topology
        .apply(broker.as_ref(), handlers)
        .context("failed to declare event topology")?;

    let publisher = EventPublisher::new(
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        topology.exchange(),
    );
    let observer = EventPublishingObserver::new(publisher, Arc::new(HLC::new(server_config.node_id.clone())));
    let service = CollectionService::new(Arc::new(MemoryCollectionStore::new()), Arc::new(observer));

    let result = serve(network_config, "collection", collection_router(service)).await;
    broker.shutdown().await;
    result
}

async fn serve(config: NetworkConfig, service: &'static str, app: axum::Router) -> anyhow::Result<()> {
    let mut network = NetworkModule::new(config);
    let port = network.start().await?;
    info!(service, port, "starting");
    network
        .serve(service, app, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
}

fn install_metrics(port: Option<u16>, service: &str) -> anyhow::Result<()> {
    match port {
        Some(port) => telemetry::install_metrics(port, service),
        None => Ok(()),
    }
}
