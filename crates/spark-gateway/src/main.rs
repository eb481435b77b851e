use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use snafu::{ResultExt, Snafu};
use spark_gateway::{
    agent::{AgentApi, AgentError, HttpAgentClient},
    config::{ConfigError, GatewayConfig},
    fleet::{ClusterRegistry, RegistryError},
    http::{
        ApiState,
        auth::{AuthChain, AuthError},
    },
    ident::IdGenerator,
    livy::{BatchService, LivyState, store::PostgresBatchStore, store::StoreError},
    routing::{ClusterRouter, FallbackRouter, RoutingError},
    service::{ApplicationService, urls::StatusUrlRenderer, urls::UrlsError},
};
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-cluster submission gateway for Spark applications")]
enum Command {
    /// Run the gateway.
    Run(Arguments),

    /// Validate a configuration file and exit.
    CheckConfig(Arguments),
}

#[derive(Debug, clap::Args)]
struct Arguments {
    /// Path to the gateway configuration file.
    #[arg(long, env = "SPARK_GATEWAY_CONFIG")]
    config: PathBuf,
}

#[derive(Debug, Snafu)]
enum StartupError {
    #[snafu(display("failed to load the configuration"))]
    LoadConfig { source: ConfigError },

    #[snafu(display("the configuration is invalid"))]
    InvalidConfig { source: ConfigError },

    #[snafu(display("failed to build the cluster registry"))]
    BuildRegistry { source: RegistryError },

    #[snafu(display("failed to build the cluster router"))]
    BuildRouter { source: RoutingError },

    #[snafu(display("failed to build the agent client"))]
    BuildAgentClient { source: AgentError },

    #[snafu(display("failed to parse the status url templates"))]
    BuildUrlRenderer { source: UrlsError },

    #[snafu(display("failed to build the authentication chain"))]
    BuildAuthChain { source: AuthError },

    #[snafu(display("failed to connect the batch store"))]
    ConnectStore { source: StoreError },

    #[snafu(display("failed to bind {address:?}"))]
    Bind {
        source: std::io::Error,
        address: String,
    },

    #[snafu(display("server error"))]
    Serve { source: std::io::Error },
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Command::parse() {
        Command::Run(arguments) => run(arguments).await,
        Command::CheckConfig(arguments) => check_config(&arguments),
    }
}

fn load(arguments: &Arguments) -> Result<GatewayConfig, StartupError> {
    let config = GatewayConfig::load(&arguments.config).context(LoadConfigSnafu)?;
    config.validate().context(InvalidConfigSnafu)?;

    Ok(config)
}

fn check_config(arguments: &Arguments) -> Result<(), StartupError> {
    load(arguments)?;
    println!("configuration {} is valid", arguments.config.display());

    Ok(())
}

async fn run(arguments: Arguments) -> Result<(), StartupError> {
    let config = load(&arguments)?;

    let registry =
        Arc::new(ClusterRegistry::new(config.clusters.clone()).context(BuildRegistrySnafu)?);

    let primary = ClusterRouter::new(
        Arc::clone(&registry),
        config.cluster_router.router_type,
        &config.cluster_router,
        &config.spark_manager,
        &config.debug_ports,
    )
    .context(BuildRouterSnafu)?;
    let fallback = ClusterRouter::new(
        Arc::clone(&registry),
        config.cluster_router.fallback_type,
        &config.cluster_router,
        &config.spark_manager,
        &config.debug_ports,
    )
    .context(BuildRouterSnafu)?;

    let agent = Arc::new(
        HttpAgentClient::new(registry.all(), &config.spark_manager, &config.debug_ports)
            .context(BuildAgentClientSnafu)?,
    );
    let urls = StatusUrlRenderer::new(&config.gateway.status_url_templates)
        .context(BuildUrlRendererSnafu)?;

    let service = ApplicationService::new(
        Arc::clone(&registry),
        FallbackRouter::new(primary, fallback),
        IdGenerator::new(),
        Arc::clone(&agent) as Arc<dyn AgentApi>,
        urls,
        config.selector(),
    );

    let chain =
        Arc::new(AuthChain::from_config(&config.gateway.middleware).context(BuildAuthChainSnafu)?);

    let livy = match &config.database {
        Some(database) => {
            let store = PostgresBatchStore::connect(database)
                .await
                .context(ConnectStoreSnafu)?;

            Some(LivyState {
                service: BatchService::new(
                    service.clone(),
                    Arc::new(store),
                    config.livy.default_namespace.clone(),
                    config.gateway.default_log_lines,
                ),
            })
        }
        None => {
            info!("no database configured, the numeric-id surface stays disabled");
            None
        }
    };

    let api = ApiState {
        service,
        default_log_lines: config.gateway.default_log_lines,
    };
    let router = spark_gateway::http::router(api, livy, chain);

    let address = format!("0.0.0.0:{}", config.gateway.gateway_port);
    let listener = TcpListener::bind(&address).await.context(BindSnafu {
        address: address.clone(),
    })?;
    info!(%address, "spark gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(ServeSnafu)
}

async fn shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("create SIGINT listener");
    let mut sigterm = signal(SignalKind::terminate()).expect("create SIGTERM listener");

    tokio::select! {
        _ = sigint.recv() => debug!("received SIGINT"),
        _ = sigterm.recv() => debug!("received SIGTERM"),
    }
}
