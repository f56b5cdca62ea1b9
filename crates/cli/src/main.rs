use std::sync::Arc;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    veil_chat::ChatRepository,
    veil_gateway::{CoreServices, GatewayState},
    veil_service_traits::{MemoryAuthService, MemoryProfileService, NoopWorkerQueue},
    veil_store::{DocumentStore, MemoryStore, SqliteStore},
    veil_vault::MemoryVault,
};

#[derive(Parser)]
#[command(name = "veild", about = "veil — sync core of an end-to-end encrypted chat app")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Development mode: in-memory collaborators and a printed dev token.
    #[arg(long, global = true, default_value_t = false)]
    dev: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sync gateway (default when no subcommand is provided).
    Serve,
    /// Load and validate the configuration, then print it.
    CheckConfig,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    let mut config = veil_config::discover_and_load();
    if let Some(bind) = &cli.bind {
        config.gateway.host = bind.clone();
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_serve(config, cli.dev),
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

#[tokio::main]
async fn run_serve(config: veil_config::VeilConfig, dev: bool) -> anyhow::Result<()> {
    let store: Arc<dyn DocumentStore> = if dev && config.store.path == "veil.db" {
        info!("dev mode: using in-memory document store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&config.store.path).await?)
    };
    let vault = Arc::new(MemoryVault::new());

    let services = if dev {
        let auth = Arc::new(MemoryAuthService::new());
        let token = format!("dev-{}", uuid::Uuid::new_v4().simple());
        auth.insert_token(token.clone(), "dev-user");
        info!(%token, "dev mode: connect with this token (any device passes step-up with code 000000)");
        let user = veil_common::UserHash::derive(&config.auth.user_hash_salt, "dev-user");
        auth.set_step_up_code(&user, "000000");
        CoreServices {
            auth,
            profile: Arc::new(MemoryProfileService::new()),
            worker_queue: Arc::new(NoopWorkerQueue),
        }
    } else {
        CoreServices::noop()
    };

    let repo = ChatRepository::new(store, vault, &config.cache, config.store.clone());
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = GatewayState::new(repo, services, config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    veil_gateway::serve(state, listener).await
}
