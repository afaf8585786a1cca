use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use secrecy::SecretString;

use supervisor_core::provider::LlmProvider;
use supervisor_engine::tools::create_registry;
use supervisor_engine::{SessionManager, SessionManagerConfig};
use supervisor_llm::{AnthropicConfig, AnthropicProvider, MockProvider};
use supervisor_server::ServerConfig;
use supervisor_settings::{ModelProvider, SessionMode, SupervisorSettings};
use supervisor_store::{Database, SqliteHistoryFactory};
use supervisor_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "supervisor", version, about = "Session-aware agent supervisor")]
struct Args {
    /// Settings file. Defaults to `SUPERVISOR_CONFIG` or ~/.supervisor/settings.json.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => supervisor_settings::load_settings_from_path(path),
        None => supervisor_settings::load_settings(),
    }
    .context("failed to load settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let format = match settings.logging.format {
        supervisor_settings::LogFormat::Json => LogFormat::Json,
        supervisor_settings::LogFormat::Pretty => LogFormat::Pretty,
    };
    let _telemetry = init_telemetry(TelemetryConfig::from_levels(
        &settings.logging.level,
        settings
            .logging
            .modules
            .iter()
            .map(|(module, level)| (module.as_str(), level.as_str())),
        format,
    ));

    tracing::info!(version = %settings.app_version, "starting supervisor");

    let provider = build_provider(&settings)?;
    let tools = create_registry(&settings, None).context("failed to build tool registry")?;
    tracing::info!(tools = ?tools.names(), "tools registered");

    let mut sessions = SessionManager::new(
        provider,
        Arc::new(tools),
        SessionManagerConfig::from_settings(&settings),
    );
    if settings.session.mode == SessionMode::ExternalStore {
        let path = PathBuf::from(&settings.memory_store.path);
        let db = Database::open(&path).context("failed to open history database")?;
        sessions = sessions.with_history_factory(Arc::new(SqliteHistoryFactory::new(db)));
    }

    let handle = supervisor_server::start(ServerConfig::from_settings(&settings), Arc::new(sessions))
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "supervisor ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn build_provider(settings: &SupervisorSettings) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let model = &settings.model;
    match model.provider {
        ModelProvider::Mock => {
            tracing::warn!("using offline echo backend");
            Ok(Arc::new(MockProvider::echo().with_model(model.model_id.clone())))
        }
        ModelProvider::Anthropic => {
            let Ok(key) = std::env::var(&model.api_key_env) else {
                bail!("{} is not set", model.api_key_env);
            };
            let mut config = AnthropicConfig::new(SecretString::from(key), model.model_id.clone());
            config.base_url = model.base_url.clone();
            let provider = AnthropicProvider::new(config).context("failed to build provider")?;
            Ok(Arc::new(provider))
        }
    }
}
