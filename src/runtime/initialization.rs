//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! probe server startup, Kubernetes client setup and the reconciliation
//! context.

use crate::config::{ControllerConfig, LogFormat};
use crate::controller::gateway::{GpgKeyring, SopsDecryptor, ToolSettings};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{self, ServerState};
use crate::controller::store::KubeStore;
use crate::observability;
use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "sops_secret_controller=info";

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Reconciler context shared by both controllers
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("reconciler", &self.reconciler)
            .field("server_state", &self.server_state)
            .finish_non_exhaustive()
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}

fn tool_settings(binary: Option<&std::path::Path>, config: &ControllerConfig) -> ToolSettings {
    ToolSettings {
        binary: binary.map(std::path::Path::to_path_buf),
        gnupg_home: config.gnupg_home.clone(),
        timeout: config.gateway_timeout(),
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation and the owner index watch
/// - Reconciler setup with the sops and gpg adapters
///
/// # Errors
///
/// Fails if any of the above cannot be set up.
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    init_tracing(config.log_format)?;

    info!("Starting SOPS Secret Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    debug!("Configuration: {:?}", config);

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState::default());
    let listener = server::bind(config.metrics_port)
        .await
        .context("Failed to bind probe server")?;
    let serve_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = server::serve(listener, serve_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let store = KubeStore::new(client.clone(), config.watch_namespace.as_deref());
    let decryptor = SopsDecryptor::new(tool_settings(config.sops_binary.as_deref(), &config));
    let keyring = GpgKeyring::new(tool_settings(config.gpg_binary.as_deref(), &config));

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(store),
        Arc::new(decryptor),
        Arc::new(keyring),
        config,
    ));

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}
