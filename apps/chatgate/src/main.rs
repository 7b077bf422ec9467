use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

mod cli;
mod data_dir;

use chatgate_admin::AdminState;
use chatgate_common::{GlobalConfig, GlobalConfigPatch};
use chatgate_core::{BrowserConfig, Dispatcher, DispatcherConfig, GatewayContext, WreqBrowser};
use chatgate_provider_core::{CredentialPool, CredentialStore, SessionPool, UpstreamBrowser};
use chatgate_router::{ModelTable, ProxySettings, ProxyState, proxy_router};
use chatgate_storage::{JsonFileStorage, SharedTokenFile};

use crate::cli::Cli;
use crate::data_dir::prepare_data_dir;

#[tokio::main]
async fn main() {
    init_tracing();
    match run().await {
        Ok(ExitReason::Signal) => {}
        Ok(ExitReason::CredentialsExhausted) => {
            eprintln!("chatgate stopped: no eligible upstream credential left");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("chatgate failed: {err:#}");
            std::process::exit(1);
        }
    }
}

enum ExitReason {
    Signal,
    CredentialsExhausted,
}

async fn run() -> anyhow::Result<ExitReason> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(
        event = "config_loaded",
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        upstream = %config.upstream_base_url,
        proxy = %config.proxy.as_deref().unwrap_or(""),
        default_model = %config.default_model,
        exhaustion_policy = %config.exhaustion_policy,
        api_keys = config.api_keys.len(),
        admin = config.admin_key.is_some()
    );

    prepare_data_dir(&config.data_dir)
        .await
        .with_context(|| format!("prepare data dir {}", config.data_dir.display()))?;

    let store: Arc<dyn CredentialStore> = Arc::new(JsonFileStorage::new(config.credentials_path()));
    let credentials = Arc::new(
        CredentialPool::load(store)
            .await
            .context("load credentials")?,
    );
    info!(
        event = "credentials_loaded",
        path = %config.credentials_path().display(),
        total = credentials.len().await,
        eligible = credentials.has_eligible().await
    );

    let token_file = SharedTokenFile::new(config.shared_token_path());
    let shared_token = token_file
        .load()
        .await
        .context("read shared browser token")?;
    if credentials.is_empty().await && shared_token.is_none() {
        warn!(
            event = "no_identity",
            "no credentials and no shared browser token; requests fail until one is provided"
        );
    }

    let browser: Arc<dyn UpstreamBrowser> = Arc::new(
        WreqBrowser::new(BrowserConfig::from_global(&config)).context("build upstream client")?,
    );
    let sessions = Arc::new(SessionPool::new(browser, config.session_pool_capacity));
    let context = Arc::new(GatewayContext::new(shared_token).with_token_file(token_file));
    let dispatcher = Arc::new(Dispatcher::new(
        credentials,
        sessions.clone(),
        context.clone(),
        DispatcherConfig::from_global(&config),
    ));

    let proxy = proxy_router(ProxyState {
        dispatcher: dispatcher.clone(),
        models: Arc::new(ModelTable::new(config.default_model.clone())),
        settings: Arc::new(ProxySettings::from_global(&config)),
    });
    let mut app = axum::Router::new()
        .nest("/api", proxy.clone())
        .nest("/v1", proxy);
    if let Some(admin_key) = config.admin_key.as_deref() {
        app = app.nest(
            "/admin",
            chatgate_admin::router(AdminState {
                dispatcher: dispatcher.clone(),
                global: Arc::new(config.clone()),
                admin_key: Arc::from(admin_key),
            }),
        );
    }

    serve(app, &config.bind_addr(), context.subscribe_shutdown()).await?;
    sessions.clear().await;
    let reason = if context.shutdown_requested() {
        ExitReason::CredentialsExhausted
    } else {
        ExitReason::Signal
    };
    info!(event = "stopped", exhausted = matches!(reason, ExitReason::CredentialsExhausted));
    Ok(reason)
}

/// defaults < config file < ENV/CLI.
fn load_config(cli: &Cli) -> anyhow::Result<GlobalConfig> {
    let mut patch = GlobalConfigPatch::default();
    if let Some(path) = cli.config.as_deref() {
        patch.overlay(GlobalConfigPatch::from_json_file(path)?);
        info!(event = "config_file_loaded", path = %path.display());
    }
    patch.overlay(cli.to_patch());
    Ok(patch.into_config()?)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chatgate=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(
    app: axum::Router,
    bind: &str,
    mut exhausted_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(event = "listening", addr = %bind);

    let exhausted = async move {
        loop {
            if *exhausted_rx.borrow_and_update() {
                return;
            }
            if exhausted_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(event = "shutdown_signal", "ctrl-c received");
            }
            _ = exhausted => {
                warn!(event = "shutdown_exhausted", "stopping: credentials exhausted");
            }
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")?;
    Ok(())
}
