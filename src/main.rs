use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use iris_gateway::broadcast::BroadcastHub;
use iris_gateway::config::{ConfigStore, FileConfigStore, GatewayConfig};
use iris_gateway::dispatch::{Dispatcher, LoggingExecutor};
use iris_gateway::gateway::{Gateway, GatewayDeps, router};
use iris_gateway::observer::{ChatLogPoller, EventSource, ObserverStatus};
use iris_gateway::store::{ChatDatabase, LibSqlChatDatabase};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let gateway_config = GatewayConfig::from_env();

    // Initialize tracing; the guard must live until exit to flush file logs.
    let _log_guard = init_tracing(&gateway_config);

    let settings_store = Arc::new(
        FileConfigStore::load(&gateway_config.settings_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to load settings from {}",
                    gateway_config.settings_path.display()
                )
            })?,
    );
    let config: Arc<dyn ConfigStore> = settings_store;
    let settings = config.get().await;
    let port = gateway_config.port_override.unwrap_or(settings.bot_http_port);

    eprintln!("📡 Iris gateway v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Bot: {}", settings.bot_name);
    eprintln!("   HTTP: http://{}:{}/dashboard", gateway_config.bind_addr, port);
    eprintln!("   Events WS: ws://{}:{}/ws", gateway_config.bind_addr, port);
    eprintln!("   Settings: {}", gateway_config.settings_path.display());

    // ── Dispatch + broadcast ─────────────────────────────────────────────
    let dispatcher = Dispatcher::start(Arc::new(LoggingExecutor), Arc::clone(&config)).await;
    eprintln!(
        "   Executor: dry-run (send rate {} ms)",
        settings.message_send_rate
    );

    let hub = BroadcastHub::with_limits(
        gateway_config.subscriber_buffer,
        gateway_config.subscriber_timeout,
    );
    let observer = Arc::new(ObserverStatus::default());
    let shutdown = CancellationToken::new();

    // ── Chat database + observer ─────────────────────────────────────────
    let chat_db: Option<Arc<dyn ChatDatabase>> = match &gateway_config.chat_db_path {
        Some(path) => match LibSqlChatDatabase::open(path).await {
            Ok(db) => {
                eprintln!("   Chat DB: {}", path.display());
                Some(Arc::new(db) as Arc<dyn ChatDatabase>)
            }
            Err(e) => {
                eprintln!("   Warning: chat database unavailable: {}", e);
                None
            }
        },
        None => {
            eprintln!("   Chat DB: not configured (/query disabled, not observing)");
            None
        }
    };

    let observer_handle = chat_db.as_ref().map(|db| {
        let poller = ChatLogPoller::new(Arc::clone(db), None, Arc::clone(&config));
        let (hub, observer, cancel) = (Arc::clone(&hub), Arc::clone(&observer), shutdown.clone());
        tokio::spawn(async move { poller.run(hub, observer, cancel).await })
    });

    // ── HTTP server ──────────────────────────────────────────────────────
    let gateway = Gateway::new(GatewayDeps {
        dispatcher: Arc::clone(&dispatcher),
        hub,
        config,
        observer,
        chat_db,
        decryptor: None,
        referer: gateway_config.referer.clone(),
    });
    let app = router(gateway);

    let addr = format!("{}:{}", gateway_config.bind_addr, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Gateway listening");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        signal.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("HTTP server failed")?;

    dispatcher.shutdown().await;
    if let Some(handle) = observer_handle {
        let _ = handle.await;
    }
    Ok(())
}

fn init_tracing(config: &GatewayConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "iris-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}
