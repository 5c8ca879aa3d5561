use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{LogConfig, ServeArgs, ServerConfig};
use crate::error::ServerError;
use pubsub_api::MessageLog;
use storage_jsonl::JsonlLog;
use storage_memory::MemoryLog;
use topic_api_server::ApiSettings;
use topic_engine::Broker;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("pubsub-server starting");

    // --- Load config ---
    let mut config = ServerConfig::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    tracing::info!(config = %args.config, "loaded config");

    // --- Message log ---
    let log: Arc<dyn MessageLog> = match &config.log {
        LogConfig::Memory(mem_cfg) => {
            tracing::info!(max_records = ?mem_cfg.max_records, "using in-memory message log");
            Arc::new(MemoryLog::new(mem_cfg.clone()))
        }
        LogConfig::Jsonl(jsonl_cfg) => {
            tracing::info!(data_dir = %jsonl_cfg.data_dir, sync_writes = jsonl_cfg.sync_writes, "using jsonl message log");
            Arc::new(JsonlLog::new(jsonl_cfg))
        }
    };
    log.init().await?;

    // --- Broker ---
    let options = config.subscriber.options();
    let broker = Arc::new(Broker::new(log.clone(), options));
    tracing::info!(buffer = options.buffer, overflow = ?options.overflow, "broker ready");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- API server (HTTP + SSE) ---
    let listener = topic_api_server::bind(&config.bind).await?;
    let settings = ApiSettings {
        keep_alive: config.subscriber.keep_alive(),
    };
    let mut api_handle = tokio::spawn(topic_api_server::serve(
        listener,
        broker,
        settings,
        token.clone(),
    ));
    tracing::info!(bind = %config.bind, "api server (http+sse) listening");

    // --- Wait for Ctrl+C, or the server dying on its own ---
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
        }
        joined = &mut api_handle => {
            token.cancel();
            flush_log(log.as_ref()).await;
            joined??;
            tracing::warn!("api server stopped unexpectedly");
            return Ok(());
        }
    }

    token.cancel();

    // Drain: give open streams a bounded time to finish
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    match tokio::time::timeout(drain, &mut api_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "api server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "api task failed"),
        Err(_) => {
            tracing::warn!(timeout_secs = config.shutdown_timeout_secs, "api server did not stop in time, aborting");
            api_handle.abort();
        }
    }

    flush_log(log.as_ref()).await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn flush_log(log: &dyn MessageLog) {
    if let Err(e) = log.flush().await {
        tracing::error!(error = %e, "message log flush error");
    }
}
