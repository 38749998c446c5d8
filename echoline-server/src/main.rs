//! Echoline server entry point.
//!
//! Loads `.env` and the settings file, picks the speech backend, then serves
//! AudioSocket calls until Ctrl-C.

mod server;
mod settings;

use anyhow::{bail, Result};
use echoline_core::services::stub::{StubTranscriber, ToneSynthesizer};
use echoline_core::{CallServices, DeepgramConfig, DeepgramService};
use server::{log_events, CallServer};
use settings::{default_settings_path, load_settings, ServerSettings};
use tracing::{info, warn};

fn build_services(settings: &ServerSettings) -> Result<CallServices> {
    let format = settings.session_config().format;
    match settings.backend.as_str() {
        "stub" => {
            warn!("using stub speech backend: replies are tones");
            Ok(CallServices::new(
                StubTranscriber::new(format),
                ToneSynthesizer::new(format),
            ))
        }
        _ => {
            let Some(key) = settings.deepgram_api_key.as_deref() else {
                bail!("deepgram backend selected but DG_API_KEY is not set");
            };
            let mut config = DeepgramConfig::new(key);
            if let Some(url) = &settings.deepgram_base_url {
                config.base_url = url.clone();
            }
            config.tts_model = settings.tts_model.clone();
            config.request_timeout = settings.request_timeout();
            let service = DeepgramService::new(config, format)?;
            Ok(CallServices::new(service.clone(), service))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        // A missing .env is the normal case in production.
        if !e.not_found() {
            eprintln!("failed to load .env: {e}");
        }
    }

    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("echoline=info,echoline_core=info")),
        )
        .init();

    info!("Echoline starting");

    let settings_path = default_settings_path();
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    info!(
        settings_path = ?settings_path,
        listen_addr = %settings.listen_addr,
        backend = %settings.backend,
        max_concurrent_calls = settings.max_concurrent_calls,
        volume_threshold = settings.volume_threshold,
        min_speech_ms = settings.min_speech_ms,
        silence_ms = settings.silence_ms,
        "settings loaded"
    );

    let services = build_services(&settings)?;
    let server = CallServer::bind(
        &settings.listen_addr,
        settings.session_config(),
        services,
        settings.max_concurrent_calls,
    )
    .await?;

    tokio::spawn(log_events(server.subscribe()));

    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c handler failed; serving until killed");
                std::future::pending::<()>().await;
            }
        })
        .await
}
