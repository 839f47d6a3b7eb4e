mod cli;
mod commands;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use parley_config::ParleyConfig;
use parley_engine::{
    ClientConfig, CredentialProvider, EnvToken, GenerationParameters, HttpBackend,
    SessionController, StaticToken,
};
use tracing_subscriber::EnvFilter;

/// Load environment variables from a .env file (KEY=VALUE lines).
/// Variables already set in the environment win.
fn load_dotenv() {
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}

/// `RUST_LOG` wins, then `--log-level`, then the config file.
fn log_filter(args: &cli::Args, config: &ParleyConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directive = match args.log_level.as_deref() {
        Some(level) if level.contains('=') => level.to_string(),
        Some(level) => format!("parley={level}"),
        None => config.logging.level.as_directive().to_string(),
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("parley=info"))
}

fn init_logging(args: &cli::Args, config: &ParleyConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(args, config))
        .with_writer(std::io::stderr)
        .init();
}

fn generation_parameters(config: &ParleyConfig) -> GenerationParameters {
    let g = &config.generation;
    GenerationParameters {
        model: g.model.clone(),
        output_length: g.output_length,
        temperature: g.temperature,
        top_p: g.top_p,
        top_k: g.top_k,
        repetition_penalty: g.repetition_penalty,
    }
}

fn build_controller(
    args: &cli::Args,
    config: &ParleyConfig,
) -> Result<SessionController, parley_engine::EngineError> {
    let api = &config.api;
    let client = ClientConfig::new(args.base_url.clone().unwrap_or_else(|| api.base_url.clone()))
        .with_connect_timeout(Duration::from_secs(api.connect_timeout_secs.into()))
        .with_request_timeout(Duration::from_secs(api.request_timeout_secs.into()))
        .with_max_stream_duration(Duration::from_secs(api.max_stream_secs.into()));

    let credentials: Arc<dyn CredentialProvider> = match &args.token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(EnvToken::new(api.token_env.clone())),
    };

    let max_stream = client.max_stream_duration;
    let backend = Arc::new(HttpBackend::new(client, credentials)?);
    Ok(SessionController::new(backend, max_stream).with_parameters(generation_parameters(config)))
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();

    let args = cli::parse();

    let loaded = parley_config::load_config_from(args.config.as_deref());
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => ParleyConfig::default(),
    };
    init_logging(&args, &config);

    tracing::debug!("parley v{} starting", env!("CARGO_PKG_VERSION"));
    if let Err(e) = &loaded {
        tracing::warn!("Config load failed, using defaults: {e}");
    }

    if matches!(args.command, cli::Command::Config) {
        println!("{}", parley_config::config_to_json(&config));
        return ExitCode::SUCCESS;
    }

    let controller = match build_controller(&args, &config) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match commands::run(&controller, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(kind = ?e.kind(), "command failed");
            eprintln!("error: {}", parley_common::ParleyError::from(e));
            ExitCode::FAILURE
        }
    }
}
