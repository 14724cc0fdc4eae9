//! # modhub
//!
//! Module hub binary: loads settings, wires the key store, user directory and
//! template store into the hub, and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use modhub_auth::keys::encode_verifying_key;
use modhub_auth::{Authenticator, KeyStore, TokenCache, VerificationMode};
use modhub_core::templates::FsTemplateStore;
use modhub_core::users::StaticUserDirectory;
use modhub_server::hub::ConnectionRegistry;
use modhub_server::{Hub, HubServer, ServerConfig};
use modhub_settings::HubSettings;
use modhub_telemetry::TelemetryConfig;
use rand_core::OsRng;
use tracing::{Level, info, warn};

/// Module communication hub.
#[derive(Parser, Debug)]
#[command(name = "modhub", about = "Module communication hub", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hub server.
    Serve {
        /// Settings file (JSON).
        #[arg(long, default_value = "modhub.json")]
        config: PathBuf,
    },
    /// Generate an Ed25519 key pair for a module.
    Keygen {
        /// Module identity the key belongs to.
        #[arg(long)]
        name: String,
    },
}

fn telemetry_config(settings: &HubSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: settings
            .logging
            .level
            .as_filter_str()
            .parse()
            .unwrap_or(Level::INFO),
        module_levels: vec![("tower_http".into(), Level::WARN)],
        json: settings.logging.json,
    }
}

fn load_key_store(settings: &HubSettings, mode: VerificationMode) -> Result<KeyStore> {
    let path = Path::new(&settings.auth.verify_keys_path);
    if mode == VerificationMode::InsecureSkip && !path.exists() {
        warn!(path = %path.display(), "no verify keys file; running with an empty key store");
        return Ok(KeyStore::default());
    }
    KeyStore::from_json_file(path)
        .with_context(|| format!("Failed to load verify keys from {}", path.display()))
}

fn load_users(settings: &HubSettings) -> Result<StaticUserDirectory> {
    match &settings.users.directory_path {
        Some(path) => StaticUserDirectory::from_json_file(Path::new(path))
            .with_context(|| format!("Failed to load user directory from {path}")),
        None => {
            warn!("no user directory configured; user lookups will fail with user_not_found");
            Ok(StaticUserDirectory::default())
        }
    }
}

fn build_hub(settings: &HubSettings) -> Result<Hub> {
    let mode = if settings.auth.insecure_skip_verification {
        warn!("signature verification is DISABLED; never run this way in production");
        VerificationMode::InsecureSkip
    } else {
        VerificationMode::Enforced
    };

    let keys = load_key_store(settings, mode)?;
    let users = load_users(settings)?;
    info!(
        modules = keys.len(),
        users = users.len(),
        templates = %settings.templates.directory,
        "collaborators loaded"
    );

    Ok(Hub::new(
        Authenticator::new(Arc::new(keys), mode),
        Arc::new(ConnectionRegistry::new(settings.server.max_connections)),
        Arc::new(TokenCache::new(settings.auth.token_ttl())),
        Arc::new(users),
        Arc::new(FsTemplateStore::new(&settings.templates.directory)),
    ))
}

async fn serve(config_path: &Path) -> Result<()> {
    let settings = modhub_settings::load_settings_from_path(config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;

    modhub_telemetry::init_telemetry(&telemetry_config(&settings))
        .context("Failed to initialise logging")?;

    let metrics = modhub_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let hub = build_hub(&settings)?;
    let server = HubServer::new(ServerConfig::from(&settings.server), hub, Some(metrics));

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("modhub listening on http://{addr} (modules attach at ws://{addr}/websocket?module=<name>)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    server.shutdown().shutdown();
    let _ = handle.await;
    Ok(())
}

fn keygen(name: &str) {
    let key = SigningKey::generate(&mut OsRng);
    let entry = serde_json::json!({ name: encode_verifying_key(&key.verifying_key()) });
    println!("signing key for '{name}' (keep private): {}", STANDARD.encode(key.to_bytes()));
    println!("verify_keys.json entry: {entry}");
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve { config } => serve(&config).await,
        Command::Keygen { name } => {
            keygen(&name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_defaults_config_path() {
        let cli = Cli::parse_from(["modhub", "serve"]);
        match cli.command {
            Command::Serve { config } => assert_eq!(config, PathBuf::from("modhub.json")),
            Command::Keygen { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn keygen_requires_name() {
        assert!(Cli::try_parse_from(["modhub", "keygen"]).is_err());
        let cli = Cli::parse_from(["modhub", "keygen", "--name", "crud"]);
        assert!(matches!(cli.command, Command::Keygen { name } if name == "crud"));
    }

    #[test]
    fn telemetry_follows_logging_settings() {
        let mut settings = HubSettings::default();
        settings.logging.json = true;
        let config = telemetry_config(&settings);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.json);
    }

    #[test]
    fn insecure_mode_tolerates_missing_keys_file() {
        let mut settings = HubSettings::default();
        settings.auth.verify_keys_path = "/nonexistent/verify_keys.json".into();
        let keys = load_key_store(&settings, VerificationMode::InsecureSkip).unwrap();
        assert!(keys.is_empty());
        assert!(load_key_store(&settings, VerificationMode::Enforced).is_err());
    }
}
