//! edr-refresh - operator tool for the EDR token refresh protocol
//!
//! Generates signing keys, validates configuration, issues credentials
//! against an in-memory store and inspects tokens.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde_json::{Map, Value, json};
use tracing::{error, info};

use edr_token_refresh::{
    cli::{Cli, Command},
    config::Config,
    refresh::TokenRefreshService,
    replay,
    setup_tracing,
    store::{AUDIENCE_PROPERTY, DataAddress, PROCESS_ID_PROPERTY},
    token::{ClaimSet, GeneratedKeyPair, claims::JTI, decode_unverified},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Keygen { ref out_dir, ref name } => run_keygen(out_dir, name),
        Command::CheckConfig => run_check_config(&cli),
        Command::Issue {
            ref audience,
            ref process_id,
            ref jti,
            ref asset_id,
        } => {
            run_issue(
                &cli,
                audience,
                process_id.as_deref(),
                jti.as_deref(),
                asset_id.as_deref(),
            )
            .await
        }
        Command::Inspect { ref token } => run_inspect(token),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;
    Ok(config)
}

/// Write a fresh ES256 key pair
fn run_keygen(out_dir: &std::path::Path, name: &str) -> anyhow::Result<()> {
    let pair = GeneratedKeyPair::generate()?;
    let (private_path, public_path) = pair
        .write_to(out_dir, name)
        .with_context(|| format!("writing keys to {}", out_dir.display()))?;

    info!(private = %private_path.display(), public = %public_path.display(), "Generated key pair");
    println!("✅ Private key: {}", private_path.display());
    println!("✅ Public key:  {}", public_path.display());
    println!("   algorithm: ES256");
    Ok(())
}

/// Print the effective configuration
fn run_check_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let yaml = serde_yaml::to_string(&config).context("serializing configuration")?;
    println!("✅ Configuration valid\n");
    println!("{yaml}");
    Ok(())
}

/// Run `obtain` once and print the credential
async fn run_issue(
    cli: &Cli,
    audience: &str,
    process_id: Option<&str>,
    jti: Option<&str>,
    asset_id: Option<&str>,
) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let service = TokenRefreshService::from_config(&config)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let reaper = replay::spawn_reaper(
        service.replay_ledger(),
        config.replay.reap_interval,
        shutdown_rx,
    );

    let mut claims = ClaimSet::new();
    if let Some(jti) = jti {
        claims.insert(JTI, jti);
    }

    let mut address = DataAddress::new("HttpData");
    if let Some(asset_id) = asset_id {
        address = address.with_property("assetId", asset_id);
    }

    let mut properties = Map::new();
    properties.insert(AUDIENCE_PROPERTY.to_string(), Value::from(audience));
    if let Some(process_id) = process_id {
        properties.insert(PROCESS_ID_PROPERTY.to_string(), Value::from(process_id));
    }

    let credential = service.obtain(claims, address, properties).await;

    let _ = shutdown_tx.send(());
    let _ = reaper.await;

    let credential = credential?;
    println!("{}", serde_json::to_string_pretty(&credential)?);
    Ok(())
}

/// Print header and claims without verification
fn run_inspect(token: &str) -> anyhow::Result<()> {
    let (header, claims) = decode_unverified(token.trim())?;
    let out = json!({
        "header": header,
        "claims": claims,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    println!("⚠️  Signature NOT verified");
    Ok(())
}
