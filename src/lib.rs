//! EDR Token Refresh Library
//!
//! Issuance, refresh and revocation of data-plane access credentials
//! (Endpoint Data References).
//!
//! # Features
//!
//! - **Obtain**: signed short-lived access token plus a single-use refresh secret
//! - **Resolve**: verify an access token and load the credential it names
//! - **Refresh**: holder-authenticated rotation with replay protection
//! - **Revoke**: drop every credential of a transfer process
//! - **Pluggable**: store, vault, replay ledger and key resolution are traits
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use edr_token_refresh::{
//!     refresh::{RefreshSettings, TokenRefreshService},
//!     store::DataAddress,
//!     token::{ClaimSet, GeneratedKeyPair, KeyRing},
//! };
//!
//! let kid = "did:web:provider#key-1";
//! let pair = GeneratedKeyPair::generate()?;
//! let local = KeyRing::new();
//! local.insert(kid, pair.verification_key()?);
//!
//! let service = TokenRefreshService::new(
//!     RefreshSettings::new("did:web:provider", "https://provider.example/api/public"),
//!     Arc::new(pair.signing_key(kid)?),
//!     Arc::new(local),
//!     Arc::new(KeyRing::new()),
//! );
//!
//! let mut properties = serde_json::Map::new();
//! properties.insert("audience".into(), "did:web:consumer".into());
//! let credential = service
//!     .obtain(ClaimSet::new(), DataAddress::new("HttpData"), properties)
//!     .await?;
//! println!("{}", credential.access_token);
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod refresh;
pub mod replay;
pub mod rules;
pub mod store;
pub mod token;
pub mod vault;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("cannot install tracing subscriber: {e}")))
}
