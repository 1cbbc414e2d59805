//! Authentication utilities for the Binance REST API
//!
//! Signed endpoints take an HMAC-SHA256 signature of the full query string,
//! hex encoded, keyed with the API secret.

use anyhow::{anyhow, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::ExchangeConfig;

type HmacSha256 = Hmac<Sha256>;

/// Sign a query string with the API secret
pub fn sign_query(query: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// API credentials container
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Credentials loaded into the exchange section from the environment
    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .context("EXCHANGE_API_KEY not found in environment")?;
        let api_secret = config
            .api_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .context("EXCHANGE_API_SECRET not found in environment")?;
        Ok(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Append `signature=...` to `query`
    pub fn signed_query(&self, query: &str) -> Result<String> {
        let signature = sign_query(query, &self.api_secret)?;
        Ok(format!("{}&signature={}", query, signature))
    }
}

// Keeps the secret out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}
