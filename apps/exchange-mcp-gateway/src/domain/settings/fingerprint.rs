//! Client cache key derivation.
//!
//! A fingerprint captures every configuration field that affects how an
//! exchange client is built. Two requests with equal fingerprints are
//! served by the same cached client.

use std::fmt;

use super::{MarketType, ProxySettings};

/// Deterministic cache key for one exchange client configuration.
///
/// Textual form: `<exchange>:<market>:<proxy>:<auth>`, where `<proxy>` is
/// `direct` or `proxy=<redacted-url>[+auth]` and `<auth>` is `public` or
/// `apikey`. Credentials never appear in the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientFingerprint {
    exchange: String,
    market_type: MarketType,
    proxy: Option<ProxyFingerprint>,
    has_api_credentials: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProxyFingerprint {
    url: String,
    authenticated: bool,
}

impl ClientFingerprint {
    /// Derive the fingerprint for an exchange under the given settings.
    #[must_use]
    pub fn derive(
        exchange: &str,
        market_type: MarketType,
        proxy: &ProxySettings,
        has_api_credentials: bool,
    ) -> Self {
        let proxy = proxy
            .enabled
            .then(|| proxy.redacted_url())
            .flatten()
            .map(|url| ProxyFingerprint {
                url,
                authenticated: proxy.has_credentials(),
            });

        Self {
            exchange: exchange.trim().to_lowercase(),
            market_type,
            proxy,
            has_api_credentials,
        }
    }

    /// Exchange identifier, lowercased.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Market type the client is built for.
    #[must_use]
    pub const fn market_type(&self) -> MarketType {
        self.market_type
    }

    /// Whether the client is built with a proxy.
    #[must_use]
    pub const fn uses_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// Whether the client is built with exchange API credentials.
    #[must_use]
    pub const fn has_api_credentials(&self) -> bool {
        self.has_api_credentials
    }

    /// Textual cache key.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ClientFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.exchange, self.market_type)?;
        match &self.proxy {
            Some(proxy) if proxy.authenticated => write!(f, "proxy={}+auth", proxy.url)?,
            Some(proxy) => write!(f, "proxy={}", proxy.url)?,
            None => f.write_str("direct")?,
        }
        let auth = if self.has_api_credentials {
            "apikey"
        } else {
            "public"
        };
        write!(f, ":{auth}")
    }
}
