//! Session configuration.
//!
//! One [`ClassroomConfig`] is built by the embedding shell (CLI flags, env,
//! or deserialized from its own settings store) and handed to the session
//! controller. `validate()` is called before any network activity.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default signaling relay endpoint, matching the relay binary's default bind.
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8787";

/// Public STUN used when the deployment provides nothing else.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// TURN relay entry. STUN entries are bare URLs; TURN carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServer {
    /// `turn:` or `turns:` URL
    pub url: String,
    pub username: String,
    pub credential: String,
}

/// Configuration for a classroom session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassroomConfig {
    /// WebSocket URL of the signaling relay (`ws://` or `wss://`)
    pub signaling_url: String,

    /// STUN server URLs passed to ICE
    pub stun_servers: Vec<String>,

    /// TURN servers passed to ICE (credentials included)
    pub turn_servers: Vec<TurnServer>,

    /// Connection attempts before giving up (first try included)
    pub connect_attempts: u32,

    /// Backoff before the second attempt; doubles per retry
    pub connect_backoff_ms: u64,

    /// Base URL of the room directory used to resolve course metadata.
    /// `None` disables the lookup; joins then announce without a course id.
    pub directory_url: Option<String>,

    /// Per-request timeout for directory lookups
    pub directory_timeout_ms: u64,
}

impl Default for ClassroomConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            stun_servers: vec![DEFAULT_STUN_URL.to_string()],
            turn_servers: Vec::new(),
            connect_attempts: 5,
            connect_backoff_ms: 250,
            directory_url: None,
            directory_timeout_ms: 2_000,
        }
    }
}

impl ClassroomConfig {
    /// Validate the configuration before opening any connections.
    pub fn validate(&self) -> Result<()> {
        let signaling = url::Url::parse(&self.signaling_url)
            .map_err(|e| Error::Configuration(format!("invalid signaling URL: {}", e)))?;
        if !matches!(signaling.scheme(), "ws" | "wss") {
            return Err(Error::Configuration(format!(
                "signaling URL must be ws:// or wss://, got {}",
                signaling.scheme()
            )));
        }

        if self.connect_attempts == 0 {
            return Err(Error::Configuration(
                "connect_attempts must be at least 1".to_string(),
            ));
        }

        for stun in &self.stun_servers {
            validate_ice_url(stun, &["stun", "stuns"])?;
        }
        for turn in &self.turn_servers {
            validate_ice_url(&turn.url, &["turn", "turns"])?;
            if turn.username.is_empty() || turn.credential.is_empty() {
                return Err(Error::Configuration(format!(
                    "TURN server {} is missing credentials",
                    turn.url
                )));
            }
        }

        if let Some(directory) = &self.directory_url {
            let parsed = url::Url::parse(directory)
                .map_err(|e| Error::Configuration(format!("invalid directory URL: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Configuration(format!(
                    "directory URL must be http:// or https://, got {}",
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }
}

fn validate_ice_url(raw: &str, schemes: &[&str]) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::Configuration(format!("invalid ICE server URL {}: {}", raw, e)))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(Error::Configuration(format!(
            "ICE server URL {} must use one of {:?}",
            raw, schemes
        )));
    }
    Ok(())
}
