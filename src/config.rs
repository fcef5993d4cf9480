// Logging can only be switched off in development builds

use crate::error::ConfigError;
use crate::peer::types::{IceServerKind, ServerConfig};
use once_cell::sync::Lazy;
use serde::Deserialize;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

#[cfg(debug_assertions)]
pub mod dev {
    // Set to false to silence logging in debug builds. Has no effect in release.
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Public STUN servers used when no ICE servers are configured
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            kind: IceServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            kind: IceServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Negotiator settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NegotiatorConfig {
    pub ice_servers: Vec<ServerConfig>,
    /// Collection holding call records
    pub calls_collection: String,
    /// Mailbox written by the caller
    pub offer_candidates: String,
    /// Mailbox written by the callee
    pub answer_candidates: String,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            calls_collection: "calls".into(),
            offer_candidates: "offerCandidates".into(),
            answer_candidates: "answerCandidates".into(),
        }
    }
}

impl NegotiatorConfig {
    /// Parses and validates a JSON config; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ice_servers(&self.ice_servers)?;
        for name in [
            &self.calls_collection,
            &self.offer_candidates,
            &self.answer_candidates,
        ] {
            if name.trim().is_empty() || name.contains('/') {
                return Err(ConfigError::BadCollection(name.clone()));
            }
        }
        Ok(())
    }
}

pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(server.id.clone()));
        }
        if server.kind == IceServerKind::Turn
            && (server.username.is_none() || server.credential.is_none())
        {
            return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NegotiatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.calls_collection, "calls");
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = NegotiatorConfig::from_json(r#"{"calls_collection": "rooms"}"#).unwrap();
        assert_eq!(config.calls_collection, "rooms");
        assert_eq!(config.offer_candidates, "offerCandidates");
        assert_eq!(config.ice_servers, *DEFAULT_ICE_SERVERS);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let err = NegotiatorConfig::from_json(
            r#"{"ice_servers": [{"id": "t", "type": "turn", "url": "relay.example.org"}]}"#,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingTurnCredentials("t".into()));
    }

    #[test]
    fn empty_url_is_rejected() {
        let servers = vec![ServerConfig {
            id: "s".into(),
            kind: IceServerKind::Stun,
            url: " ".into(),
            username: None,
            credential: None,
        }];
        assert_eq!(
            validate_ice_servers(&servers),
            Err(ConfigError::EmptyUrl("s".into()))
        );
    }

    #[test]
    fn nested_collection_names_are_rejected() {
        let config = NegotiatorConfig {
            offer_candidates: "a/b".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadCollection(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            NegotiatorConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }
}
