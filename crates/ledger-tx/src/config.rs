//! Client configuration loaded from JSON and `LEDGER_TX_*` environment overrides.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    backoff::{BackoffError, BackoffPolicy},
    execute::ExecutionConfig,
    identity::{AccountId, IdentityError, NodeId},
    receipt::ReceiptConfig,
    signing::Operator,
};

/// Overrides the attempt budget.
pub const ENV_MAX_ATTEMPTS: &str = "LEDGER_TX_MAX_ATTEMPTS";
/// Overrides the minimum backoff, in milliseconds.
pub const ENV_MIN_BACKOFF_MS: &str = "LEDGER_TX_MIN_BACKOFF_MS";
/// Overrides the maximum backoff, in milliseconds.
pub const ENV_MAX_BACKOFF_MS: &str = "LEDGER_TX_MAX_BACKOFF_MS";
/// Overrides the per-attempt timeout, in milliseconds; `0` disables it.
pub const ENV_ATTEMPT_TIMEOUT_MS: &str = "LEDGER_TX_ATTEMPT_TIMEOUT_MS";
/// Overrides the receipt polling budget.
pub const ENV_RECEIPT_MAX_ATTEMPTS: &str = "LEDGER_TX_RECEIPT_MAX_ATTEMPTS";
/// Enables transaction id regeneration.
pub const ENV_REGENERATE_TRANSACTION_ID: &str = "LEDGER_TX_REGENERATE_TRANSACTION_ID";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON document could not be parsed.
    #[error("invalid client config json: {source}")]
    Json {
        /// Parser error.
        source: serde_json::Error,
    },
    /// Identifier in the config did not parse.
    #[error("invalid {field} `{value}`: {source}")]
    Identity {
        /// Config field holding the value.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// Parse error.
        source: IdentityError,
    },
    /// Operator key was not 32 hex-encoded bytes.
    #[error("invalid operator private key: {message}")]
    PrivateKey {
        /// Human-readable description.
        message: String,
    },
    /// Environment override did not parse.
    #[error("invalid value `{value}` for {name}")]
    Env {
        /// Variable name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
    /// Backoff bounds are inverted.
    #[error(transparent)]
    Backoff {
        /// Validation error.
        #[from]
        source: BackoffError,
    },
}

/// Operator entry of a [`ClientConfig`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Paying account in `shard.realm.num` form.
    pub account_id: String,
    /// Hex-encoded 32-byte ed25519 secret key.
    pub private_key: String,
}

/// Serializable client configuration.
///
/// Unset tuning fields fall back to the crate defaults.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Node id (`shard.realm.num`) to JSON-RPC endpoint URL.
    pub network: BTreeMap<String, String>,
    /// Default payer and signer.
    pub operator: Option<OperatorConfig>,
    /// Minimum backoff in milliseconds.
    pub min_backoff_ms: Option<u64>,
    /// Maximum backoff in milliseconds.
    pub max_backoff_ms: Option<u64>,
    /// Attempt budget per submission.
    pub max_attempts: Option<u32>,
    /// Per-attempt timeout in milliseconds; `0` disables it.
    pub attempt_timeout_ms: Option<u64>,
    /// Attempt budget per receipt poll.
    pub receipt_max_attempts: Option<u32>,
    /// Whether non-success receipts are errors.
    pub validate_receipt_status: Option<bool>,
    /// Cap on nodes a request is addressed to by default.
    pub max_nodes_per_transaction: Option<usize>,
    /// Retry expired operator transactions under a fresh id.
    pub regenerate_transaction_id: bool,
}

/// Parses a numeric override.
fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { name, value })
}

/// Parses a boolean override.
fn parse_bool_env(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Ok(false),
        _ => Err(ConfigError::Env { name, value }),
    }
}

impl ClientConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed JSON or unknown fields.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Json { source })
    }

    /// Applies `LEDGER_TX_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] when a present variable does not parse.
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_MAX_ATTEMPTS) {
            self.max_attempts = Some(parse_env(ENV_MAX_ATTEMPTS, value)?);
        }
        if let Some(value) = lookup(ENV_MIN_BACKOFF_MS) {
            self.min_backoff_ms = Some(parse_env(ENV_MIN_BACKOFF_MS, value)?);
        }
        if let Some(value) = lookup(ENV_MAX_BACKOFF_MS) {
            self.max_backoff_ms = Some(parse_env(ENV_MAX_BACKOFF_MS, value)?);
        }
        if let Some(value) = lookup(ENV_ATTEMPT_TIMEOUT_MS) {
            self.attempt_timeout_ms = Some(parse_env(ENV_ATTEMPT_TIMEOUT_MS, value)?);
        }
        if let Some(value) = lookup(ENV_RECEIPT_MAX_ATTEMPTS) {
            self.receipt_max_attempts = Some(parse_env(ENV_RECEIPT_MAX_ATTEMPTS, value)?);
        }
        if let Some(value) = lookup(ENV_REGENERATE_TRANSACTION_ID) {
            self.regenerate_transaction_id = parse_bool_env(ENV_REGENERATE_TRANSACTION_ID, value)?;
        }
        Ok(self)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] when a present variable does not parse.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Builds validated execution tuning.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Backoff`] when the backoff bounds are inverted.
    pub fn execution_config(&self) -> Result<ExecutionConfig, ConfigError> {
        let defaults = ExecutionConfig::default();
        let min = self
            .min_backoff_ms
            .map_or(BackoffPolicy::DEFAULT_MIN, Duration::from_millis);
        let max = self
            .max_backoff_ms
            .map_or(BackoffPolicy::DEFAULT_MAX, Duration::from_millis);
        let attempt_timeout = match self.attempt_timeout_ms {
            None => defaults.attempt_timeout(),
            Some(0) => None,
            Some(millis) => Some(Duration::from_millis(millis)),
        };
        Ok(defaults
            .with_backoff(min, max)?
            .with_max_attempts(self.max_attempts.unwrap_or(defaults.max_attempts()))
            .with_attempt_timeout(attempt_timeout))
    }

    /// Builds receipt polling tuning.
    #[must_use]
    pub fn receipt_config(&self) -> ReceiptConfig {
        let defaults = ReceiptConfig::default();
        ReceiptConfig {
            max_attempts: self.receipt_max_attempts.unwrap_or(defaults.max_attempts),
            validate_status: self
                .validate_receipt_status
                .unwrap_or(defaults.validate_status),
        }
    }

    /// Parses the network, ordered by node id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Identity`] for a malformed node id.
    pub fn nodes(&self) -> Result<Vec<(NodeId, String)>, ConfigError> {
        let mut nodes = self
            .network
            .iter()
            .map(|(node, url)| {
                node.parse::<NodeId>()
                    .map(|node_id| (node_id, url.clone()))
                    .map_err(|source| ConfigError::Identity {
                        field: "node id",
                        value: node.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        nodes.sort_by_key(|(node_id, _)| *node_id);
        Ok(nodes)
    }

    /// Builds the operator, if configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed account id or private key.
    pub fn operator(&self) -> Result<Option<Operator>, ConfigError> {
        let Some(operator) = &self.operator else {
            return Ok(None);
        };
        let account_id: AccountId =
            operator
                .account_id
                .parse()
                .map_err(|source| ConfigError::Identity {
                    field: "operator account id",
                    value: operator.account_id.clone(),
                    source,
                })?;
        let bytes = hex::decode(operator.private_key.trim_start_matches("0x")).map_err(|error| {
            ConfigError::PrivateKey {
                message: error.to_string(),
            }
        })?;
        let secret: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            ConfigError::PrivateKey {
                message: format!("expected 32 bytes, got {}", bytes.len()),
            }
        })?;
        Ok(Some(Operator::new(
            account_id,
            Arc::new(SigningKey::from_bytes(&secret)),
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::execute::DEFAULT_ATTEMPT_TIMEOUT;

    const SAMPLE: &str = r#"{
        "network": {
            "0.0.4": "http://node-4:50211",
            "0.0.3": "http://node-3:50211"
        },
        "operator": {
            "account_id": "0.0.1001",
            "private_key": "0707070707070707070707070707070707070707070707070707070707070707"
        },
        "min_backoff_ms": 100,
        "max_attempts": 4,
        "regenerate_transaction_id": true
    }"#;

    #[test]
    fn json_config_builds_tuning_network_and_operator() {
        let config = ClientConfig::from_json_str(SAMPLE);
        assert!(config.is_ok());
        let Ok(config) = config else {
            return;
        };

        let execution = config.execution_config();
        assert!(execution.is_ok());
        if let Ok(execution) = execution {
            assert_eq!(execution.max_attempts(), 4);
            assert_eq!(execution.backoff().min(), Duration::from_millis(100));
            assert_eq!(execution.backoff().max(), BackoffPolicy::DEFAULT_MAX);
            assert_eq!(execution.attempt_timeout(), Some(DEFAULT_ATTEMPT_TIMEOUT));
        }

        let nodes = config.nodes();
        assert!(matches!(
            nodes.as_deref(),
            Ok([(first, _), (second, _)])
                if *first == NodeId::from_num(3) && *second == NodeId::from_num(4)
        ));

        let operator = config.operator();
        assert!(matches!(
            operator,
            Ok(Some(ref operator)) if operator.account_id() == AccountId::new(0, 0, 1_001)
        ));
        assert!(config.regenerate_transaction_id);
        assert!(config.receipt_config().validate_status);
    }

    #[test]
    fn overrides_replace_json_values() {
        let env = HashMap::from([
            (ENV_MAX_ATTEMPTS, "7"),
            (ENV_ATTEMPT_TIMEOUT_MS, "0"),
            (ENV_RECEIPT_MAX_ATTEMPTS, "3"),
            (ENV_REGENERATE_TRANSACTION_ID, "false"),
        ]);
        let config = ClientConfig::from_json_str(SAMPLE).and_then(|config| {
            config.apply_overrides(|name| env.get(name).map(|value| (*value).to_owned()))
        });
        assert!(config.is_ok());
        if let Ok(config) = config {
            assert_eq!(config.max_attempts, Some(7));
            assert!(!config.regenerate_transaction_id);
            assert_eq!(config.receipt_config().max_attempts, 3);
            let execution = config.execution_config();
            assert!(matches!(execution, Ok(ref tuning) if tuning.attempt_timeout().is_none()));
        }
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_env = ClientConfig::default()
            .apply_overrides(|name| (name == ENV_MAX_ATTEMPTS).then(|| "many".to_owned()));
        assert!(matches!(
            bad_env,
            Err(ConfigError::Env {
                name: ENV_MAX_ATTEMPTS,
                ..
            })
        ));

        let inverted = ClientConfig {
            min_backoff_ms: Some(5_000),
            max_backoff_ms: Some(1_000),
            ..ClientConfig::default()
        };
        assert!(matches!(
            inverted.execution_config(),
            Err(ConfigError::Backoff { .. })
        ));

        let short_key = ClientConfig {
            operator: Some(OperatorConfig {
                account_id: "0.0.2".to_owned(),
                private_key: "abcd".to_owned(),
            }),
            ..ClientConfig::default()
        };
        assert!(matches!(
            short_key.operator(),
            Err(ConfigError::PrivateKey { .. })
        ));

        let unknown_field = ClientConfig::from_json_str(r#"{"retries": 3}"#);
        assert!(matches!(unknown_field, Err(ConfigError::Json { .. })));

        let bad_node = ClientConfig::from_json_str(r#"{"network": {"node-3": "http://x"}}"#)
            .and_then(|config| config.nodes());
        assert!(matches!(bad_node, Err(ConfigError::Identity { .. })));
    }
}
