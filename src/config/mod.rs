//! Application configuration loaded from TOML.
//!
//! ```toml
//! owner = "treasury"
//! underflow_policy = "clamp"
//! log_level = "info"
//!
//! [terms]
//! unit_price = 1000000
//! fee_percent = 5
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::ledger::{AccountId, Amount, Ledger, LedgerError};
use crate::terms::{MarketTerms, UnderflowPolicy};

pub const DEFAULT_OWNER: &str = "owner";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid terms in config: {0}")]
    Terms(#[from] LedgerError),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Identity allowed to change the terms.
    pub owner: AccountId,
    pub underflow_policy: UnderflowPolicy,
    /// Overrides `info` unless `RUST_LOG` is set.
    pub log_level: Option<String>,
    pub terms: TermsOverrides,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            underflow_policy: UnderflowPolicy::default(),
            log_level: None,
            terms: TermsOverrides::default(),
        }
    }
}

/// Per-field overrides of the default terms.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TermsOverrides {
    pub unit_price: Option<Amount>,
    pub fee_percent: Option<u64>,
    pub refund_percent: Option<u64>,
    pub reserve_cap: Option<Amount>,
}

impl TermsOverrides {
    pub fn resolve(&self) -> MarketTerms {
        let defaults = MarketTerms::default();
        MarketTerms {
            unit_price: self.unit_price.unwrap_or(defaults.unit_price),
            fee_percent: self.fee_percent.unwrap_or(defaults.fee_percent),
            refund_percent: self.refund_percent.unwrap_or(defaults.refund_percent),
            reserve_cap: self.reserve_cap.unwrap_or(defaults.reserve_cap),
        }
    }
}

impl AppConfig {
    /// Loads `path` if given, defaults otherwise. A given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.terms.resolve().validate()?;
        Ok(config)
    }

    /// Fresh ledger owned by the configured owner.
    pub fn build_ledger(&self) -> Result<Ledger, ConfigError> {
        Ok(Ledger::with_terms(
            self.owner.clone(),
            self.terms.resolve(),
            self.underflow_policy,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.terms.resolve(), MarketTerms::default());
    }

    #[test]
    fn overrides_apply_per_field() {
        let config = AppConfig::parse(
            r#"
owner = "treasury"
underflow_policy = "reject"

[terms]
unit_price = 1000000
fee_percent = 5
"#,
        )
        .unwrap();
        assert_eq!(config.owner, "treasury");
        assert_eq!(config.underflow_policy, UnderflowPolicy::Reject);
        let terms = config.terms.resolve();
        assert_eq!(terms.unit_price, 1_000_000);
        assert_eq!(terms.fee_percent, 5);
        assert_eq!(terms.refund_percent, MarketTerms::default().refund_percent);

        let ledger = config.build_ledger().unwrap();
        assert_eq!(ledger.owner(), "treasury");
        assert_eq!(ledger.policy(), UnderflowPolicy::Reject);
    }

    #[test]
    fn invalid_terms_are_rejected() {
        let err = AppConfig::parse("[terms]\nfee_percent = 150\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Terms(LedgerError::InvalidFee { percent: 150 })
        ));
        assert!(matches!(
            AppConfig::parse("owner = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn no_path_uses_defaults_but_a_missing_file_fails() {
        assert_eq!(AppConfig::load(None).unwrap(), AppConfig::default());

        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Read { ref source, .. } if source.kind() == std::io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            AppConfig::parse("[terms]\nfee_pct = 5\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            AppConfig::parse("ownr = \"treasury\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
