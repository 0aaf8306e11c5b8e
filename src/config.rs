//! Operator configuration, from flags or environment

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct OperatorConfig {
    /// Image that runs sign Jobs
    #[arg(long, env = "RELATED_IMAGE_SIGN")]
    pub sign_image: String,

    /// Service account OpenShift Builds run as
    #[arg(long, env = "BUILD_SERVICE_ACCOUNT", default_value = "builder")]
    pub build_service_account: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Timeout for a single image registry request
    #[arg(long, env = "REGISTRY_TIMEOUT_SECS", default_value_t = 30)]
    pub registry_timeout_secs: u64,
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sign_image.trim().is_empty() {
            return Err(Error::ConfigError("sign image must not be empty".into()));
        }
        if self.build_service_account.trim().is_empty() {
            return Err(Error::ConfigError(
                "build service account must not be empty".into(),
            ));
        }
        if self.registry_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "registry timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: OperatorConfig,
    }

    fn parse(args: &[&str]) -> OperatorConfig {
        Cli::try_parse_from(std::iter::once("kmm-operator").chain(args.iter().copied()))
            .unwrap()
            .config
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--sign-image", "quay.io/kmm/signimage:v2"]);
        assert_eq!(config.build_service_account, "builder");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.registry_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_log_format() {
        let config = parse(&["--sign-image", "img", "--log-format", "json"]);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = parse(&["--sign-image", "img", "--registry-timeout-secs", "0"]);
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_validation_rejects_blank_sign_image() {
        let config = parse(&["--sign-image", " "]);
        assert!(config.validate().is_err());
    }
}
