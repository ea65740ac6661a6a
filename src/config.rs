use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::call::LegacyMode;
use crate::dgc::DgcOp;
use crate::endpoint::Endpoint;
use crate::error::RmgError;
use crate::guesser::GuessOptions;
use crate::registry::RegistryOp;
use crate::session::SessionOptions;

/// Settings threaded into every client. Every field has a default, so an
/// empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub threads: usize,
    pub timeout_ms: u64,
    pub retries: u32,
    pub void_grace_ms: u64,
    pub legacy: LegacyMode,
    pub follow_redirect: bool,
    pub tls: bool,
    pub zero_arg: bool,
    /// Announce a loopback origin on registry administration calls.
    pub localhost_bypass: bool,
    pub registry_method: RegistryOp,
    pub dgc_method: DgcOp,
    pub codebase_url: String,
    pub ysoserial_path: Option<PathBuf>,
    pub java_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 5,
            timeout_ms: 3000,
            retries: 3,
            void_grace_ms: 75,
            legacy: LegacyMode::Auto,
            follow_redirect: false,
            tls: false,
            zero_arg: false,
            localhost_bypass: false,
            registry_method: RegistryOp::Lookup,
            dgc_method: DgcOp::Clean,
            codebase_url: "http://127.0.0.1:8000/".to_owned(),
            ysoserial_path: None,
            java_path: PathBuf::from("java"),
        }
    }
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self, RmgError> {
        let config: Config = toml::from_str(raw).map_err(|err| RmgError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, or returns the defaults when no path is given.
    pub async fn load(path: Option<&Path>) -> Result<Self, RmgError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| RmgError::Config(format!("{}: {}", path.display(), err)))?;
        debug!(path = %path.display(), "loaded configuration");
        Self::from_toml(&raw)
    }

    fn validate(&self) -> Result<(), RmgError> {
        if self.threads == 0 {
            return Err(RmgError::Config("threads must be at least 1".to_owned()));
        }
        if self.timeout_ms == 0 {
            return Err(RmgError::Config("timeout_ms must be positive".to_owned()));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            void_grace: Duration::from_millis(self.void_grace_ms),
            origin: None,
        }
    }

    pub fn guess_options(&self) -> GuessOptions {
        GuessOptions {
            threads: self.threads,
            retries: self.retries,
            zero_arg: self.zero_arg,
            legacy: self.legacy,
        }
    }

    pub fn endpoint(&self, host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint::new(host, port)
            .with_tls(self.tls)
            .with_follow_redirect(self.follow_redirect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = Config::from_toml(
            r#"
            threads = 16
            legacy = "force"
            registry_method = "bind"
            dgc_method = "dirty"
            ysoserial_path = "/opt/ysoserial.jar"
            "#,
        )
        .unwrap();
        assert_eq!(config.threads, 16);
        assert_eq!(config.legacy, LegacyMode::Force);
        assert_eq!(config.registry_method, RegistryOp::Bind);
        assert_eq!(config.dgc_method, DgcOp::Dirty);
        assert_eq!(config.ysoserial_path, Some(PathBuf::from("/opt/ysoserial.jar")));
        assert_eq!(config.timeout_ms, 3000);
        assert_eq!(config.guess_options().threads, 16);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(
            Config::from_toml("threads = 0"),
            Err(RmgError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("legacy = \"sometimes\""),
            Err(RmgError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("colour = true"),
            Err(RmgError::Config(_))
        ));
    }

    #[tokio::test]
    async fn missing_path_uses_defaults() {
        assert_eq!(Config::load(None).await.unwrap(), Config::default());
        assert!(Config::load(Some(Path::new("/nonexistent/rmg.toml"))).await.is_err());
    }
}
