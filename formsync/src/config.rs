//! Configuration.
//!
//! Loaded from a YAML file (default `formsync.yaml`, or `-f` / `FORMSYNC_CONFIG`)
//! with `FORMSYNC_` environment variables layered on top. Nested values use
//! double underscores, e.g. `FORMSYNC_API_BASE_URL=https://api.example.com/api/`.
//!
//! ```yaml
//! api_base_url: https://api.example.com/api/
//! request_timeout: 30s
//! toast_duration: 3s
//! session_file: ~/.formsync/session.json
//! ```
//!
//! A missing config file is fine; every field has a default.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::Error;
use crate::notifications::DEFAULT_TOAST_DURATION;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FORMSYNC_CONFIG", default_value = "formsync.yaml")]
    pub config: String,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Store an access token in the session file
    Login {
        /// Bearer token issued by the backend
        #[arg(long, env = "FORMSYNC_TOKEN")]
        token: String,
        #[arg(long)]
        refresh_token: Option<String>,
    },
    /// Remove stored credentials
    Logout,
    /// Print a resource's normalized form as JSON
    Show {
        /// Resource name, e.g. `security` or `bank-account`
        resource: String,
        /// Item id for collection resources
        #[arg(long)]
        id: Option<String>,
    },
    /// Edit fields and save
    Set {
        resource: String,
        /// `field=value` pairs; values are parsed as JSON, falling back to text
        #[arg(required = true)]
        assignments: Vec<String>,
        #[arg(long)]
        id: Option<String>,
        /// `field=path` pairs attaching files
        #[arg(long = "file")]
        files: Vec<String>,
    },
    /// Team management
    Team {
        #[command(subcommand)]
        action: TeamCommand,
    },
    /// Generated documents
    Documents {
        #[command(subcommand)]
        action: DocumentsCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum TeamCommand {
    List,
    /// Stage `field=value` edits for one member and save them
    Set {
        id: String,
        #[arg(required = true)]
        assignments: Vec<String>,
    },
    Invite {
        email: String,
        #[arg(long, default_value = "viewer")]
        role: String,
    },
    Remove {
        id: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DocumentsCommand {
    List,
    Templates,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Backend base URL; resource paths are joined onto it
    pub api_base_url: Url,
    /// Per-request timeout. Unset leaves requests without a deadline.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    /// How long toasts stay visible
    #[serde(with = "humantime_serde")]
    pub toast_duration: Duration,
    /// Where the CLI keeps its session
    pub session_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse("http://localhost:8000/api/").expect("static URL is valid"),
            request_timeout: None,
            toast_duration: DEFAULT_TOAST_DURATION,
            session_file: PathBuf::from(".formsync/session.json"),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "Config validation: api_base_url must be http or https, got {}",
                self.api_base_url.scheme()
            )));
        }

        if self.toast_duration.is_zero() || self.toast_duration > Duration::from_secs(60) {
            return Err(Error::validation(
                "Config validation: toast_duration must be between 1ms and 60s",
            ));
        }

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::validation(
                "Config validation: request_timeout cannot be zero; leave it unset for no timeout",
            ));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("FORMSYNC_").ignore(&["CONFIG", "TOKEN"]).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(config: &str) -> Args {
        Args {
            config: config.to_string(),
            validate: false,
            command: None,
        }
    }

    #[test]
    fn defaults_without_a_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;
            assert_eq!(config, Config::default());
            assert_eq!(config.toast_duration, Duration::from_secs(3));
            assert!(config.request_timeout.is_none());
            Ok(())
        });
    }

    #[test]
    fn yaml_and_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "formsync.yaml",
                r#"
api_base_url: https://api.example.com/api/
request_timeout: 30s
toast_duration: 5s
"#,
            )?;
            jail.set_env("FORMSYNC_TOAST_DURATION", "2s");
            jail.set_env("FORMSYNC_SESSION_FILE", "/tmp/session.json");

            let config = Config::load(&args("formsync.yaml"))?;
            assert_eq!(config.api_base_url.as_str(), "https://api.example.com/api/");
            assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
            assert_eq!(config.toast_duration, Duration::from_secs(2));
            assert_eq!(config.session_file, PathBuf::from("/tmp/session.json"));
            Ok(())
        });
    }

    #[test]
    fn rejects_bad_values() {
        Jail::expect_with(|jail| {
            jail.create_file("bad-scheme.yaml", "api_base_url: ftp://files.example.com/\n")?;
            let err = Config::load(&args("bad-scheme.yaml")).unwrap_err();
            assert!(err.to_string().contains("http or https"));

            jail.create_file("bad-toast.yaml", "toast_duration: 5m\n")?;
            assert!(Config::load(&args("bad-toast.yaml")).is_err());

            jail.create_file("unknown.yaml", "api_url: http://x/\n")?;
            assert!(Config::load(&args("unknown.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn parses_cli() {
        let args = Args::parse_from(["formsync", "-f", "alt.yaml", "set", "security", "session_timeout_minutes=120"]);
        assert_eq!(args.config, "alt.yaml");
        assert_eq!(
            args.command,
            Some(Command::Set {
                resource: "security".to_string(),
                assignments: vec!["session_timeout_minutes=120".to_string()],
                id: None,
                files: vec![],
            })
        );
    }
}
