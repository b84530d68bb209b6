//! Server configuration from command line and `KEYGATE_*` environment

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use keygate_core::auth::DEFAULT_MAX_SKEW_SECS;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    /// Provider project the bearer tokens are issued for
    pub project_id: String,
    /// JSON object mapping provider key id to RSA public key PEM
    pub provider_keys: Option<PathBuf>,
    pub trust_forwarded_proto: bool,
    pub max_skew_secs: i64,
    pub log_format: LogFormat,
}

impl ServerConfig {
    pub fn command() -> Command {
        Command::new("keygate-server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Dual-credential authentication gateway")
            .arg(
                Arg::new("bind")
                    .long("bind")
                    .env("KEYGATE_BIND")
                    .value_name("ADDR")
                    .help("Bind address")
                    .value_parser(value_parser!(SocketAddr))
                    .default_value("127.0.0.1:8080"),
            )
            .arg(
                Arg::new("data-dir")
                    .long("data-dir")
                    .env("KEYGATE_DATA_DIR")
                    .value_name("PATH")
                    .help("Identity link store directory")
                    .value_parser(value_parser!(PathBuf))
                    .default_value("./data"),
            )
            .arg(
                Arg::new("project-id")
                    .long("project-id")
                    .env("KEYGATE_PROJECT_ID")
                    .value_name("ID")
                    .help("Identity provider project id (token audience)")
                    .required(true),
            )
            .arg(
                Arg::new("provider-keys")
                    .long("provider-keys")
                    .env("KEYGATE_PROVIDER_KEYS")
                    .value_name("FILE")
                    .help("JSON file mapping key id to RSA public key PEM")
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("trust-forwarded-proto")
                    .long("trust-forwarded-proto")
                    .env("KEYGATE_TRUST_FORWARDED_PROTO")
                    .value_name("BOOL")
                    .help("Take the request scheme from X-Forwarded-Proto")
                    .value_parser(value_parser!(bool))
                    .action(ArgAction::Set)
                    .default_value("true"),
            )
            .arg(
                Arg::new("max-skew")
                    .long("max-skew")
                    .env("KEYGATE_MAX_SKEW_SECS")
                    .value_name("SECONDS")
                    .help("Accepted clock skew for signed events")
                    .value_parser(value_parser!(i64).range(0..=3600))
                    .default_value("60"),
            )
            .arg(
                Arg::new("log-format")
                    .long("log-format")
                    .env("KEYGATE_LOG_FORMAT")
                    .value_name("FORMAT")
                    .help("Log output format")
                    .value_parser(["text", "json"])
                    .default_value("text"),
            )
    }

    /// Parse process arguments, exiting with usage on error
    pub fn load() -> Result<Self> {
        Self::from_matches(&Self::command().get_matches())
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command()
            .try_get_matches_from(args)
            .context("invalid arguments")?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let bind = *matches
            .get_one::<SocketAddr>("bind")
            .context("missing bind address")?;
        let data_dir = matches
            .get_one::<PathBuf>("data-dir")
            .context("missing data directory")?
            .clone();
        let project_id = matches
            .get_one::<String>("project-id")
            .context("missing project id")?
            .trim()
            .to_string();
        anyhow::ensure!(!project_id.is_empty(), "project id must not be empty");

        let log_format = match matches.get_one::<String>("log-format").map(String::as_str) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(ServerConfig {
            bind,
            data_dir,
            project_id,
            provider_keys: matches.get_one::<PathBuf>("provider-keys").cloned(),
            trust_forwarded_proto: matches
                .get_one::<bool>("trust-forwarded-proto")
                .copied()
                .unwrap_or(true),
            max_skew_secs: matches
                .get_one::<i64>("max-skew")
                .copied()
                .unwrap_or(DEFAULT_MAX_SKEW_SECS),
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(["keygate-server", "--project-id", "demo"]).unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.project_id, "demo");
        assert!(config.provider_keys.is_none());
        assert!(config.trust_forwarded_proto);
        assert_eq!(config.max_skew_secs, 60);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::try_parse_from([
            "keygate-server",
            "--project-id",
            "demo",
            "--bind",
            "0.0.0.0:9000",
            "--provider-keys",
            "/etc/keygate/keys.json",
            "--trust-forwarded-proto",
            "false",
            "--max-skew",
            "30",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.provider_keys, Some(PathBuf::from("/etc/keygate/keys.json")));
        assert!(!config.trust_forwarded_proto);
        assert_eq!(config.max_skew_secs, 30);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ServerConfig::try_parse_from(["keygate-server", "--project-id", "demo", "--bind", "nope"]).is_err());
        assert!(ServerConfig::try_parse_from(["keygate-server", "--project-id", "demo", "--max-skew", "-5"]).is_err());
        assert!(ServerConfig::try_parse_from(["keygate-server", "--project-id", "  "]).is_err());
    }
}
