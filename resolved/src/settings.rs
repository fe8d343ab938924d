use std::net::Ipv4Addr;
use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::args::Args;

fn default_local_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}
fn default_local_port() -> u16 {
    53
}
fn default_upstream_port() -> u16 {
    53
}
fn default_cache_ttl() -> u32 {
    3600
}
fn default_cache_capacity() -> usize {
    resolver_core::cache::DEFAULT_CAPACITY
}
fn default_workers() -> usize {
    64
}
fn default_metrics_ip() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}
fn default_metrics_port() -> u16 {
    9420
}

/// Every knob a freshly loaded `Settings` may still be missing: the
/// two fields with no sensible built-in default.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LoadError {
    Config(String),
    MissingUpstreamIp,
    MissingDatabaseFile,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LoadError::Config(msg) => write!(f, "could not load configuration: {msg}"),
            LoadError::MissingUpstreamIp => {
                write!(f, "no upstream_ip given in config file, environment, or --upstream-ip")
            }
            LoadError::MissingDatabaseFile => write!(
                f,
                "no database_file given in config file, environment, or --database-file"
            ),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<config::ConfigError> for LoadError {
    fn from(error: config::ConfigError) -> Self {
        LoadError::Config(error.to_string())
    }
}

/// What a config file or environment variables may supply; every
/// field is optional here because `database_file` and `upstream_ip`
/// might only be given on the command line.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    local_ip: Option<Ipv4Addr>,
    #[serde(default)]
    local_port: Option<u16>,
    #[serde(default)]
    upstream_ip: Option<Ipv4Addr>,
    #[serde(default)]
    upstream_port: Option<u16>,
    #[serde(default)]
    cache_ttl: Option<u32>,
    #[serde(default)]
    cache_capacity: Option<usize>,
    #[serde(default)]
    workers: Option<usize>,
    #[serde(default)]
    database_file: Option<String>,
    #[serde(default)]
    log_file: Option<PathBuf>,
    #[serde(default)]
    metrics_ip: Option<Ipv4Addr>,
    #[serde(default)]
    metrics_port: Option<u16>,
}

/// Fully resolved configuration: built-in defaults, then an optional
/// YAML file, then environment variables, then command-line flags,
/// each overriding the last.
#[derive(Debug, Clone)]
pub struct Settings {
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub upstream_ip: Ipv4Addr,
    pub upstream_port: u16,
    pub cache_ttl: u32,
    pub cache_capacity: usize,
    pub workers: usize,
    pub database_file: String,
    pub log_file: Option<PathBuf>,
    pub metrics_ip: Ipv4Addr,
    pub metrics_port: u16,
}

impl Settings {
    /// Load layered config from an optional file and the process
    /// environment (`RESOLVED_*`), then apply any command-line
    /// overrides on top.
    ///
    /// # Errors
    ///
    /// If the named config file cannot be parsed, or `upstream_ip` /
    /// `database_file` are missing from every layer.
    pub fn load(args: &Args) -> Result<Self, LoadError> {
        let mut builder = Config::builder();
        if let Some(path) = &args.config_file {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }
        builder = builder.add_source(Environment::with_prefix("RESOLVED"));

        let raw: RawSettings = builder.build()?.try_deserialize()?;
        Self::finish(raw, args)
    }

    fn finish(raw: RawSettings, args: &Args) -> Result<Self, LoadError> {
        let upstream_ip = args
            .upstream_ip
            .or(raw.upstream_ip)
            .ok_or(LoadError::MissingUpstreamIp)?;
        let database_file = args
            .database_file
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .or(raw.database_file)
            .ok_or(LoadError::MissingDatabaseFile)?;

        Ok(Settings {
            local_ip: args.local_ip.or(raw.local_ip).unwrap_or_else(default_local_ip),
            local_port: args.local_port.or(raw.local_port).unwrap_or_else(default_local_port),
            upstream_ip,
            upstream_port: args
                .upstream_port
                .or(raw.upstream_port)
                .unwrap_or_else(default_upstream_port),
            cache_ttl: args.cache_ttl.or(raw.cache_ttl).unwrap_or_else(default_cache_ttl),
            cache_capacity: args
                .cache_capacity
                .or(raw.cache_capacity)
                .unwrap_or_else(default_cache_capacity),
            workers: args.workers.or(raw.workers).unwrap_or_else(default_workers),
            database_file,
            log_file: args.log_file.clone().or(raw.log_file),
            metrics_ip: args.metrics_ip.or(raw.metrics_ip).unwrap_or_else(default_metrics_ip),
            metrics_port: args
                .metrics_port
                .or(raw.metrics_port)
                .unwrap_or_else(default_metrics_port),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_overrides_take_precedence_over_file_layer() {
        let args = Args::parse_from([
            "resolved",
            "--database-file",
            "rules.txt",
            "--upstream-ip",
            "8.8.8.8",
            "--local-port",
            "5353",
        ]);

        let raw = RawSettings {
            upstream_ip: Some("1.1.1.1".parse().unwrap()),
            upstream_port: Some(5300),
            database_file: Some("unused.txt".to_string()),
            ..RawSettings::default()
        };

        let settings = Settings::finish(raw, &args).unwrap();

        assert_eq!(settings.database_file, "rules.txt");
        assert_eq!(settings.upstream_ip, Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(settings.local_port, 5353);
        assert_eq!(settings.upstream_port, 5300);
    }

    #[test]
    fn missing_upstream_ip_is_an_error() {
        let args = Args::parse_from(["resolved", "--database-file", "rules.txt"]);
        let err = Settings::finish(RawSettings::default(), &args).unwrap_err();
        assert_eq!(err, LoadError::MissingUpstreamIp);
    }

    #[test]
    fn missing_database_file_is_an_error() {
        let args = Args::parse_from(["resolved", "--upstream-ip", "1.1.1.1"]);
        let err = Settings::finish(RawSettings::default(), &args).unwrap_err();
        assert_eq!(err, LoadError::MissingDatabaseFile);
    }

    #[test]
    fn builtin_defaults_fill_in_everything_else() {
        let args = Args::parse_from([
            "resolved",
            "--database-file",
            "rules.txt",
            "--upstream-ip",
            "1.1.1.1",
        ]);
        let settings = Settings::finish(RawSettings::default(), &args).unwrap();

        assert_eq!(settings.local_ip, Ipv4Addr::UNSPECIFIED);
        assert_eq!(settings.local_port, 53);
        assert_eq!(settings.upstream_port, 53);
        assert_eq!(settings.cache_ttl, 3600);
        assert_eq!(settings.workers, 64);
        assert_eq!(settings.metrics_ip, Ipv4Addr::LOCALHOST);
        assert_eq!(settings.metrics_port, 9420);
    }
}
