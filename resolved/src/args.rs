use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Clone, Parser)]
/// A recursive-forwarding DNS resolver with a local override database.
///
/// resolved answers queries from an in-memory override table or
/// cache when it can, and otherwise forwards them to a configured
/// upstream resolver, caching the result.
///
/// Prometheus metrics are served at
/// "http://{metrics_interface}:{metrics_port}/metrics"
pub struct Args {
    /// Path to a YAML config file; values here are overridden by
    /// environment variables and by the flags below
    #[clap(short, long, value_parser)]
    pub config_file: Option<PathBuf>,

    /// Path to the override rule file
    #[clap(short = 'r', long, value_parser)]
    pub database_file: Option<PathBuf>,

    /// Local address to listen for client queries on
    #[clap(long, value_parser)]
    pub local_ip: Option<Ipv4Addr>,

    /// Local port to listen for client queries on
    #[clap(long, value_parser)]
    pub local_port: Option<u16>,

    /// Upstream resolver address to forward unanswered queries to
    #[clap(long, value_parser)]
    pub upstream_ip: Option<Ipv4Addr>,

    /// Upstream resolver port to forward unanswered queries to
    #[clap(long, value_parser)]
    pub upstream_port: Option<u16>,

    /// TTL, in seconds, given to override and relayed answers when
    /// caching them (also the ceiling clamp for relayed TTLs)
    #[clap(long, value_parser)]
    pub cache_ttl: Option<u32>,

    /// Maximum number of entries held in the cache
    #[clap(long, value_parser)]
    pub cache_capacity: Option<usize>,

    /// Maximum number of queries processed concurrently
    #[clap(long, value_parser)]
    pub workers: Option<usize>,

    /// Interface to serve Prometheus metrics on
    #[clap(long, value_parser)]
    pub metrics_ip: Option<Ipv4Addr>,

    /// Port to serve Prometheus metrics on
    #[clap(long, value_parser)]
    pub metrics_port: Option<u16>,

    /// Path to write logs to, in addition to stderr
    #[clap(long, value_parser)]
    pub log_file: Option<PathBuf>,

    /// Raise the log level: `-d` for INFO, `-dd` for DEBUG
    #[clap(short = 'd', action(clap::ArgAction::Count))]
    pub verbosity: u8,
}
