use std::collections::HashSet;
use std::env;
use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::args::Args;

/// Initialize the global `tracing` subscriber.
///
/// The base level comes from `RUST_LOG` (or `INFO` if unset), then
/// `-d`/`-dd` on the command line raise it to `INFO`/`DEBUG`
/// respectively. The output format is selected by the `RUST_LOG_FORMAT`
/// environment variable, a comma-separated set of: `json`, `pretty`,
/// `compact`, `no-ansi`, `no-time`.
pub fn begin_logging(args: &Args, log_file: Option<&Path>) {
    let env_filter = if args.verbosity >= 2 {
        EnvFilter::new("debug")
    } else if args.verbosity == 1 {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let log_format = match env::var("RUST_LOG_FORMAT") {
        Ok(var) => var.split(',').map(str::to_string).collect(),
        Err(_) => HashSet::new(),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(!log_format.contains("no-ansi"));

    let file = log_file.map(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap_or_else(|error| {
                eprintln!("could not open log file {}: {error}", path.display());
                std::process::exit(1);
            })
    });

    macro_rules! finish {
        ($builder:expr) => {
            if let Some(file) = file {
                $builder.with_writer(move || file.try_clone().expect("log file handle")).init();
            } else {
                $builder.init();
            }
        };
    }

    if log_format.contains("json") {
        if log_format.contains("no-time") {
            finish!(builder.json().without_time());
        } else {
            finish!(builder.json());
        }
    } else if log_format.contains("pretty") {
        if log_format.contains("no-time") {
            finish!(builder.pretty().without_time());
        } else {
            finish!(builder.pretty());
        }
    } else if log_format.contains("compact") {
        if log_format.contains("no-time") {
            finish!(builder.compact().without_time());
        } else {
            finish!(builder.compact());
        }
    } else if log_format.contains("no-time") {
        finish!(builder.without_time());
    } else {
        finish!(builder);
    }
}
