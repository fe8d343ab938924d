use std::path::Path;
use std::process;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;

use resolver_core::overrides::{parse_rules, OverrideTable};

/// Read and parse the override rule file named by `path`, logging a
/// WARNING for each malformed line and loading the rest anyway.
///
/// Returns `None` only if the file itself could not be read.
pub async fn load_override_table(path: &Path) -> Option<OverrideTable> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(error) => {
            tracing::error!(?path, ?error, "could not read override rule file");
            return None;
        }
    };

    let (rules, errors) = parse_rules(&contents);
    for (line_no, error) in &errors {
        tracing::warn!(?path, line = line_no, %error, "skipping malformed override rule");
    }
    tracing::info!(?path, rules = rules.len(), skipped = errors.len(), "loaded override table");

    Some(OverrideTable::build(rules))
}

/// Re-load the override table on every `SIGHUP`, swapping it into
/// `table_lock` atomically. Runs until the process exits.
pub async fn reload_task(table_lock: Arc<RwLock<OverrideTable>>, database_file: std::path::PathBuf) {
    let mut stream = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(?error, "could not subscribe to SIGHUP");
            process::exit(1);
        }
    };

    loop {
        stream.recv().await;
        tracing::info!("SIGHUP received, reloading override table");

        if let Some(table) = load_override_table(&database_file).await {
            let mut lock = table_lock.write().await;
            *lock = table;
            tracing::info!("override table reloaded");
        } else {
            tracing::warn!("override table reload failed, keeping previous table");
        }
    }
}
