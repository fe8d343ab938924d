//! Lightweight, framework-agnostic counters for a resolution attempt.
//!
//! Resolvers build one of these per query rather than touch a metrics
//! backend directly; the binary crate folds the totals into its own
//! Prometheus counters, labelled by `Outcome`.

/// How a query was ultimately answered, mirroring the `source` label
/// the server loop is specified to log per query.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Outcome {
    /// Answered from the cache.
    Cache,
    /// Answered from the override table.
    Local,
    /// Answered from the override table's blackhole sentinel.
    Blackhole,
    /// Answered by the upstream relay.
    Upstream,
    /// Relay timed out or failed; client got SERVFAIL.
    ServFail,
    /// Request was malformed; client got FORMERR or was dropped.
    FormErr,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Cache => "cache",
            Outcome::Local => "local",
            Outcome::Blackhole => "blackhole",
            Outcome::Upstream => "upstream",
            Outcome::ServFail => "servfail",
            Outcome::FormErr => "formerr",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Running totals for one process's lifetime. Not thread-safe by
/// itself: the binary crate's Prometheus counters are the shared,
/// concurrency-safe sink; this type is for tests and for building a
/// one-shot summary of a single query.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Metrics {
    pub cache: u64,
    pub local: u64,
    pub blackhole: u64,
    pub upstream: u64,
    pub servfail: u64,
    pub formerr: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Cache => self.cache += 1,
            Outcome::Local => self.local += 1,
            Outcome::Blackhole => self.blackhole += 1,
            Outcome::Upstream => self.upstream += 1,
            Outcome::ServFail => self.servfail += 1,
            Outcome::FormErr => self.formerr += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.cache + self.local + self.blackhole + self.upstream + self.servfail + self.formerr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_into_the_right_bucket() {
        let mut metrics = Metrics::new();
        metrics.record(Outcome::Cache);
        metrics.record(Outcome::Cache);
        metrics.record(Outcome::Upstream);

        assert_eq!(metrics.cache, 2);
        assert_eq!(metrics.upstream, 1);
        assert_eq!(metrics.total(), 3);
    }

    #[test]
    fn outcome_labels_match_logging_source_names() {
        assert_eq!(Outcome::Cache.as_str(), "cache");
        assert_eq!(Outcome::Local.as_str(), "local");
        assert_eq!(Outcome::Blackhole.as_str(), "blackhole");
        assert_eq!(Outcome::Upstream.as_str(), "upstream");
        assert_eq!(Outcome::ServFail.as_str(), "servfail");
        assert_eq!(Outcome::FormErr.as_str(), "formerr");
    }
}
