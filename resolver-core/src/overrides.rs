//! The static override table: domain+type -> locally-known answers.
//!
//! Rules are loaded once (by the binary crate, from the override rule
//! file) and handed to `OverrideTable::build`.  Lookups never touch
//! the filesystem and never block; reloading is done by building a
//! fresh table and swapping the `Arc` the caller holds.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use dns_message::types::*;

/// Fixed TTL given to any answer synthesised from the override table.
pub const OVERRIDE_TTL: u32 = 60;

/// Longest CNAME chain the table will follow before giving up.  Rules
/// are static and loaded at startup, so a chain longer than this can
/// only be a cycle in the rule file itself.
const CNAME_CHASE_LIMIT: usize = 8;

/// A single parsed line from the override rule file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Rule {
    /// The domain as written in the rule file: for a wildcard rule
    /// (`*.suffix`) this is the `suffix` part, without the `*.`.
    pub domain: DomainName,
    pub is_wildcard: bool,
    pub rtype: RecordType,
    pub target: Target,
}

/// What a rule resolves to.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Target {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    Cname(DomainName),
    Blackhole,
}

impl Target {
    /// Build the `ResourceRecord` this target produces for a question
    /// asking about `qname` as the given record type.  `rtype` is the
    /// rule's own record type (`A`/`AAAA`/`CNAME`), not necessarily
    /// the qtype the caller originally asked about - a CNAME rule
    /// matched while chasing still produces a CNAME record.
    fn to_rr(&self, qname: &DomainName, rtype: RecordType) -> ResourceRecord {
        let rtype_with_data = match (rtype, self) {
            (RecordType::A, Target::A(address)) => RecordTypeWithData::A { address: *address },
            (RecordType::A, Target::Blackhole) => RecordTypeWithData::A {
                address: Ipv4Addr::UNSPECIFIED,
            },
            (RecordType::AAAA, Target::AAAA(address)) => {
                RecordTypeWithData::AAAA { address: *address }
            }
            (RecordType::AAAA, Target::Blackhole) => RecordTypeWithData::AAAA {
                address: Ipv6Addr::UNSPECIFIED,
            },
            (RecordType::CNAME, Target::Cname(cname)) => RecordTypeWithData::CNAME {
                cname: cname.clone(),
            },
            _ => unreachable!("override rule target does not match its own record type"),
        };

        ResourceRecord {
            name: qname.clone(),
            rtype_with_data,
            rclass: RecordClass::IN,
            ttl: OVERRIDE_TTL,
        }
    }
}

/// The outcome of an override lookup, mirroring the three-way result
/// the matching algorithm is specified to produce.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    Hit(Vec<ResourceRecord>),
    Blackhole(Vec<ResourceRecord>),
    Miss,
}

#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    /// Non-wildcard rules, indexed by their literal domain.  Also
    /// used for parent-domain matching: a qname's suffix is looked up
    /// in this same map.
    exact: HashMap<(DomainName, RecordType), Vec<Target>>,
    /// Wildcard rules (`*.suffix`), indexed by the suffix domain.
    wildcard: HashMap<(DomainName, RecordType), Vec<Target>>,
}

impl OverrideTable {
    pub fn build(rules: Vec<Rule>) -> Self {
        let mut table = Self::default();
        for rule in rules {
            let map = if rule.is_wildcard {
                &mut table.wildcard
            } else {
                &mut table.exact
            };
            map.entry((rule.domain, rule.rtype))
                .or_default()
                .push(rule.target);
        }
        table
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty()
    }

    /// Look up a question against the table, following the exact >
    /// wildcard > parent-domain precedence, and chasing a CNAME rule
    /// if the qtype is `A`/`AAAA` and no direct rule matches.
    pub fn query(&self, qname: &DomainName, qtype: RecordType) -> Outcome {
        self.query_chasing(qname, qtype, CNAME_CHASE_LIMIT)
    }

    fn query_chasing(&self, qname: &DomainName, qtype: RecordType, chases_left: usize) -> Outcome {
        if let Some(targets) = self.exact.get(&(qname.clone(), qtype)) {
            return to_outcome(qname, qtype, targets);
        }

        if let Some(outcome) = self.longest_suffix_match(&self.wildcard, qname, qtype, 1) {
            return outcome;
        }

        if let Some(outcome) = self.longest_suffix_match(&self.exact, qname, qtype, 1) {
            return outcome;
        }

        if matches!(qtype, RecordType::A | RecordType::AAAA) && chases_left > 0 {
            if let Some(cname_targets) = self.exact.get(&(qname.clone(), RecordType::CNAME)) {
                if let Some(Target::Cname(cname_target)) = cname_targets.first() {
                    let cname_rr = Target::Cname(cname_target.clone()).to_rr(qname, RecordType::CNAME);
                    return match self.query_chasing(cname_target, qtype, chases_left - 1) {
                        Outcome::Hit(mut rrs) => {
                            let mut combined = vec![cname_rr];
                            combined.append(&mut rrs);
                            Outcome::Hit(combined)
                        }
                        Outcome::Blackhole(mut rrs) => {
                            let mut combined = vec![cname_rr];
                            combined.append(&mut rrs);
                            Outcome::Blackhole(combined)
                        }
                        Outcome::Miss => Outcome::Miss,
                    };
                }
            }
        }

        Outcome::Miss
    }

    /// Walk the labels of `qname`, starting `skip` labels in from the
    /// front (so `skip = 1` drops the first label, giving the longest
    /// *proper* suffix first), looking each one up in `map`.  Because
    /// we try longer suffixes before shorter ones, the first match
    /// found is the longest one.
    fn longest_suffix_match(
        &self,
        map: &HashMap<(DomainName, RecordType), Vec<Target>>,
        qname: &DomainName,
        qtype: RecordType,
        skip: usize,
    ) -> Option<Outcome> {
        // `labels` always ends with the empty root-terminator label
        // (types.rs's `from_labels`/wire deserialiser both append it),
        // so the real labels run up to, but not including, the last
        // entry. `from_labels` re-appends its own terminator, so it
        // must never be handed that trailing empty label itself.
        let real_labels = qname.labels.len().saturating_sub(1);
        for i in skip..real_labels {
            let Some(suffix) = DomainName::from_labels(qname.labels[i..real_labels].to_vec()) else {
                continue;
            };
            if let Some(targets) = map.get(&(suffix, qtype)) {
                return Some(to_outcome(qname, qtype, targets));
            }
        }
        None
    }
}

fn to_outcome(qname: &DomainName, qtype: RecordType, targets: &[Target]) -> Outcome {
    let rrs: Vec<ResourceRecord> = targets.iter().map(|t| t.to_rr(qname, qtype)).collect();
    if targets.iter().all(|t| matches!(t, Target::Blackhole)) {
        Outcome::Blackhole(rrs)
    } else {
        Outcome::Hit(rrs)
    }
}

/// Errors from parsing a single line of the override rule file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RuleParseError {
    TooFewFields,
    TooManyFields,
    UnknownType(String),
    InvalidDomain(String),
    InvalidTarget(String),
}

impl std::fmt::Display for RuleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RuleParseError::TooFewFields => write!(f, "expected 3 whitespace-separated fields"),
            RuleParseError::TooManyFields => write!(f, "too many fields on line"),
            RuleParseError::UnknownType(t) => write!(f, "unknown record type '{t}'"),
            RuleParseError::InvalidDomain(d) => write!(f, "invalid domain name '{d}'"),
            RuleParseError::InvalidTarget(t) => write!(f, "invalid target '{t}'"),
        }
    }
}

impl std::error::Error for RuleParseError {}

/// Parse a single line of the override rule file.
///
/// Returns `Ok(None)` for a blank line or a comment (`#`), so callers
/// can distinguish "nothing to load" from a rule.
///
/// # Errors
///
/// If the line has the wrong number of fields, an unrecognised
/// record type, a malformed domain, or a target that does not match
/// the record type (not `blackhole`, and not a valid address/name of
/// the right family).
pub fn parse_line(line: &str) -> Result<Option<Rule>, RuleParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let domain_tok = fields.next().ok_or(RuleParseError::TooFewFields)?;
    let type_tok = fields.next().ok_or(RuleParseError::TooFewFields)?;
    let target_tok = fields.next().ok_or(RuleParseError::TooFewFields)?;
    if fields.next().is_some() {
        return Err(RuleParseError::TooManyFields);
    }

    let rtype = match type_tok.to_ascii_uppercase().as_str() {
        "A" => RecordType::A,
        "AAAA" => RecordType::AAAA,
        "CNAME" => RecordType::CNAME,
        other => return Err(RuleParseError::UnknownType(other.to_string())),
    };

    let (is_wildcard, domain_part) = match domain_tok.strip_prefix("*.") {
        Some(suffix) => (true, suffix),
        None => (false, domain_tok),
    };
    let domain = DomainName::from_dotted_string(&domain_part.to_ascii_lowercase())
        .ok_or_else(|| RuleParseError::InvalidDomain(domain_tok.to_string()))?;

    let target = if target_tok.eq_ignore_ascii_case("blackhole") {
        if rtype == RecordType::CNAME {
            return Err(RuleParseError::InvalidTarget(target_tok.to_string()));
        }
        Target::Blackhole
    } else {
        match rtype {
            RecordType::A => Target::A(
                target_tok
                    .parse::<Ipv4Addr>()
                    .map_err(|_| RuleParseError::InvalidTarget(target_tok.to_string()))?,
            ),
            RecordType::AAAA => Target::AAAA(
                target_tok
                    .parse::<Ipv6Addr>()
                    .map_err(|_| RuleParseError::InvalidTarget(target_tok.to_string()))?,
            ),
            RecordType::CNAME => Target::Cname(
                DomainName::from_dotted_string(&target_tok.to_ascii_lowercase())
                    .ok_or_else(|| RuleParseError::InvalidTarget(target_tok.to_string()))?,
            ),
            _ => unreachable!("rtype is always A/AAAA/CNAME here"),
        }
    };

    Ok(Some(Rule {
        domain,
        is_wildcard,
        rtype,
        target,
    }))
}

/// Parse a whole override rule file's contents.  A line that fails to
/// parse is reported alongside its 1-based line number but does not
/// stop the rest of the file from loading: the caller is expected to
/// log each error at WARNING and continue.
pub fn parse_rules(contents: &str) -> (Vec<Rule>, Vec<(usize, RuleParseError)>) {
    let mut rules = Vec::new();
    let mut errors = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => (),
            Err(error) => errors.push((i + 1, error)),
        }
    }
    (rules, errors)
}
