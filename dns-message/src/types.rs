//! Structured representation of an RFC 1035 DNS message.
//!
//! Names are kept in both their wire-encoded form (`DomainName::octets`,
//! length-prefixed labels terminated by a zero octet) and their decoded
//! label form (`DomainName::labels`), so the codec never has to
//! re-encode a name it has just decoded.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A full DNS message: header, question section, and the three RR
/// sections.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Build a single-question query message with the given transaction ID.
    pub fn from_question(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                id,
                is_response: false,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: true,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Build an empty response shell for this message: same ID and
    /// questions, `QR` set, `RA` set, `RD` copied, everything else
    /// defaulted.
    pub fn make_response(&self) -> Self {
        Self {
            header: Header {
                id: self.header.id,
                is_response: true,
                opcode: self.header.opcode,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: self.header.recursion_desired,
                recursion_available: true,
                rcode: Rcode::NoError,
            },
            questions: self.questions.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Build a `FORMERR` response carrying only the ID that a broken
    /// request still revealed.
    pub fn make_format_error_response(id: u16) -> Self {
        Self {
            header: Header {
                id,
                is_response: true,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: true,
                rcode: Rcode::FormatError,
            },
            questions: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// The smallest TTL among the answer records, if there are any.
    pub fn min_answer_ttl(&self) -> Option<u32> {
        self.answers.iter().map(|rr| rr.ttl).min()
    }
}

/// The fixed-size part of a message, plus the section counts as they
/// appear on the wire (kept separate from `Header` since the counts
/// are implied by the vecs once a `Message` is built).
pub(crate) struct WireHeader {
    pub header: Header,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Header {
    pub id: u16,
    pub is_response: bool,
    pub opcode: Opcode,
    pub is_authoritative: bool,
    pub is_truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: Rcode,
}

pub(crate) const HEADER_MASK_QR: u8 = 0b1000_0000;
pub(crate) const HEADER_MASK_OPCODE: u8 = 0b0111_1000;
pub(crate) const HEADER_OFFSET_OPCODE: u8 = 3;
pub(crate) const HEADER_MASK_AA: u8 = 0b0000_0100;
pub(crate) const HEADER_MASK_TC: u8 = 0b0000_0010;
pub(crate) const HEADER_MASK_RD: u8 = 0b0000_0001;
pub(crate) const HEADER_MASK_RA: u8 = 0b1000_0000;
pub(crate) const HEADER_MASK_RCODE: u8 = 0b0000_1111;
pub(crate) const HEADER_OFFSET_RCODE: u8 = 0;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Question {
    pub name: DomainName,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl Question {
    /// A question the core has no semantics for: `Wildcard` qtype or
    /// qclass, or an AXFR/MAILB/MAILA qtype (zone transfer and mail
    /// routing queries are out of scope).
    pub fn is_unknown(&self) -> bool {
        matches!(
            self.qtype,
            QueryType::AXFR | QueryType::MAILB | QueryType::MAILA | QueryType::Wildcard
        ) || matches!(self.qclass, QueryClass::Wildcard)
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.name.to_dotted_string(),
            self.qclass,
            self.qtype
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceRecord {
    pub name: DomainName,
    pub rtype_with_data: RecordTypeWithData,
    pub rclass: RecordClass,
    pub ttl: u32,
}

impl ResourceRecord {
    pub fn matches(&self, question: &Question) -> bool {
        self.name == question.name
            && self.rtype_with_data.matches(question.qtype)
            && match question.qclass {
                QueryClass::Wildcard => true,
                QueryClass::Record(rc) => rc == self.rclass,
            }
    }
}

/// Record data, tagged by type.  `A`, `AAAA`, and `CNAME` are the
/// types the resolver has semantics for; the rest round-trip as
/// structured-but-unexamined data, and anything not listed here falls
/// into `Unknown`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RecordTypeWithData {
    A { address: Ipv4Addr },
    AAAA { address: Ipv6Addr },
    CNAME { cname: DomainName },
    NS { nsdname: DomainName },
    SOA {
        mname: DomainName,
        rname: DomainName,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    PTR { ptrdname: DomainName },
    MX { preference: u16, exchange: DomainName },
    TXT { octets: Vec<u8> },
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },
    Unknown { tag: u16, octets: Vec<u8> },
}

impl RecordTypeWithData {
    pub fn rtype(&self) -> RecordType {
        match self {
            RecordTypeWithData::A { .. } => RecordType::A,
            RecordTypeWithData::AAAA { .. } => RecordType::AAAA,
            RecordTypeWithData::CNAME { .. } => RecordType::CNAME,
            RecordTypeWithData::NS { .. } => RecordType::NS,
            RecordTypeWithData::SOA { .. } => RecordType::SOA,
            RecordTypeWithData::PTR { .. } => RecordType::PTR,
            RecordTypeWithData::MX { .. } => RecordType::MX,
            RecordTypeWithData::TXT { .. } => RecordType::TXT,
            RecordTypeWithData::SRV { .. } => RecordType::SRV,
            RecordTypeWithData::Unknown { tag, .. } => RecordType::Unknown(*tag),
        }
    }

    pub fn matches(&self, qtype: QueryType) -> bool {
        match qtype {
            QueryType::Wildcard => true,
            QueryType::Record(rt) => rt == self.rtype(),
            QueryType::AXFR | QueryType::MAILB | QueryType::MAILA => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(OpcodeReserved),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct OpcodeReserved(u8);

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(OpcodeReserved(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(OpcodeReserved(other)) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(RcodeReserved),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RcodeReserved(u8);

impl From<u8> for Rcode {
    fn from(value: u8) -> Self {
        match value {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(RcodeReserved(other)),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(RcodeReserved(other)) => other,
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Rcode::NoError => "NOERROR".to_string(),
            Rcode::FormatError => "FORMERR".to_string(),
            Rcode::ServerFailure => "SERVFAIL".to_string(),
            Rcode::NameError => "NXDOMAIN".to_string(),
            Rcode::NotImplemented => "NOTIMP".to_string(),
            Rcode::Refused => "REFUSED".to_string(),
            Rcode::Reserved(RcodeReserved(other)) => return write!(f, "RESERVED{other}"),
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum QueryType {
    Record(RecordType),
    AXFR,
    MAILB,
    MAILA,
    Wildcard,
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            252 => QueryType::AXFR,
            253 => QueryType::MAILB,
            254 => QueryType::MAILA,
            255 => QueryType::Wildcard,
            other => QueryType::Record(RecordType::from(other)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::AXFR => 252,
            QueryType::MAILB => 253,
            QueryType::MAILA => 254,
            QueryType::Wildcard => 255,
            QueryType::Record(rt) => rt.into(),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryType::Record(rt) => write!(f, "{rt}"),
            QueryType::AXFR => write!(f, "AXFR"),
            QueryType::MAILB => write!(f, "MAILB"),
            QueryType::MAILA => write!(f, "MAILA"),
            QueryType::Wildcard => write!(f, "*"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum QueryClass {
    Record(RecordClass),
    Wildcard,
}

impl From<u16> for QueryClass {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryClass::Wildcard,
            other => QueryClass::Record(RecordClass::from(other)),
        }
    }
}

impl From<QueryClass> for u16 {
    fn from(value: QueryClass) -> Self {
        match value {
            QueryClass::Wildcard => 255,
            QueryClass::Record(rc) => rc.into(),
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryClass::Record(rc) => write!(f, "{rc}"),
            QueryClass::Wildcard => write!(f, "*"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    Unknown(u16),
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            other => RecordType::Unknown(other),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::Unknown(tag) => write!(f, "TYPE{tag}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RecordClass {
    IN,
    CS,
    CH,
    HS,
    Unknown(u16),
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            2 => RecordClass::CS,
            3 => RecordClass::CH,
            4 => RecordClass::HS,
            other => RecordClass::Unknown(other),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::CS => 2,
            RecordClass::CH => 3,
            RecordClass::HS => 4,
            RecordClass::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordClass::IN => write!(f, "IN"),
            RecordClass::CS => write!(f, "CS"),
            RecordClass::CH => write!(f, "CH"),
            RecordClass::HS => write!(f, "HS"),
            RecordClass::Unknown(tag) => write!(f, "CLASS{tag}"),
        }
    }
}

/// Longest encoded name, including length octets and the terminator.
pub const DOMAINNAME_MAX_LEN: usize = 255;
/// Longest single label.
pub const LABEL_MAX_LEN: usize = 63;

/// A domain name, kept in both wire-encoded (`octets`) and per-label
/// (`labels`) form.  Labels are normalised to lowercase ASCII on
/// construction, since DNS name comparisons are case-insensitive.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct DomainName {
    pub octets: Vec<u8>,
    pub labels: Vec<Vec<u8>>,
}

impl DomainName {
    pub fn root_domain() -> Self {
        DomainName {
            octets: vec![0],
            labels: vec![Vec::new()],
        }
    }

    pub fn is_root(&self) -> bool {
        self.labels.len() == 1 && self.labels[0].is_empty()
    }

    pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
        self.labels.ends_with(&other.labels)
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.octets.len());
        for label in &self.labels {
            for octet in label {
                out.push(*octet as char);
            }
            out.push('.');
        }
        out
    }

    /// # Errors
    ///
    /// If the string is not a valid dotted domain name: a label is
    /// too long, the whole name is too long, or a label contains
    /// non-ASCII bytes.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root_domain());
        }

        let chunks: Vec<&str> = s.trim_end_matches('.').split('.').collect();
        let labels = chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
        Self::from_labels(labels)
    }

    pub fn from_labels(mixed_case_labels: Vec<Vec<u8>>) -> Option<Self> {
        if mixed_case_labels.is_empty() {
            return None;
        }

        let mut labels = Vec::with_capacity(mixed_case_labels.len());
        let mut octets = Vec::with_capacity(DOMAINNAME_MAX_LEN);

        for mc_label in &mixed_case_labels {
            if mc_label.len() > LABEL_MAX_LEN {
                return None;
            }
            if mc_label.is_empty() {
                return None;
            }

            #[allow(clippy::cast_possible_truncation)]
            octets.push(mc_label.len() as u8);
            let mut label = Vec::with_capacity(mc_label.len());
            for octet in mc_label {
                if !octet.is_ascii() {
                    return None;
                }
                let octet = octet.to_ascii_lowercase();
                label.push(octet);
                octets.push(octet);
            }
            labels.push(label);
        }

        octets.push(0);
        labels.push(Vec::new());

        if octets.len() <= DOMAINNAME_MAX_LEN {
            Some(Self { octets, labels })
        } else {
            None
        }
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainName({})", self.to_dotted_string())
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dotted_string())
    }
}

#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;

    pub fn domain(s: &str) -> DomainName {
        DomainName::from_dotted_string(s).unwrap()
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::A { address },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn aaaa_record(name: &str, address: Ipv6Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::AAAA { address },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn cname_record(name: &str, target: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::CNAME {
                cname: domain(target),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn ns_record(name: &str, nsdname: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::NS {
                nsdname: domain(nsdname),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn domain_name_lowercases_labels() {
        let d = domain("WWW.Example.COM");
        assert_eq!(d.to_dotted_string(), "www.example.com.");
    }

    #[test]
    fn domain_name_rejects_overlong_label() {
        let label = "x".repeat(LABEL_MAX_LEN + 1);
        assert!(DomainName::from_dotted_string(&format!("{label}.com")).is_none());
    }

    #[test]
    fn is_subdomain_of_checks_label_suffix() {
        let child = domain("www.example.com");
        let parent = domain("example.com");
        let unrelated = domain("example.net");

        assert!(child.is_subdomain_of(&parent));
        assert!(!child.is_subdomain_of(&unrelated));
    }

    #[test]
    fn resource_record_matches_question() {
        let rr = a_record("www.example.com.", Ipv4Addr::new(1, 2, 3, 4));
        let question = Question {
            name: domain("www.example.com."),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        };
        assert!(rr.matches(&question));

        let wrong_type = Question {
            qtype: QueryType::Record(RecordType::AAAA),
            ..question
        };
        assert!(!rr.matches(&wrong_type));
    }
}
