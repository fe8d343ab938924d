//! Parsing DNS messages off the wire.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message is too short, has inconsistent section counts,
    /// or contains a malformed name (bad label length, overlong name,
    /// or a compression pointer cycle).
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;

        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(wire_header.header.id, buffer)?);
        }

        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }

        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }

        let mut additional = Vec::with_capacity(wire_header.arcount.into());
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl WireHeader {
    fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from((flags2 & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = QueryType::deserialise(id, buffer)?;
        let qclass = QueryClass::deserialise(id, buffer)?;

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = RecordType::deserialise(id, buffer)?;
        let rclass = RecordClass::deserialise(id, buffer)?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_start = buffer.position();

        let raw_rdata = |buffer: &mut ConsumableBuffer| -> Result<Vec<u8>, Error> {
            buffer
                .take(rdlength as usize)
                .map(<[u8]>::to_vec)
                .ok_or(Error::ResourceRecordTooShort(id))
        };

        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::SOA => RecordTypeWithData::SOA {
                mname: DomainName::deserialise(id, buffer)?,
                rname: DomainName::deserialise(id, buffer)?,
                serial: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                refresh: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                retry: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                expire: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                minimum: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::MX => RecordTypeWithData::MX {
                preference: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                exchange: DomainName::deserialise(id, buffer)?,
            },
            RecordType::TXT => RecordTypeWithData::TXT {
                octets: raw_rdata(buffer)?,
            },
            RecordType::AAAA => RecordTypeWithData::AAAA {
                address: Ipv6Addr::from(
                    <[u8; 16]>::try_from(
                        buffer
                            .take(16)
                            .ok_or(Error::ResourceRecordTooShort(id))?,
                    )
                    .map_err(|_| Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::SRV => RecordTypeWithData::SRV {
                priority: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                weight: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                port: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                target: DomainName::deserialise(id, buffer)?,
            },
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: raw_rdata(buffer)?,
            },
        };

        let rdata_stop = buffer.position();
        if rdata_stop == rdata_start + (rdlength as usize) {
            Ok(Self {
                name,
                rtype_with_data,
                rclass,
                ttl,
            })
        } else {
            Err(Error::ResourceRecordInvalid(id))
        }
    }
}

impl DomainName {
    /// Decompress a name, following at most one pointer chain per
    /// name.  Each pointer must reference a strictly earlier position
    /// in the buffer than the name currently being parsed started at
    /// (RFC 1035 section 4.1.4), which rules out both self-references
    /// and forward references and so makes an infinite pointer loop
    /// impossible.
    fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let mut octets = Vec::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::with_capacity(5);
        let start = buffer.position();

        loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if usize::from(size) <= LABEL_MAX_LEN {
                octets.push(size);

                if size == 0 {
                    labels.push(Vec::new());
                    break;
                }

                let label_octets = buffer
                    .take(size as usize)
                    .ok_or(Error::DomainTooShort(id))?;
                // Names are compared and keyed case-insensitively
                // throughout (cache keys, override-table lookups), so
                // wire-parsed labels are lowercased the same as
                // `DomainName::from_labels` lowercases hand-built ones.
                let label: Vec<u8> = label_octets.iter().map(u8::to_ascii_lowercase).collect();
                octets.extend_from_slice(&label);
                labels.push(label);

                if octets.len() > DOMAINNAME_MAX_LEN {
                    break;
                }
            } else if size >= 192 {
                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let ptr = usize::from(u16::from_be_bytes([hi, lo]));

                if ptr >= start {
                    return Err(Error::DomainPointerInvalid(id));
                }

                let mut pointee = DomainName::deserialise(id, &mut buffer.at_offset(ptr))?;
                octets.append(&mut pointee.octets);
                labels.append(&mut pointee.labels);
                break;
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if octets.len() <= DOMAINNAME_MAX_LEN {
            Ok(DomainName { octets, labels })
        } else {
            Err(Error::DomainTooLong(id))
        }
    }
}

impl QueryType {
    fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        Ok(Self::from(
            buffer.next_u16().ok_or(Error::QuestionTooShort(id))?,
        ))
    }
}

impl QueryClass {
    fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        Ok(Self::from(
            buffer.next_u16().ok_or(Error::QuestionTooShort(id))?,
        ))
    }
}

impl RecordType {
    fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        Ok(Self::from(
            buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
        ))
    }
}

impl RecordClass {
    fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        Ok(Self::from(
            buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
        ))
    }
}

/// Parse errors.  Every variant but `CompletelyBusted` carries the
/// transaction ID read from the header, so the server can still reply
/// FORMERR even though the rest of the message was unparseable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// Fewer than 2 octets: not even an ID is available.
    CompletelyBusted,
    HeaderTooShort(u16),
    QuestionTooShort(u16),
    ResourceRecordTooShort(u16),
    ResourceRecordInvalid(u16),
    DomainTooShort(u16),
    DomainTooLong(u16),
    DomainPointerInvalid(u16),
    DomainLabelInvalid(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted => None,
            Error::HeaderTooShort(id)
            | Error::QuestionTooShort(id)
            | Error::ResourceRecordTooShort(id)
            | Error::ResourceRecordInvalid(id)
            | Error::DomainTooShort(id)
            | Error::DomainTooLong(id)
            | Error::DomainPointerInvalid(id)
            | Error::DomainLabelInvalid(id) => Some(id),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {}

/// A cursor over an immutable octet slice, used during parsing.
/// Cloning via `at_offset` is how compression pointers are followed:
/// a fresh cursor is spun up at the pointed-to position and parsed
/// recursively, leaving the original cursor's position untouched.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn next_u8(&mut self) -> Option<u8> {
        let b = *self.octets.get(self.position)?;
        self.position += 1;
        Some(b)
    }

    fn next_u16(&mut self) -> Option<u16> {
        let bytes = self.octets.get(self.position..self.position + 2)?;
        self.position += 2;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn next_u32(&mut self) -> Option<u32> {
        let bytes = self.octets.get(self.position..self.position + 4)?;
        self.position += 4;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        let slice = self.octets.get(self.position..self.position + size)?;
        self.position += size;
        Some(slice)
    }

    fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_util::*;
    use std::net::Ipv4Addr;

    #[test]
    fn rejects_short_header() {
        let bytes = [0u8; 4];
        assert_eq!(Message::from_octets(&bytes), Err(Error::HeaderTooShort(0)));
    }

    #[test]
    fn wire_parsed_names_are_lowercased() {
        // Hand-build a question section with a mixed-case name: the
        // encoder always lowercases, so this has to be assembled by
        // hand to exercise the wire-parsing path rather than going
        // through `domain()`, which would lowercase before we get here.
        let mut bytes = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        for label in ["WWW", "Example", "COM"] {
            bytes.push(label.len() as u8);
            bytes.extend_from_slice(label.as_bytes());
        }
        bytes.push(0);
        bytes.extend_from_slice(&[0, 1, 0, 1]); // qtype=A qclass=IN

        let parsed = Message::from_octets(&bytes).unwrap();
        assert_eq!(parsed.questions[0].name.to_dotted_string(), "www.example.com.");
    }

    #[test]
    fn rejects_busted_message() {
        assert_eq!(Message::from_octets(&[0]), Err(Error::CompletelyBusted));
    }

    #[test]
    fn round_trips_a_question() {
        let message = Message::from_question(
            1234,
            Question {
                name: domain("www.example.com."),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        let octets = message.clone().to_octets().unwrap();
        let parsed = Message::from_octets(&octets).unwrap();
        assert_eq!(message, parsed);
    }

    #[test]
    fn decompresses_pointer_to_earlier_name() {
        // "www.example.com." written out, then a second question whose
        // name is just a pointer back to it.
        let header = [
            0, 1, // id
            0, 0, // flags
            0, 2, // qdcount = 2
            0, 0, 0, 0, 0, 0,
        ];
        let mut name = Vec::new();
        for label in ["www", "example", "com"] {
            name.push(label.len() as u8);
            name.extend_from_slice(label.as_bytes());
        }
        name.push(0);

        let q1_start = header.len();
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&[0, 1, 0, 1]); // qtype=A qclass=IN

        let pointer_offset = bytes.len();
        let hi = 0b1100_0000 | ((q1_start >> 8) as u8);
        let lo = (q1_start & 0xff) as u8;
        bytes.push(hi);
        bytes.push(lo);
        bytes.extend_from_slice(&[0, 1, 0, 1]);
        let _ = pointer_offset;

        let parsed = Message::from_octets(&bytes).unwrap();
        assert_eq!(parsed.questions.len(), 2);
        assert_eq!(
            parsed.questions[0].name.to_dotted_string(),
            parsed.questions[1].name.to_dotted_string()
        );
    }

    #[test]
    fn rejects_pointer_that_does_not_go_strictly_backwards() {
        // A name at the very start of the buffer (right after the
        // header) which points at itself is a one-label cycle: the
        // pointer target is not strictly earlier than where the name
        // starts, so it must be rejected.
        let mut bytes = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        let name_start = bytes.len();
        let hi = 0b1100_0000 | ((name_start >> 8) as u8);
        let lo = (name_start & 0xff) as u8;
        bytes.push(hi);
        bytes.push(lo);
        bytes.extend_from_slice(&[0, 1, 0, 1]);

        assert_eq!(Message::from_octets(&bytes), Err(Error::DomainPointerInvalid(1)));
    }

    #[test]
    fn rejects_label_over_63_octets() {
        let mut bytes = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        bytes.push(64); // not a length octet (<=63) and not a pointer (>=192)
        assert_eq!(Message::from_octets(&bytes), Err(Error::DomainLabelInvalid(1)));
    }

    #[test]
    fn address_record_round_trips() {
        let mut message = Message::from_question(
            42,
            Question {
                name: domain("example.com."),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        message.answers.push(a_record("example.com.", Ipv4Addr::new(192, 0, 2, 1)));
        message.header.is_response = true;

        let octets = message.clone().to_octets().unwrap();
        let parsed = Message::from_octets(&octets).unwrap();
        assert_eq!(parsed.answers, message.answers);
    }
}
