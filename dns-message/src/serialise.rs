//! Building DNS messages for the wire.  Names are always emitted
//! uncompressed: decoders must handle compression, but an encoder is
//! free not to produce it (RFC 1035 section 4.1.4).

use crate::types::*;

impl Message {
    /// # Errors
    ///
    /// If a section has more than 65535 entries, or an RDATA section
    /// would be longer than 65535 octets.
    pub fn to_octets(self) -> Result<Vec<u8>, Error> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let qdcount = usize_to_u16(self.questions.len())?;
        let ancount = usize_to_u16(self.answers.len())?;
        let nscount = usize_to_u16(self.authority.len())?;
        let arcount = usize_to_u16(self.additional.len())?;

        self.header.serialise(buffer);
        buffer.write_u16(qdcount);
        buffer.write_u16(ancount);
        buffer.write_u16(nscount);
        buffer.write_u16(arcount);

        for question in self.questions {
            question.serialise(buffer);
        }
        for rr in self.answers {
            rr.serialise(buffer)?;
        }
        for rr in self.authority {
            rr.serialise(buffer)?;
        }
        for rr in self.additional {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl Header {
    fn serialise(self, buffer: &mut WritableBuffer) {
        let flag_qr = if self.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode = HEADER_MASK_OPCODE & (u8::from(self.opcode) << HEADER_OFFSET_OPCODE);
        let flag_aa = if self.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if self.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if self.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_rcode = HEADER_MASK_RCODE & (u8::from(self.rcode) << HEADER_OFFSET_RCODE);

        buffer.write_u16(self.id);
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd);
        buffer.write_u8(flag_ra | field_rcode);
    }
}

impl Question {
    fn serialise(self, buffer: &mut WritableBuffer) {
        self.name.serialise(buffer);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        self.name.serialise(buffer);
        buffer.write_u16(self.rtype_with_data.rtype().into());
        buffer.write_u16(self.rclass.into());
        buffer.write_u32(self.ttl);

        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        match self.rtype_with_data {
            RecordTypeWithData::A { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::AAAA { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::CNAME { cname } => cname.serialise(buffer),
            RecordTypeWithData::NS { nsdname } => nsdname.serialise(buffer),
            RecordTypeWithData::PTR { ptrdname } => ptrdname.serialise(buffer),
            RecordTypeWithData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                mname.serialise(buffer);
                rname.serialise(buffer);
                buffer.write_u32(serial);
                buffer.write_u32(refresh);
                buffer.write_u32(retry);
                buffer.write_u32(expire);
                buffer.write_u32(minimum);
            }
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => {
                buffer.write_u16(preference);
                exchange.serialise(buffer);
            }
            RecordTypeWithData::TXT { octets } => buffer.write_octets(&octets),
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(priority);
                buffer.write_u16(weight);
                buffer.write_u16(port);
                target.serialise(buffer);
            }
            RecordTypeWithData::Unknown { octets, .. } => buffer.write_octets(&octets),
        }

        // -2 because `index()` has already moved past the placeholder
        // we're about to overwrite.
        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        let [hi, lo] = rdlength.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }
}

impl DomainName {
    fn serialise(self, buffer: &mut WritableBuffer) {
        buffer.write_octets(&self.octets);
    }
}

/// Errors encountered while serialising a message: a section or an
/// RDATA blob grew too large to fit its 16-bit wire length field.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    CounterTooLarge { counter: usize, bits: u32 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' does not fit in a u{bits}")
            }
        }
    }
}

impl std::error::Error for Error {}

struct WritableBuffer {
    octets: Vec<u8>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: Vec::with_capacity(512),
        }
    }
}

impl WritableBuffer {
    fn index(&self) -> usize {
        self.octets.len()
    }

    fn write_u8(&mut self, octet: u8) {
        self.octets.push(octet);
    }

    fn write_u16(&mut self, value: u16) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    fn write_u32(&mut self, value: u32) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    fn write_octets(&mut self, octets: &[u8]) {
        self.octets.extend_from_slice(octets);
    }
}

fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    u16::try_from(counter).map_err(|_| Error::CounterTooLarge {
        counter,
        bits: u16::BITS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_util::*;

    #[test]
    #[rustfmt::skip]
    fn sets_rdlength() {
        let mut buf = WritableBuffer::default();
        let rr = ResourceRecord {
            name: domain("www.example.com."),
            rtype_with_data: RecordTypeWithData::MX {
                preference: 32,
                exchange: domain("mx.example.com."),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        };
        rr.serialise(&mut buf).unwrap();

        assert_eq!(
            vec![
                // NAME
                3, 119, 119, 119, // "www"
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
                // TYPE
                0b0000_0000, 0b0000_1111, // MX
                // CLASS
                0b0000_0000, 0b0000_0001, // IN
                // TTL
                0b0000_0000, 0b0000_0000, 0b0000_0001, 0b0010_1100, // 300
                // RDLENGTH
                0b0000_0000, 0b0001_0010, // 18 octets
                // RDATA
                0, 32, // preference
                2, 109, 120, // "mx"
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
            ],
            buf.octets,
        );
    }

    #[test]
    fn build_response_copies_id_and_questions() {
        let request = Message::from_question(
            999,
            dns_question("www.example.com."),
        );
        let mut response = request.make_response();
        response.answers.push(a_record(
            "www.example.com.",
            std::net::Ipv4Addr::new(1, 1, 1, 1),
        ));

        let octets = response.clone().to_octets().unwrap();
        let parsed = Message::from_octets(&octets).unwrap();

        assert_eq!(parsed.header.id, 999);
        assert!(parsed.header.is_response);
        assert_eq!(parsed.questions, request.questions);
        assert_eq!(parsed.answers, response.answers);
    }

    fn dns_question(name: &str) -> Question {
        Question {
            name: domain(name),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        }
    }
}
