//! The DNS message model used by scenarios.
//!
//! Scripted entries need a message they can compare field by field and
//! mutate when a canned reply is adjusted to a query. The wire format
//! [`Message`][domain::base::Message] of the domain crate is read-only, so
//! this module keeps an owned, structured form and converts to and from the
//! wire format with [`encode`] and [`decode`].

use std::error;
use std::fmt;
use std::vec::Vec;

use bytes::Bytes;
use domain::base::header::Flags;
use domain::base::iana::{Opcode, OptRcode, Rtype};
use domain::base::message_builder::PushError;
use domain::base::name::FlattenInto;
use domain::base::wire::ParseError;
use domain::base::{
    Message as WireMessage, MessageBuilder, Name, ParsedName, Question,
    Record, RecordSection,
};
use domain::rdata::ZoneRecordData;
use tracing::trace;

//------------ Type Aliases --------------------------------------------------

/// An owned domain name.
pub type StoredName = Name<Bytes>;

/// An owned question.
pub type StoredQuestion = Question<StoredName>;

/// An owned record with any record data a zone file may contain.
pub type StoredRecord = Record<StoredName, ZoneRecordData<Bytes, StoredName>>;

/// The UDP payload size announced when EDNS is switched on for a query.
pub const DEFAULT_UDP_PAYLOAD_SIZE: u16 = 4096;

//------------ Edns ----------------------------------------------------------

/// The EDNS state of a message, i.e., the content of its OPT record header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Edns {
    pub udp_payload_size: u16,
    pub version: u8,
    pub dnssec_ok: bool,
}

impl Default for Edns {
    fn default() -> Self {
        Self {
            udp_payload_size: DEFAULT_UDP_PAYLOAD_SIZE,
            version: 0,
            dnssec_ok: false,
        }
    }
}

//------------ Message -------------------------------------------------------

/// A DNS message with owned, mutable sections.
///
/// The OPT record is never kept in the additional section. Its content is
/// represented by [`edns`][Self::edns] instead and the extended bits of the
/// rcode are folded into [`rcode`][Self::rcode].
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: u16,
    pub opcode: Opcode,
    pub rcode: OptRcode,
    pub flags: Flags,
    pub edns: Option<Edns>,
    pub question: Vec<StoredQuestion>,
    pub answer: Vec<StoredRecord>,
    pub authority: Vec<StoredRecord>,
    pub additional: Vec<StoredRecord>,
}

impl Message {
    pub fn new() -> Self {
        Self {
            id: 0,
            opcode: Opcode::QUERY,
            rcode: OptRcode::NOERROR,
            flags: Flags::new(),
            edns: None,
            question: Vec::new(),
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Returns whether the DO bit is set.
    pub fn dnssec_ok(&self) -> bool {
        self.edns.is_some_and(|edns| edns.dnssec_ok)
    }

    /// Switches EDNS on, keeping existing EDNS state.
    pub fn use_edns(&mut self) -> &mut Edns {
        self.edns.get_or_insert_with(Edns::default)
    }

    /// Returns the first question, if any.
    pub fn first_question(&self) -> Option<&StoredQuestion> {
        self.question.first()
    }

    /// Encodes the message into its wire format.
    pub fn to_wire(&self) -> Result<Bytes, CodecError> {
        encode(self)
    }

    /// Decodes a message from its wire format.
    pub fn from_wire(octets: Bytes) -> Result<Self, CodecError> {
        decode(octets)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            ";; opcode: {}, rcode: {}, id: {}",
            self.opcode, self.rcode, self.id
        )?;
        write!(f, ";; flags: {}", self.flags)?;
        if self.dnssec_ok() {
            write!(f, " DO")?;
        }
        writeln!(f)?;
        writeln!(f, ";; QUESTION SECTION:")?;
        for question in &self.question {
            writeln!(f, "{question}")?;
        }
        for (name, section) in [
            ("ANSWER", &self.answer),
            ("AUTHORITY", &self.authority),
            ("ADDITIONAL", &self.additional),
        ] {
            writeln!(f, ";; {name} SECTION:")?;
            for record in section {
                writeln!(f, "{record}")?;
            }
        }
        Ok(())
    }
}

//------------ encode() and decode() -----------------------------------------

/// Encodes a message into its wire format.
pub fn encode(msg: &Message) -> Result<Bytes, CodecError> {
    let mut builder = MessageBuilder::new_vec();
    let header = builder.header_mut();
    header.set_id(msg.id);
    header.set_opcode(msg.opcode);
    header.set_flags(msg.flags);
    header.set_rcode(msg.rcode.rcode());

    let mut builder = builder.question();
    for question in &msg.question {
        builder.push(question)?;
    }
    let mut builder = builder.answer();
    for record in &msg.answer {
        builder.push(record)?;
    }
    let mut builder = builder.authority();
    for record in &msg.authority {
        builder.push(record)?;
    }
    let mut builder = builder.additional();
    for record in &msg.additional {
        builder.push(record)?;
    }
    if let Some(edns) = msg.edns {
        builder.opt(|opt| {
            opt.set_udp_payload_size(edns.udp_payload_size);
            opt.set_version(edns.version);
            opt.set_dnssec_ok(edns.dnssec_ok);
            opt.set_rcode(msg.rcode);
            Ok(())
        })?;
    }

    Ok(Bytes::from(builder.finish()))
}

/// Decodes a message from its wire format.
pub fn decode(octets: Bytes) -> Result<Message, CodecError> {
    let wire = WireMessage::from_octets(octets)
        .map_err(|_| CodecError::ShortMessage)?;
    let header = wire.header();

    let mut question = Vec::new();
    for q in wire.question() {
        let q = q?;
        let qname = q.qname().clone();
        question.push(Question::new(
            qname.flatten_into(),
            q.qtype(),
            q.qclass(),
        ));
    }

    let edns = wire.opt().map(|opt| Edns {
        udp_payload_size: opt.udp_payload_size(),
        version: opt.version(),
        dnssec_ok: opt.dnssec_ok(),
    });

    let msg = Message {
        id: header.id(),
        opcode: header.opcode(),
        rcode: wire.opt_rcode(),
        flags: header.flags(),
        edns,
        question,
        answer: collect_records(wire.answer()?)?,
        authority: collect_records(wire.authority()?)?,
        additional: collect_records(wire.additional()?)?,
    };
    trace!(?msg, "decoded message");
    Ok(msg)
}

/// Converts the records of a section into owned records, skipping OPT.
fn collect_records(
    section: RecordSection<'_, Bytes>,
) -> Result<Vec<StoredRecord>, ParseError> {
    let mut records = Vec::new();
    for record in section {
        let record = record?;
        if record.rtype() == Rtype::OPT {
            continue;
        }
        if let Some(record) =
            record.to_record::<ZoneRecordData<_, ParsedName<_>>>()?
        {
            records.push(record.flatten_into());
        }
    }
    Ok(records)
}

//------------ CodecError ----------------------------------------------------

/// A message could not be converted to or from its wire format.
#[derive(Clone, Copy, Debug)]
pub enum CodecError {
    /// The octets are too short to hold a message header.
    ShortMessage,

    /// The message content is malformed.
    Parse(ParseError),

    /// The message did not fit into its target.
    Compose(PushError),
}

impl From<ParseError> for CodecError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl From<PushError> for CodecError {
    fn from(err: PushError) -> Self {
        Self::Compose(err)
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::ShortMessage => f.write_str("short message"),
            CodecError::Parse(err) => write!(f, "malformed message: {err}"),
            CodecError::Compose(err) => {
                write!(f, "failed to compose message: {err}")
            }
        }
    }
}

impl error::Error for CodecError {}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;
    use core::str::FromStr;
    use domain::base::iana::{Class, Rcode};
    use domain::base::Ttl;
    use domain::rdata::A;

    fn name(s: &str) -> StoredName {
        StoredName::from_str(s).unwrap()
    }

    fn a_record(owner: &str, addr: &str) -> StoredRecord {
        Record::new(
            name(owner),
            Class::IN,
            Ttl::from_secs(300),
            ZoneRecordData::A(A::from_str(addr).unwrap()),
        )
    }

    #[test]
    fn wire_keeps_inspected_fields() {
        let mut msg = Message::new();
        msg.id = 4711;
        msg.opcode = Opcode::QUERY;
        msg.rcode = OptRcode::NXDOMAIN;
        msg.flags = Flags::from_str("QR AA RD").unwrap();
        msg.use_edns().dnssec_ok = true;
        msg.question.push(Question::new(
            name("www.example.com."),
            Rtype::A,
            Class::IN,
        ));
        msg.answer.push(a_record("www.example.com.", "192.0.2.1"));
        msg.authority.push(a_record("ns.example.com.", "192.0.2.53"));
        msg.additional.push(a_record("ns2.example.com.", "192.0.2.54"));

        let decoded = Message::from_wire(msg.to_wire().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.rcode.rcode(), Rcode::NXDOMAIN);
        assert!(decoded.dnssec_ok());
        assert_eq!(decoded.additional.len(), 1);
    }

    #[test]
    fn without_edns_there_is_no_opt() {
        let msg = Message::new();
        let decoded = decode(encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.edns, None);
        assert!(!decoded.dnssec_ok());
    }

    #[test]
    fn short_input_is_rejected() {
        assert!(matches!(
            decode(Bytes::from_static(b"\x00\x01")),
            Err(CodecError::ShortMessage)
        ));
    }
}
