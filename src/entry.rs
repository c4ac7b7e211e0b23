//! Scripted messages.
//!
//! An [`Entry`] is a DNS message taken from a scenario script together
//! with the rules that say how it is compared against a real message
//! ([`MatchField`]) and how it is tailored to a query when it is used as a
//! canned reply ([`AdjustField`]).

use core::str::FromStr;
use std::fmt;
use std::string::{String, ToString};
use std::vec::Vec;

use domain::base::header::Flags;
use domain::base::iana::{Class, Opcode, OptRcode, Rtype, SecurityAlgorithm};
use domain::base::name::FlattenInto;
use domain::base::Question;
use domain::zonefile::inplace::{Entry as ZonefileEntry, Zonefile};
use tracing::trace;

use crate::error::{ConfigError, MatchError, Mismatch};
use crate::message::{Message, StoredName, StoredRecord};

/// The TTL of records that don't state one.
pub const DEFAULT_TTL: u32 = 3600;

/// The class of records that don't state one.
pub const DEFAULT_CLASS: Class = Class::IN;

//------------ MatchField ----------------------------------------------------

/// A criterion used when comparing an entry against a message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MatchField {
    /// The opcodes are equal.
    Opcode,

    /// The types of the first questions are equal.
    Qtype,

    /// The names of the first questions are equal.
    Qname,

    /// The first question name is at or below the expected one.
    Subdomain,

    /// The base header flags are equal.
    Flags,

    /// The question sections hold the same questions.
    Question,

    /// The answer sections hold the same records.
    Answer,

    /// The authority sections hold the same records.
    Authority,

    /// The additional sections hold the same records.
    Additional,

    /// The flags and every section the entry populated.
    All,
}

impl MatchField {
    /// The criteria used when a script doesn't say.
    pub const DEFAULT: [MatchField; 3] =
        [MatchField::Opcode, MatchField::Qtype, MatchField::Qname];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchField::Opcode => "opcode",
            MatchField::Qtype => "qtype",
            MatchField::Qname => "qname",
            MatchField::Subdomain => "subdomain",
            MatchField::Flags => "flags",
            MatchField::Question => "question",
            MatchField::Answer => "answer",
            MatchField::Authority => "authority",
            MatchField::Additional => "additional",
            MatchField::All => "all",
        }
    }
}

impl FromStr for MatchField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opcode" => Ok(MatchField::Opcode),
            "qtype" => Ok(MatchField::Qtype),
            "qname" => Ok(MatchField::Qname),
            "subdomain" => Ok(MatchField::Subdomain),
            "flags" => Ok(MatchField::Flags),
            "question" => Ok(MatchField::Question),
            "answer" => Ok(MatchField::Answer),
            "authority" => Ok(MatchField::Authority),
            "additional" => Ok(MatchField::Additional),
            "all" => Ok(MatchField::All),
            _ => Err(ConfigError::UnknownMatchField(s.into())),
        }
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//------------ AdjustField ---------------------------------------------------

/// A change applied to a canned reply before it is handed out.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AdjustField {
    /// Use the message id of the query.
    CopyId,

    /// Use the question section of the query.
    CopyQuery,
}

impl AdjustField {
    /// The adjustments used when a script doesn't say.
    pub const DEFAULT: [AdjustField; 1] = [AdjustField::CopyId];
}

impl FromStr for AdjustField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "copy_id" => Ok(AdjustField::CopyId),
            "copy_query" => Ok(AdjustField::CopyQuery),
            _ => Err(ConfigError::UnknownAdjustField(s.into())),
        }
    }
}

impl fmt::Display for AdjustField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjustField::CopyId => f.write_str("copy_id"),
            AdjustField::CopyQuery => f.write_str("copy_query"),
        }
    }
}

//------------ Section -------------------------------------------------------

/// A section of a DNS message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

impl Section {
    /// The match criterion comparing this section.
    pub fn match_field(self) -> MatchField {
        match self {
            Section::Question => MatchField::Question,
            Section::Answer => MatchField::Answer,
            Section::Authority => MatchField::Authority,
            Section::Additional => MatchField::Additional,
        }
    }
}

impl FromStr for Section {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUESTION" => Ok(Section::Question),
            "ANSWER" => Ok(Section::Answer),
            "AUTHORITY" => Ok(Section::Authority),
            "ADDITIONAL" => Ok(Section::Additional),
            _ => Err(ConfigError::UnknownSection(s.into())),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.match_field(), f)
    }
}

//------------ Entry ---------------------------------------------------------

/// A scripted message plus its match and adjustment rules.
#[derive(Clone, Debug)]
pub struct Entry {
    match_fields: Vec<MatchField>,
    adjust_fields: Vec<AdjustField>,

    /// Always absolute, i.e., ends in a dot.
    origin: String,

    message: Message,

    /// The sections begun on this entry, in order.
    sections: Vec<Section>,

    /// The section records are currently added to.
    section: Option<Section>,
}

impl Entry {
    pub fn new() -> Self {
        Self {
            match_fields: MatchField::DEFAULT.to_vec(),
            adjust_fields: AdjustField::DEFAULT.to_vec(),
            origin: ".".into(),
            message: Message::new(),
            sections: Vec::new(),
            section: None,
        }
    }

    /// Creates an entry for an already assembled message.
    ///
    /// Every non-empty section of the message counts as populated, in
    /// message order.
    pub fn from_message(message: Message) -> Self {
        let mut sections = Vec::new();
        if !message.question.is_empty() {
            sections.push(Section::Question);
        }
        for (section, records) in [
            (Section::Answer, &message.answer),
            (Section::Authority, &message.authority),
            (Section::Additional, &message.additional),
        ] {
            if !records.is_empty() {
                sections.push(section);
            }
        }
        Self {
            message,
            sections,
            ..Self::new()
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn match_fields(&self) -> &[MatchField] {
        &self.match_fields
    }

    pub fn adjust_fields(&self) -> &[AdjustField] {
        &self.adjust_fields
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The sections populated so far, in the order they were begun.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn set_match_fields(&mut self, fields: Vec<MatchField>) {
        self.match_fields = fields;
    }

    /// Sets the match criteria from their script names.
    pub fn set_match<'a>(
        &mut self,
        tokens: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        self.match_fields = tokens
            .into_iter()
            .map(MatchField::from_str)
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    pub fn set_adjust_fields(&mut self, fields: Vec<AdjustField>) {
        self.adjust_fields = fields;
    }

    /// Sets the reply adjustments from their script names.
    pub fn set_adjust<'a>(
        &mut self,
        tokens: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        self.adjust_fields = tokens
            .into_iter()
            .map(AdjustField::from_str)
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Sets the origin used to qualify relative names.
    pub fn set_origin(&mut self, origin: &str) -> Result<(), ConfigError> {
        let origin = if origin.ends_with('.') {
            origin.to_string()
        } else {
            format!("{origin}.")
        };
        StoredName::from_str(&origin)
            .map_err(|_| ConfigError::BadOrigin(origin.clone()))?;
        self.origin = origin;
        Ok(())
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.message.opcode = opcode;
    }

    /// Sets header flags, rcode, and the DO bit from reply tokens.
    ///
    /// `DO` is the only extended flag. Any other token is tried as an
    /// rcode mnemonic first and as a header flag after that. Flags and
    /// rcode not mentioned are cleared.
    pub fn set_reply<'a>(
        &mut self,
        tokens: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        let mut flags = Flags::new();
        let mut rcode = OptRcode::NOERROR;
        let mut dnssec_ok = false;
        for token in tokens {
            if token == "DO" {
                dnssec_ok = true;
                continue;
            }
            if let Ok(value) = OptRcode::from_str(token) {
                rcode = value;
                continue;
            }
            let flag = Flags::from_str(token)
                .map_err(|_| ConfigError::UnknownFlag(token.into()))?;
            flags = merge_flags(flags, flag);
        }

        self.message.flags = flags;
        self.message.rcode = rcode;
        if dnssec_ok || rcode.is_ext() {
            self.message.use_edns().dnssec_ok = dnssec_ok;
        } else if let Some(edns) = self.message.edns.as_mut() {
            edns.dnssec_ok = false;
        }
        Ok(())
    }

    /// Starts adding records to the section with the given name.
    pub fn begin_section(&mut self, name: &str) -> Result<(), ConfigError> {
        self.begin(Section::from_str(name)?);
        Ok(())
    }

    /// Starts adding records to `section`.
    pub fn begin(&mut self, section: Section) {
        self.section = Some(section);
        self.sections.push(section);
    }

    /// Adds a record to the current section.
    ///
    /// `args` are the tokens following the owner: an optional TTL, an
    /// optional class, the record type, and the record data in
    /// presentation format. Relative names, including the owner, are
    /// taken relative to the origin. In the question section the record
    /// data must be absent.
    pub fn add_record(
        &mut self,
        owner: &str,
        args: &[&str],
    ) -> Result<(), ConfigError> {
        let section = self.section.ok_or(ConfigError::NoSection)?;
        let owner = self.qualify(owner);
        let mut rest = args;

        // TTL and class are only taken if a type token still follows.
        let mut ttl = DEFAULT_TTL;
        if let Some((token, tail)) = rest.split_first() {
            if let (Some(value), false) = (parse_ttl(token), tail.is_empty())
            {
                ttl = value;
                rest = tail;
            }
        }
        let mut class = DEFAULT_CLASS;
        if let Some((token, tail)) = rest.split_first() {
            if let (Ok(value), false) =
                (Class::from_str(token), tail.is_empty())
            {
                class = value;
                rest = tail;
            }
        }

        let (rtype_token, data) = rest
            .split_first()
            .ok_or_else(|| ConfigError::MissingType(owner.clone()))?;
        let rtype = Rtype::from_str(rtype_token)
            .map_err(|_| ConfigError::UnknownType((*rtype_token).into()))?;

        if section == Section::Question {
            if !data.is_empty() {
                return Err(ConfigError::UnexpectedRecordData(format!(
                    "{owner} {}",
                    args.join(" ")
                )));
            }
            let qname = StoredName::from_str(&owner)
                .map_err(|_| ConfigError::BadOwner(owner.clone()))?;
            self.message.question.push(Question::new(qname, rtype, class));
            return Ok(());
        }

        if data.is_empty() {
            return Err(ConfigError::MissingRecordData(format!(
                "{owner} {}",
                args.join(" ")
            )));
        }
        let mut data: Vec<String> =
            data.iter().map(|token| token.to_string()).collect();
        if rtype == Rtype::DS && data.len() > 1 {
            data[1] = ds_algorithm(&data[1])?;
        }

        let line =
            format!("{owner} {ttl} {class} {rtype} {}", data.join(" "));
        let record = self.scan_record(&line)?;
        let records = match section {
            Section::Answer => &mut self.message.answer,
            Section::Authority => &mut self.message.authority,
            _ => &mut self.message.additional,
        };
        records.push(record);
        Ok(())
    }

    /// Makes a possibly relative owner name absolute.
    fn qualify(&self, owner: &str) -> String {
        if owner == "@" {
            self.origin.clone()
        } else if owner.ends_with('.') {
            owner.into()
        } else if self.origin == "." {
            format!("{owner}.")
        } else {
            format!("{owner}.{}", self.origin)
        }
    }

    /// Parses a single record line with the zone file scanner.
    fn scan_record(&self, line: &str) -> Result<StoredRecord, ConfigError> {
        let bad_record = |reason: String| ConfigError::BadRecord {
            line: line.into(),
            reason,
        };

        let mut zonefile = Zonefile::new();
        zonefile.extend_from_slice(
            format!("$ORIGIN {}\n", self.origin).as_bytes(),
        );
        zonefile.extend_from_slice(b"ignore 3600 in ns ignore\n");
        zonefile.extend_from_slice(line.as_bytes());
        zonefile.extend_from_slice(b"\n");
        let _ignore = zonefile
            .next_entry()
            .map_err(|err| bad_record(err.to_string()))?;
        match zonefile
            .next_entry()
            .map_err(|err| bad_record(err.to_string()))?
        {
            Some(ZonefileEntry::Record(record)) => Ok(record.flatten_into()),
            _ => Err(bad_record("not a record".into())),
        }
    }
}

/// # Matching and Adjusting
///
impl Entry {
    /// Compares the entry against a message.
    ///
    /// The criteria are checked in order and the first one that fails is
    /// returned. If the criteria contain `all`, the flags and then every
    /// populated section in population order are checked instead.
    pub fn match_msg(&self, actual: &Message) -> Result<(), MatchError> {
        let fields: Vec<MatchField> =
            if self.match_fields.contains(&MatchField::All) {
                core::iter::once(MatchField::Flags)
                    .chain(self.sections.iter().map(|s| s.match_field()))
                    .collect()
            } else {
                self.match_fields.clone()
            };

        for field in fields {
            if let Err(mismatch) = self.match_field(field, actual) {
                trace!("{field} does not match: {mismatch}");
                return Err(MatchError::new(field, mismatch));
            }
        }
        Ok(())
    }

    fn match_field(
        &self,
        field: MatchField,
        actual: &Message,
    ) -> Result<(), Mismatch> {
        let expected = &self.message;
        match field {
            MatchField::Opcode => {
                compare_value(expected.opcode, actual.opcode)
            }
            MatchField::Qtype => match expected_question(expected, actual)? {
                Some((expected, actual)) => {
                    compare_value(expected.qtype(), actual.qtype())
                }
                None => Ok(()),
            },
            MatchField::Qname => match expected_question(expected, actual)? {
                Some((expected, actual)) => {
                    compare_value(expected.qname(), actual.qname())
                }
                None => Ok(()),
            },
            MatchField::Subdomain => {
                match expected_question(expected, actual)? {
                    Some((expected, actual))
                        if !actual.qname().ends_with(expected.qname()) =>
                    {
                        Err(Mismatch::NotSubdomain {
                            expected: expected.qname().to_string(),
                            got: actual.qname().to_string(),
                        })
                    }
                    _ => Ok(()),
                }
            }
            MatchField::Flags => {
                if expected.flags == actual.flags {
                    Ok(())
                } else {
                    Err(Mismatch::value(expected.flags, actual.flags))
                }
            }
            MatchField::Question => {
                compare_sets(&expected.question, &actual.question)
            }
            MatchField::Answer => {
                compare_sets(&expected.answer, &actual.answer)
            }
            MatchField::Authority => {
                compare_sets(&expected.authority, &actual.authority)
            }
            MatchField::Additional => {
                compare_sets(&expected.additional, &actual.additional)
            }
            MatchField::All => {
                // Expanded by match_msg, never checked on its own.
                Ok(())
            }
        }
    }

    /// Returns a copy of the scripted message tailored to `query`.
    pub fn adjust_reply(&self, query: &Message) -> Message {
        let mut reply = self.message.clone();
        if self.adjust_fields.contains(&AdjustField::CopyId) {
            reply.id = query.id;
        }
        if self.adjust_fields.contains(&AdjustField::CopyQuery) {
            reply.question = query.question.clone();
        }
        reply
    }

    /// Returns the adjusted reply if the entry matches `query`.
    pub fn try_reply(&self, query: &Message) -> Result<Message, MatchError> {
        self.match_msg(query)?;
        Ok(self.adjust_reply(query))
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

//------------ Helper Functions ----------------------------------------------

fn compare_value<T, U>(expected: T, got: U) -> Result<(), Mismatch>
where
    T: PartialEq<U> + fmt::Display,
    U: fmt::Display,
{
    if expected == got {
        Ok(())
    } else {
        Err(Mismatch::value(expected, got))
    }
}

/// Returns the first questions of both messages.
///
/// Without an expected question any question criterion holds, so `None`
/// is returned.
fn expected_question<'a>(
    expected: &'a Message,
    actual: &'a Message,
) -> Result<
    Option<(&'a Question<StoredName>, &'a Question<StoredName>)>,
    Mismatch,
> {
    let Some(expected) = expected.first_question() else {
        return Ok(None);
    };
    let actual = actual.first_question().ok_or(Mismatch::NoQuestion)?;
    Ok(Some((expected, actual)))
}

/// Checks that both lists hold the same items in any order.
fn compare_sets<T>(expected: &[T], got: &[T]) -> Result<(), Mismatch>
where
    T: PartialEq + fmt::Display,
{
    if let Some(missing) = expected.iter().find(|item| !got.contains(item)) {
        return Err(Mismatch::MissingRecord(missing.to_string()));
    }
    if let Some(extra) = got.iter().find(|item| !expected.contains(item)) {
        return Err(Mismatch::UnexpectedRecord(extra.to_string()));
    }
    Ok(())
}

fn merge_flags(mut flags: Flags, other: Flags) -> Flags {
    flags.qr |= other.qr;
    flags.aa |= other.aa;
    flags.tc |= other.tc;
    flags.rd |= other.rd;
    flags.ra |= other.ra;
    flags.ad |= other.ad;
    flags.cd |= other.cd;
    flags
}

/// Parses a TTL given in seconds or with BIND style units, e.g., `1h30m`.
fn parse_ttl(token: &str) -> Option<u32> {
    if let Ok(ttl) = token.parse::<u32>() {
        return Some(ttl);
    }
    let mut total: u32 = 0;
    let mut value: Option<u32> = None;
    for ch in token.chars() {
        if let Some(digit) = ch.to_digit(10) {
            value = Some(
                value.unwrap_or(0).checked_mul(10)?.checked_add(digit)?,
            );
            continue;
        }
        let unit = match ch.to_ascii_lowercase() {
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = total.checked_add(value.take()?.checked_mul(unit)?)?;
    }
    match value {
        Some(rest) => total.checked_add(rest),
        None => Some(total),
    }
}

/// Converts a DS algorithm mnemonic into its number.
fn ds_algorithm(token: &str) -> Result<String, ConfigError> {
    if token.parse::<u8>().is_ok() {
        return Ok(token.into());
    }
    SecurityAlgorithm::from_mnemonic(token.as_bytes())
        .map(|alg| alg.to_int().to_string())
        .ok_or_else(|| ConfigError::BadDsAlgorithm(token.into()))
}

//============ Testing =======================================================
