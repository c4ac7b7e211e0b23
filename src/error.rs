//! Error types.
//!
//! Three kinds of failure exist while a scenario is loaded and played. A
//! [`ConfigError`] means the script itself is broken and is always fatal.
//! A [`MatchError`] means a scripted expectation did not hold; it is fatal
//! when raised by a `CHECK_ANSWER` step and silently skipped when raised
//! while looking for a mock reply. A [`PlayError`] is what
//! [`Scenario::play`][crate::scenario::Scenario::play] finally surfaces,
//! annotated with the id of the step that failed.

use std::error;
use std::fmt;
use std::string::String;

use crate::entry::MatchField;
use crate::message::CodecError;
use crate::step::StepKind;

//------------ ConfigError ---------------------------------------------------

/// The scenario script is malformed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// A `MATCH` token is not a known criterion.
    UnknownMatchField(String),

    /// An `ADJUST` token is not a known adjustment.
    UnknownAdjustField(String),

    /// A `STEP` line names an unknown kind.
    UnknownStepKind(String),

    /// A `SECTION` line names an unknown section.
    UnknownSection(String),

    /// A record was added before any section was begun.
    NoSection,

    /// A `REPLY` token is neither a flag nor an rcode.
    UnknownFlag(String),

    /// An `OPCODE` token is not a known opcode.
    UnknownOpcode(String),

    /// The origin is not a valid absolute domain name.
    BadOrigin(String),

    /// A record owner is not a valid domain name.
    BadOwner(String),

    /// A record line ends before its type.
    MissingType(String),

    /// The record type token is not a known type.
    UnknownType(String),

    /// A question line carries record data.
    UnexpectedRecordData(String),

    /// A record line in a record section carries no data.
    MissingRecordData(String),

    /// The algorithm of a DS record is not a known algorithm.
    BadDsAlgorithm(String),

    /// The record data could not be parsed.
    BadRecord { line: String, reason: String },

    /// `TIME_PASSES` without an integer time argument.
    BadTime(Option<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownMatchField(token) => {
                write!(f, "unknown match request \"{token}\"")
            }
            ConfigError::UnknownAdjustField(token) => {
                write!(f, "unknown adjust request \"{token}\"")
            }
            ConfigError::UnknownStepKind(token) => {
                write!(f, "step {token} unsupported")
            }
            ConfigError::UnknownSection(token) => {
                write!(f, "bad section {token}")
            }
            ConfigError::NoSection => {
                f.write_str("record outside of a section")
            }
            ConfigError::UnknownFlag(token) => {
                write!(f, "unknown flag or rcode \"{token}\"")
            }
            ConfigError::UnknownOpcode(token) => {
                write!(f, "unknown opcode \"{token}\"")
            }
            ConfigError::BadOrigin(origin) => {
                write!(f, "bad origin '{origin}'")
            }
            ConfigError::BadOwner(owner) => write!(f, "bad owner '{owner}'"),
            ConfigError::MissingType(owner) => {
                write!(f, "missing record type for '{owner}'")
            }
            ConfigError::UnknownType(token) => {
                write!(f, "unknown record type \"{token}\"")
            }
            ConfigError::UnexpectedRecordData(line) => {
                write!(f, "record data in question '{line}'")
            }
            ConfigError::MissingRecordData(line) => {
                write!(f, "missing record data in '{line}'")
            }
            ConfigError::BadDsAlgorithm(token) => {
                write!(f, "unknown DS algorithm \"{token}\"")
            }
            ConfigError::BadRecord { line, reason } => {
                write!(f, "failed to parse record '{line}': {reason}")
            }
            ConfigError::BadTime(Some(token)) => {
                write!(f, "bad time value \"{token}\"")
            }
            ConfigError::BadTime(None) => f.write_str("missing time value"),
        }
    }
}

impl error::Error for ConfigError {}

//------------ Mismatch ------------------------------------------------------

/// Why a single match criterion failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mismatch {
    /// A scalar value differs.
    Value { expected: String, got: String },

    /// The question name is not below the expected name.
    NotSubdomain { expected: String, got: String },

    /// The message carries no question to compare against.
    NoQuestion,

    /// An expected record is absent from the message.
    MissingRecord(String),

    /// The message carries a record that was not expected.
    UnexpectedRecord(String),
}

impl Mismatch {
    pub(crate) fn value(
        expected: impl fmt::Display,
        got: impl fmt::Display,
    ) -> Self {
        Mismatch::Value {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Value { expected, got } => {
                write!(f, "expected '{expected}', got '{got}'")
            }
            Mismatch::NotSubdomain { expected, got } => {
                write!(f, "expected subdomain of '{expected}', got '{got}'")
            }
            Mismatch::NoQuestion => f.write_str("no question in message"),
            Mismatch::MissingRecord(record) => {
                write!(f, "expected record '{record}'")
            }
            Mismatch::UnexpectedRecord(record) => {
                write!(f, "unexpected record '{record}'")
            }
        }
    }
}

//------------ MatchError ----------------------------------------------------

/// A message did not satisfy one of an entry's match criteria.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MatchError {
    field: MatchField,
    mismatch: Mismatch,
}

impl MatchError {
    pub fn new(field: MatchField, mismatch: Mismatch) -> Self {
        Self { field, mismatch }
    }

    /// The criterion that failed.
    pub fn field(&self) -> MatchField {
        self.field
    }

    pub fn mismatch(&self) -> &Mismatch {
        &self.mismatch
    }
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.mismatch)
    }
}

impl error::Error for MatchError {}

//------------ PlayError -----------------------------------------------------

/// Playing a scenario failed.
#[derive(Debug)]
pub struct PlayError {
    step: Option<u64>,
    cause: PlayErrorCause,
}

impl PlayError {
    pub fn new(step: Option<u64>, cause: PlayErrorCause) -> Self {
        Self { step, cause }
    }

    /// The id of the step that failed, if any step was reached.
    pub fn step(&self) -> Option<u64> {
        self.step
    }

    pub fn cause(&self) -> &PlayErrorCause {
        &self.cause
    }

    pub fn into_cause(self) -> PlayErrorCause {
        self.cause
    }
}

impl fmt::Display for PlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "step #{} {}", step, self.cause),
            None => fmt::Display::fmt(&self.cause, f),
        }
    }
}

impl error::Error for PlayError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.cause {
            PlayErrorCause::Mismatch(err) => Some(err),
            PlayErrorCause::Config(err) => Some(err),
            PlayErrorCause::Codec(err) => Some(err),
            _ => None,
        }
    }
}

//------------ PlayErrorCause ------------------------------------------------

#[derive(Debug)]
pub enum PlayErrorCause {
    /// The scenario has no steps at all.
    NoSteps,

    /// A step that needs an entry has none.
    MissingEntry(StepKind),

    /// `CHECK_ANSWER` ran before any query produced an answer.
    MissingAnswer,

    /// The answer did not match the expected entry.
    Mismatch(MatchError),

    /// The step itself is malformed.
    Config(ConfigError),

    /// A message could not be encoded or decoded.
    Codec(CodecError),
}

impl From<MatchError> for PlayErrorCause {
    fn from(err: MatchError) -> Self {
        Self::Mismatch(err)
    }
}

impl From<ConfigError> for PlayErrorCause {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<CodecError> for PlayErrorCause {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

impl fmt::Display for PlayErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayErrorCause::NoSteps => {
                f.write_str("no steps in this scenario")
            }
            PlayErrorCause::MissingEntry(StepKind::Query) => {
                f.write_str("query definition required")
            }
            PlayErrorCause::MissingEntry(StepKind::CheckAnswer) => {
                f.write_str("response definition required")
            }
            PlayErrorCause::MissingEntry(kind) => {
                write!(f, "entry required for {kind}")
            }
            PlayErrorCause::MissingAnswer => {
                f.write_str("no answer from preceding query")
            }
            PlayErrorCause::Mismatch(err) => fmt::Display::fmt(err, f),
            PlayErrorCause::Config(err) => fmt::Display::fmt(err, f),
            PlayErrorCause::Codec(err) => fmt::Display::fmt(err, f),
        }
    }
}
