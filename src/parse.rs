//! Loading scenarios from `.rpl` scripts.
//!
//! A script starts with a block of free-form configuration lines ended by
//! `CONFIG_END`. The configuration is meant for whoever sets up the
//! resolver under test and is kept as is. The scenario follows between
//! `SCENARIO_BEGIN` and `SCENARIO_END`. A `;` starts a comment that runs to
//! the end of the line.

use core::str::FromStr;
use std::error;
use std::fmt;
use std::io::{self, BufRead, Read};
use std::net::IpAddr;
use std::string::{String, ToString};
use std::vec::Vec;

use domain::base::iana::Opcode;
use tracing::trace;

use crate::entry::Entry;
use crate::error::ConfigError;
use crate::range::Range;
use crate::scenario::Scenario;
use crate::step::{Step, StepKind};

const CONFIG_END: &str = "CONFIG_END";
const SCENARIO_BEGIN: &str = "SCENARIO_BEGIN";
const SCENARIO_END: &str = "SCENARIO_END";
const RANGE_BEGIN: &str = "RANGE_BEGIN";
const RANGE_END: &str = "RANGE_END";
const ADDRESS: &str = "ADDRESS";
const ENTRY_BEGIN: &str = "ENTRY_BEGIN";
const ENTRY_END: &str = "ENTRY_END";
const MATCH: &str = "MATCH";
const ADJUST: &str = "ADJUST";
const REPLY: &str = "REPLY";
const OPCODE: &str = "OPCODE";
const SECTION: &str = "SECTION";
const STEP: &str = "STEP";
const ORIGIN: &str = "$ORIGIN";

//------------ Config --------------------------------------------------------

/// The configuration block of a script.
#[derive(Clone, Debug, Default)]
pub struct Config {
    lines: Vec<String>,
}

impl Config {
    pub fn lines(&self) -> &[String] {
        self.lines.as_ref()
    }

    /// Returns the value of the first `key: value` line for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let (name, value) = remove_comment(line).split_once(':')?;
            (name.trim() == key).then(|| value.trim())
        })
    }
}

//------------ Testcase ------------------------------------------------------

/// A loaded script.
#[derive(Clone, Debug)]
pub struct Testcase {
    /// The name of the script, usually its file name.
    pub name: String,

    /// General configuration of the test case.
    pub config: Config,

    /// The scenario to play.
    pub scenario: Scenario,
}

/// Loads a script from a reader.
pub fn parse_file<F: Read, T: ToString>(
    file: F,
    name: T,
) -> Result<Testcase, ParseError> {
    let mut lines = Lines::new(io::BufReader::new(file));
    let config = parse_config(&mut lines)?;
    let scenario = parse_scenario(&mut lines)?;
    trace!(
        "loaded {} steps and {} ranges",
        scenario.steps().len(),
        scenario.ranges().len()
    );
    Ok(Testcase {
        name: name.to_string(),
        config,
        scenario,
    })
}

/// Loads a script from a string.
pub fn parse_str<T: ToString>(
    script: &str,
    name: T,
) -> Result<Testcase, ParseError> {
    parse_file(script.as_bytes(), name)
}

/// Parses the configuration block.
///
/// This consumes lines until `CONFIG_END`. A script without configuration
/// may also start right away with `SCENARIO_BEGIN`.
fn parse_config<B: BufRead>(l: &mut Lines<B>) -> Result<Config, ParseError> {
    let mut config = Config::default();
    loop {
        let line = l.next_line(CONFIG_END)?;
        let clean_line = remove_comment(&line).trim();
        if clean_line.is_empty() {
            continue;
        }
        if clean_line == CONFIG_END {
            break;
        }
        if clean_line.split_whitespace().next() == Some(SCENARIO_BEGIN) {
            l.push_back(line);
            break;
        }
        config.lines.push(line);
    }
    Ok(config)
}

fn parse_scenario<B: BufRead>(
    l: &mut Lines<B>,
) -> Result<Scenario, ParseError> {
    let line = l.next_tokens(SCENARIO_BEGIN)?;
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some(SCENARIO_BEGIN) {
        return Err(l.unexpected(&line));
    }
    let info = tokens.collect::<Vec<_>>().join(" ");
    let mut scenario = Scenario::new(info);

    loop {
        let line = l.next_tokens(SCENARIO_END)?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some(RANGE_BEGIN) => {
                let start = l.number(tokens.next())?;
                let end = l.number(tokens.next())?;
                scenario.add_range(parse_range(start, end, l)?);
            }
            Some(STEP) => {
                let id = l.number(tokens.next())?;
                let kind = tokens
                    .next()
                    .ok_or_else(|| l.unexpected(&line))
                    .and_then(|token| {
                        StepKind::from_str(token).map_err(|err| l.config(err))
                    })?;
                let args = tokens.map(String::from).collect();
                scenario.add_step(parse_step(Step::new(id, kind, args), l)?);
            }
            Some(SCENARIO_END) => break,
            _ => return Err(l.unexpected(&line)),
        }
    }
    Ok(scenario)
}

fn parse_range<B: BufRead>(
    start: u64,
    end: u64,
    l: &mut Lines<B>,
) -> Result<Range, ParseError> {
    let mut range = Range::new(start, end);
    loop {
        let line = l.next_tokens(RANGE_END)?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some(ADDRESS) => {
                let addr = tokens.next().unwrap_or_default();
                let addr = IpAddr::from_str(addr).map_err(|_| {
                    l.error(ParseErrorCause::BadAddress(addr.into()))
                })?;
                range.set_address(addr);
            }
            Some(ENTRY_BEGIN) => range.add(parse_entry(l)?),
            Some(RANGE_END) => break,
            _ => return Err(l.unexpected(&line)),
        }
    }
    Ok(range)
}

/// Attaches the entries following a step line.
///
/// A step may carry any number of entries. Whether the kind needs one is
/// only checked when the step is played.
fn parse_step<B: BufRead>(
    mut step: Step,
    l: &mut Lines<B>,
) -> Result<Step, ParseError> {
    loop {
        let line = l.next_tokens(SCENARIO_END)?;
        if line.split_whitespace().next() == Some(ENTRY_BEGIN) {
            step.add(parse_entry(l)?);
        } else {
            l.push_back(line);
            break;
        }
    }
    Ok(step)
}

fn parse_entry<B: BufRead>(l: &mut Lines<B>) -> Result<Entry, ParseError> {
    let mut entry = Entry::new();
    loop {
        let line = l.next_tokens(ENTRY_END)?;
        let mut tokens = line.split_whitespace();
        let Some(token) = tokens.next() else {
            continue;
        };
        let res = match token {
            ENTRY_END => break,
            MATCH => entry.set_match(tokens),
            ADJUST => entry.set_adjust(tokens),
            REPLY => entry.set_reply(tokens),
            OPCODE => {
                let token = tokens.next().unwrap_or_default();
                Opcode::from_str(token)
                    .map(|opcode| entry.set_opcode(opcode))
                    .map_err(|_| ConfigError::UnknownOpcode(token.into()))
            }
            SECTION => {
                entry.begin_section(tokens.next().unwrap_or_default())
            }
            ORIGIN => entry.set_origin(tokens.next().unwrap_or_default()),
            owner => {
                let args: Vec<&str> = tokens.collect();
                entry.add_record(owner, &args)
            }
        };
        res.map_err(|err| l.config(err))?;
    }
    Ok(entry)
}

/// Cuts the line at the first `;` that is not inside a quoted string.
fn remove_comment(line: &str) -> &str {
    let mut quoted = false;
    let mut escaped = false;
    for (pos, ch) in line.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => return &line[..pos],
            _ => {}
        }
    }
    line
}

//------------ Lines ---------------------------------------------------------

/// The lines of a script with their line numbers.
struct Lines<B> {
    inner: io::Lines<B>,

    /// The number of the line returned last, starting at 1.
    line: usize,

    /// A line handed back by the parser.
    pending: Option<String>,
}

impl<B: BufRead> Lines<B> {
    fn new(reader: B) -> Self {
        Self {
            inner: reader.lines(),
            line: 0,
            pending: None,
        }
    }

    /// Returns the next raw line.
    ///
    /// Fails at the end of input, naming `expected` as what was missing.
    fn next_line(
        &mut self,
        expected: &'static str,
    ) -> Result<String, ParseError> {
        if let Some(line) = self.pending.take() {
            return Ok(line);
        }
        match self.inner.next() {
            Some(Ok(line)) => {
                self.line += 1;
                Ok(line)
            }
            Some(Err(err)) => Err(self.error(ParseErrorCause::Io(err))),
            None => Err(self.error(ParseErrorCause::UnexpectedEof(expected))),
        }
    }

    /// Returns the next line with content, without its comment.
    fn next_tokens(
        &mut self,
        expected: &'static str,
    ) -> Result<String, ParseError> {
        loop {
            let line = self.next_line(expected)?;
            let clean_line = remove_comment(&line).trim();
            if !clean_line.is_empty() {
                return Ok(clean_line.into());
            }
        }
    }

    /// Hands a line back to be returned again by the next call.
    fn push_back(&mut self, line: String) {
        self.pending = Some(line);
    }

    fn number(&self, token: Option<&str>) -> Result<u64, ParseError> {
        let token = token.unwrap_or_default();
        token
            .parse()
            .map_err(|_| self.error(ParseErrorCause::BadNumber(token.into())))
    }

    fn error(&self, cause: ParseErrorCause) -> ParseError {
        ParseError {
            line: self.line,
            cause,
        }
    }

    fn config(&self, err: ConfigError) -> ParseError {
        self.error(ParseErrorCause::Config(err))
    }

    fn unexpected(&self, line: &str) -> ParseError {
        self.error(ParseErrorCause::UnexpectedLine(line.into()))
    }
}

//------------ ParseError ----------------------------------------------------

/// A script could not be loaded.
#[derive(Debug)]
pub struct ParseError {
    line: usize,
    cause: ParseErrorCause,
}

impl ParseError {
    /// The number of the offending line, starting at 1.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn cause(&self) -> &ParseErrorCause {
        &self.cause
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.cause)
    }
}

impl error::Error for ParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.cause {
            ParseErrorCause::Io(err) => Some(err),
            ParseErrorCause::Config(err) => Some(err),
            _ => None,
        }
    }
}

//------------ ParseErrorCause -----------------------------------------------

#[derive(Debug)]
pub enum ParseErrorCause {
    /// Reading the script failed.
    Io(io::Error),

    /// The script ended while the given token was still expected.
    UnexpectedEof(&'static str),

    /// A line that doesn't belong where it is.
    UnexpectedLine(String),

    /// A step id or range bound is not an unsigned integer.
    BadNumber(String),

    /// A range address is not an IP address.
    BadAddress(String),

    /// The line is well-formed but its content is not.
    Config(ConfigError),
}

impl fmt::Display for ParseErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorCause::Io(err) => write!(f, "{err}"),
            ParseErrorCause::UnexpectedEof(expected) => {
                write!(f, "unexpected end of file, expected {expected}")
            }
            ParseErrorCause::UnexpectedLine(line) => {
                write!(f, "unexpected line '{line}'")
            }
            ParseErrorCause::BadNumber(token) => {
                write!(f, "bad number \"{token}\"")
            }
            ParseErrorCause::BadAddress(token) => {
                write!(f, "bad address \"{token}\"")
            }
            ParseErrorCause::Config(err) => write!(f, "{err}"),
        }
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::entry::{AdjustField, MatchField, Section};

    const SCRIPT: &str = "\
; A comment before anything else.
server:
    module-config: \"iterator\" ; trailing comment
    stub-zone: example.com.
CONFIG_END

SCENARIO_BEGIN Simple  lookup
RANGE_BEGIN 0 100
    ADDRESS 192.0.2.53
ENTRY_BEGIN
MATCH opcode qtype qname
ADJUST copy_id
REPLY QR AA NOERROR
SECTION QUESTION
www.example.com. IN A
SECTION ANSWER
www.example.com. IN A 192.0.2.1
ENTRY_END
RANGE_END

STEP 1 QUERY
ENTRY_BEGIN
REPLY RD
SECTION QUESTION
www.example.com. IN A
ENTRY_END

STEP 10 CHECK_ANSWER
ENTRY_BEGIN
MATCH all
REPLY QR RD RA
$ORIGIN example.com
SECTION QUESTION
www IN A
SECTION ANSWER
www IN A 192.0.2.1
ENTRY_END

STEP 20 TIME_PASSES ELAPSE 3600
SCENARIO_END
";

    #[test]
    fn script() {
        let testcase = parse_str(SCRIPT, "simple.rpl").unwrap();
        assert_eq!(testcase.name, "simple.rpl");
        assert_eq!(testcase.config.lines().len(), 3);
        assert_eq!(testcase.config.get("stub-zone"), Some("example.com."));
        assert_eq!(
            testcase.config.get("module-config"),
            Some("\"iterator\"")
        );
        assert_eq!(testcase.config.get("missing"), None);

        let scenario = &testcase.scenario;
        assert_eq!(scenario.info(), "Simple lookup");

        let range = &scenario.ranges()[0];
        assert_eq!((range.start(), range.end()), (0, 100));
        assert_eq!(range.address(), Some("192.0.2.53".parse().unwrap()));
        let entry = &range.entries()[0];
        assert_eq!(entry.match_fields(), MatchField::DEFAULT);
        assert_eq!(entry.adjust_fields(), [AdjustField::CopyId]);
        assert!(entry.message().flags.aa);
        assert_eq!(entry.sections(), [Section::Question, Section::Answer]);

        let steps = scenario.steps();
        assert_eq!(steps.len(), 3);
        assert_eq!((steps[0].id(), steps[0].kind()), (1, StepKind::Query));
        assert_eq!(steps[1].kind(), StepKind::CheckAnswer);
        assert_eq!(steps[1].entry().unwrap().origin(), "example.com.");
        assert_eq!(steps[1].entry().unwrap().message().answer.len(), 1);
        assert_eq!(steps[2].args(), ["ELAPSE", "3600"]);
        assert!(steps[2].entries().is_empty());
    }

    #[test]
    fn without_config() {
        let testcase =
            parse_str("SCENARIO_BEGIN bare\nSCENARIO_END\n", "bare").unwrap();
        assert!(testcase.config.lines().is_empty());
        assert_eq!(testcase.scenario.info(), "bare");
        assert!(testcase.scenario.steps().is_empty());
    }

    #[test]
    fn reply_step_with_several_entries() {
        let script = "\
CONFIG_END
SCENARIO_BEGIN pool
STEP 1 REPLY
ENTRY_BEGIN
SECTION QUESTION
a.example. A
ENTRY_END
ENTRY_BEGIN
SECTION QUESTION
b.example. A
ENTRY_END
STEP 2 QUERY
SCENARIO_END
";
        let testcase = parse_str(script, "pool").unwrap();
        let steps = testcase.scenario.steps();
        assert_eq!(steps[0].entries().len(), 2);
        assert_eq!(steps[0].remaining(), 2);
        assert!(steps[1].entries().is_empty());
    }

    #[test]
    fn errors_carry_line_numbers() {
        let script = "CONFIG_END\nSCENARIO_BEGIN x\nSTEP 1 TRAFFIC\n";
        let err = parse_str(script, "x").unwrap_err();
        assert_eq!(err.line(), 3);
        assert!(matches!(
            err.cause(),
            ParseErrorCause::Config(ConfigError::UnknownStepKind(_))
        ));

        let script = "CONFIG_END\nSCENARIO_BEGIN x\nSTEP one QUERY\n";
        let err = parse_str(script, "x").unwrap_err();
        assert!(matches!(err.cause(), ParseErrorCause::BadNumber(_)));

        let script = "CONFIG_END\nSCENARIO_BEGIN x\nRANGE_BEGIN 0 1\n\
                      ADDRESS nowhere\nRANGE_END\nSCENARIO_END\n";
        let err = parse_str(script, "x").unwrap_err();
        assert_eq!(err.line(), 4);
        assert!(matches!(err.cause(), ParseErrorCause::BadAddress(_)));
    }

    #[test]
    fn record_outside_section() {
        let script = "\
CONFIG_END
SCENARIO_BEGIN x
STEP 1 QUERY
ENTRY_BEGIN
www.example.com. IN A
ENTRY_END
SCENARIO_END
";
        let err = parse_str(script, "x").unwrap_err();
        assert_eq!(err.line(), 5);
        assert!(matches!(
            err.cause(),
            ParseErrorCause::Config(ConfigError::NoSection)
        ));
        assert_eq!(err.to_string(), "line 5: record outside of a section");
    }

    #[test]
    fn truncated_script() {
        let script = "CONFIG_END\nSCENARIO_BEGIN x\nSTEP 1 QUERY\n\
                      ENTRY_BEGIN\n";
        let err = parse_str(script, "x").unwrap_err();
        assert!(matches!(
            err.cause(),
            ParseErrorCause::UnexpectedEof(ENTRY_END)
        ));

        let err = parse_str("server:\n", "x").unwrap_err();
        assert!(matches!(
            err.cause(),
            ParseErrorCause::UnexpectedEof(CONFIG_END)
        ));
    }

    #[test]
    fn garbage_in_scenario() {
        let script = "CONFIG_END\nSCENARIO_BEGIN x\nBOGUS\nSCENARIO_END\n";
        let err = parse_str(script, "x").unwrap_err();
        assert_eq!(err.line(), 3);
        assert!(matches!(err.cause(), ParseErrorCause::UnexpectedLine(_)));
    }

    #[test]
    fn comments() {
        assert_eq!(remove_comment("a b ; c"), "a b ");
        assert_eq!(remove_comment("; c"), "");
        assert_eq!(remove_comment("a"), "a");
        assert_eq!(
            remove_comment("x TXT \"a;b\" ; c"),
            "x TXT \"a;b\" "
        );
        assert_eq!(
            remove_comment("x TXT \"a\\\";b\";c"),
            "x TXT \"a\\\";b\""
        );
        assert_eq!(remove_comment("x TXT a\\;b;c"), "x TXT a\\;b");
    }

    #[test]
    fn semicolon_in_quoted_record_data() {
        let script = "\
CONFIG_END
SCENARIO_BEGIN Quoted
STEP 1 CHECK_ANSWER
ENTRY_BEGIN
SECTION ANSWER
example.com. TXT \"v=spf1;all\" ; trailing comment
ENTRY_END
SCENARIO_END
";
        let testcase = parse_str(script, "quoted").unwrap();
        let step = &testcase.scenario.steps()[0];
        let answer = &step.entry().unwrap().message().answer;

        let mut expected = Entry::new();
        expected.begin_section("ANSWER").unwrap();
        expected
            .add_record("example.com.", &["TXT", "\"v=spf1;all\""])
            .unwrap();
        assert_eq!(*answer, expected.message().answer);
    }
}
