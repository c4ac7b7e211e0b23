//! Single scripted actions.

use core::str::FromStr;
use std::cell::Cell;
use std::fmt;
use std::string::String;
use std::vec::Vec;

use tracing::{debug, trace};

use crate::entry::Entry;
use crate::error::{ConfigError, PlayErrorCause};
use crate::message::Message;
use crate::scenario::{Context, Resolver, Scenario};

//------------ StepKind ------------------------------------------------------

/// What a step does when it is played.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StepKind {
    /// Send the entry's message to the resolver under test.
    Query,

    /// Reserved for checking queries sent upstream. Does nothing.
    CheckOutQuery,

    /// Compare the last answer against the entry.
    CheckAnswer,

    /// Move the clock to the time given as second argument.
    TimePasses,

    /// Offer the entry once as a reply to an upstream query.
    Reply,
}

impl StepKind {
    /// Returns whether steps of this kind need an entry.
    pub fn requires_entry(self) -> bool {
        !matches!(self, StepKind::TimePasses)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Query => "QUERY",
            StepKind::CheckOutQuery => "CHECK_OUT_QUERY",
            StepKind::CheckAnswer => "CHECK_ANSWER",
            StepKind::TimePasses => "TIME_PASSES",
            StepKind::Reply => "REPLY",
        }
    }
}

impl FromStr for StepKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUERY" => Ok(StepKind::Query),
            "CHECK_OUT_QUERY" => Ok(StepKind::CheckOutQuery),
            "CHECK_ANSWER" => Ok(StepKind::CheckAnswer),
            "TIME_PASSES" => Ok(StepKind::TimePasses),
            "REPLY" => Ok(StepKind::Reply),
            _ => Err(ConfigError::UnknownStepKind(s.into())),
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//------------ Step ----------------------------------------------------------

/// One scripted action of a scenario.
///
/// Besides its kind and raw arguments a step owns a pool of entries. Most
/// kinds only ever look at the first entry. The pool of a `REPLY` step is
/// used up one entry at a time by [`take_reply`][Self::take_reply]; used
/// entries stay in place and are only marked as consumed.
#[derive(Clone, Debug)]
pub struct Step {
    id: u64,
    kind: StepKind,
    args: Vec<String>,
    entries: Vec<Entry>,
    consumed: Vec<Cell<bool>>,
}

impl Step {
    /// Creates a step without entries.
    ///
    /// `args` are the tokens following the kind on the step line.
    pub fn new(id: u64, kind: StepKind, args: Vec<String>) -> Self {
        Self {
            id,
            kind,
            args,
            entries: Vec::new(),
            consumed: Vec::new(),
        }
    }

    /// Creates a step with a single entry and no arguments.
    pub fn with_entry(id: u64, kind: StepKind, entry: Entry) -> Self {
        let mut step = Self::new(id, kind, Vec::new());
        step.add(entry);
        step
    }

    /// Creates a `TIME_PASSES` step moving the clock to `time`.
    pub fn time_passes(id: u64, time: u64) -> Self {
        Self::new(
            id,
            StepKind::TimePasses,
            vec!["ELAPSE".into(), time.to_string()],
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// All entries, consumed or not.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The entry the step acts on.
    pub fn entry(&self) -> Option<&Entry> {
        self.entries.first()
    }

    pub fn add(&mut self, entry: Entry) {
        self.entries.push(entry);
        self.consumed.push(Cell::new(false));
    }

    /// Returns whether the entry at `idx` has been handed out.
    pub fn is_consumed(&self, idx: usize) -> bool {
        self.consumed.get(idx).is_some_and(Cell::get)
    }

    /// The number of entries not yet handed out.
    pub fn remaining(&self) -> usize {
        self.consumed.iter().filter(|used| !used.get()).count()
    }

    /// Hands out the first remaining entry if it matches `query`.
    ///
    /// On success the entry is marked as consumed and will never be
    /// returned again. Later entries are not tried.
    pub fn take_reply(&self, query: &Message) -> Option<Message> {
        let idx = self.consumed.iter().position(|used| !used.get())?;
        match self.entries[idx].try_reply(query) {
            Ok(reply) => {
                self.consumed[idx].set(true);
                debug!("step {} handed out entry {idx}", self.id);
                Some(reply)
            }
            Err(err) => {
                trace!("step {} candidate rejected: {err}", self.id);
                None
            }
        }
    }
}

/// # Playing
///
impl Step {
    /// Executes the step.
    pub fn play<R: Resolver>(
        &self,
        scenario: &Scenario,
        ctx: &mut Context<R>,
    ) -> Result<(), PlayErrorCause> {
        match self.kind {
            StepKind::Query => self.query(scenario, ctx),
            StepKind::CheckOutQuery => Ok(()),
            StepKind::CheckAnswer => self.check_answer(ctx),
            StepKind::TimePasses => self.time_passes_to(scenario, ctx),
            // Used by Scenario::reply while a query is in flight.
            StepKind::Reply => Ok(()),
        }
    }

    fn required_entry(&self) -> Result<&Entry, PlayErrorCause> {
        self.entry().ok_or(PlayErrorCause::MissingEntry(self.kind))
    }

    fn query<R: Resolver>(
        &self,
        scenario: &Scenario,
        ctx: &mut Context<R>,
    ) -> Result<(), PlayErrorCause> {
        let mut query = self.required_entry()?.message().clone();
        query.use_edns();
        trace!(?query, "sending query");
        let wire = query.to_wire()?;

        // A missing answer keeps whatever answer an earlier step got.
        match ctx.resolve(&wire, scenario) {
            Some(answer) => {
                let answer = Message::from_wire(answer)?;
                trace!(?answer, "received answer");
                ctx.set_last_answer(answer);
            }
            None => debug!("no answer"),
        }
        Ok(())
    }

    fn check_answer<R: Resolver>(
        &self,
        ctx: &mut Context<R>,
    ) -> Result<(), PlayErrorCause> {
        let expected = self.required_entry()?;
        let answer =
            ctx.last_answer().ok_or(PlayErrorCause::MissingAnswer)?;
        expected.match_msg(answer)?;
        Ok(())
    }

    fn time_passes_to<R: Resolver>(
        &self,
        scenario: &Scenario,
        ctx: &mut Context<R>,
    ) -> Result<(), PlayErrorCause> {
        let token = self.args.get(1).ok_or(ConfigError::BadTime(None))?;
        let time = token
            .parse::<u64>()
            .map_err(|_| ConfigError::BadTime(Some(token.clone())))?;
        debug!("setting time to {time}");
        scenario.set_time(time);
        ctx.set_time(time);
        Ok(())
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;

    fn entry(qname: &str) -> Entry {
        let mut entry = Entry::new();
        entry.begin_section("QUESTION").unwrap();
        entry.add_record(qname, &["A"]).unwrap();
        entry
    }

    #[test]
    fn kinds() {
        for kind in [
            StepKind::Query,
            StepKind::CheckOutQuery,
            StepKind::CheckAnswer,
            StepKind::TimePasses,
            StepKind::Reply,
        ] {
            assert_eq!(StepKind::from_str(kind.as_str()), Ok(kind));
            assert_eq!(kind.requires_entry(), kind != StepKind::TimePasses);
        }
        assert_eq!(
            StepKind::from_str("TRAFFIC"),
            Err(ConfigError::UnknownStepKind("TRAFFIC".into()))
        );
    }

    #[test]
    fn pool_hands_out_once() {
        let step = Step::with_entry(1, StepKind::Reply, entry("a.example."));
        let query = entry("a.example.").message().clone();

        assert_eq!(step.remaining(), 1);
        assert!(step.take_reply(&query).is_some());
        assert!(step.is_consumed(0));
        assert_eq!(step.remaining(), 0);
        assert!(step.take_reply(&query).is_none());

        // The history stays inspectable.
        assert_eq!(step.entries().len(), 1);
    }

    #[test]
    fn pool_only_tries_first_remaining() {
        let mut step =
            Step::with_entry(1, StepKind::Reply, entry("a.example."));
        step.add(entry("b.example."));

        let b = entry("b.example.").message().clone();
        assert!(step.take_reply(&b).is_none());
        assert_eq!(step.remaining(), 2);

        let a = entry("a.example.").message().clone();
        assert!(step.take_reply(&a).is_some());
        assert!(step.take_reply(&b).is_some());
        assert!(step.is_consumed(1));
        assert!(!step.is_consumed(2));
    }

    #[test]
    fn time_passes_arguments() {
        let step = Step::time_passes(3, 3600);
        assert_eq!(step.args(), &["ELAPSE".to_string(), "3600".to_string()]);
        assert!(step.entry().is_none());
    }
}
