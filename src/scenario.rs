//! Scenarios and how they are played.
//!
//! A [`Scenario`] is played against a resolver under test, represented by
//! the [`Resolver`] trait, through an execution [`Context`]. While a
//! `QUERY` step waits for the resolver, the resolver may ask the scenario
//! for mocked upstream replies via [`Scenario::reply`]. That call happens
//! synchronously on the same thread, nested inside [`Scenario::play`].

use std::cell::Cell;
use std::net::IpAddr;
use std::string::String;
use std::vec::Vec;

use bytes::Bytes;
use tracing::{debug, info_span, trace, warn};

use crate::error::{PlayError, PlayErrorCause};
use crate::message::Message;
use crate::range::Range;
use crate::step::{Step, StepKind};

//------------ Resolver ------------------------------------------------------

/// The resolver under test.
pub trait Resolver {
    /// Resolves a query given in wire format.
    ///
    /// Upstream queries the resolver needs to send while resolving can be
    /// answered through `upstream`. Returns `None` if no answer arrived.
    fn resolve(&mut self, query: &[u8], upstream: &Scenario) -> Option<Bytes>;

    /// Sets the resolver's clock to `time`.
    fn set_time(&mut self, time: u64);
}

impl<R: Resolver + ?Sized> Resolver for &mut R {
    fn resolve(
        &mut self,
        query: &[u8],
        upstream: &Scenario,
    ) -> Option<Bytes> {
        (**self).resolve(query, upstream)
    }

    fn set_time(&mut self, time: u64) {
        (**self).set_time(time)
    }
}

//------------ Context -------------------------------------------------------

/// The state carried from step to step while a scenario is played.
#[derive(Debug)]
pub struct Context<R> {
    resolver: R,

    /// The most recent answer received from the resolver.
    last_answer: Option<Message>,

    /// The time last passed to the resolver's clock.
    time: Option<u64>,
}

impl<R: Resolver> Context<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            last_answer: None,
            time: None,
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    pub fn into_resolver(self) -> R {
        self.resolver
    }

    pub fn last_answer(&self) -> Option<&Message> {
        self.last_answer.as_ref()
    }

    pub fn time(&self) -> Option<u64> {
        self.time
    }

    pub(crate) fn set_last_answer(&mut self, answer: Message) {
        self.last_answer = Some(answer);
    }

    pub(crate) fn resolve(
        &mut self,
        query: &[u8],
        scenario: &Scenario,
    ) -> Option<Bytes> {
        self.resolver.resolve(query, scenario)
    }

    pub(crate) fn set_time(&mut self, time: u64) {
        self.time = Some(time);
        self.resolver.set_time(time);
    }
}

//------------ Scenario ------------------------------------------------------

/// An ordered script of steps plus the ranges supporting it.
///
/// Steps are played in the order they were added, whatever their ids. A
/// scenario is meant to be played once: replies handed out by `REPLY`
/// steps stay consumed.
#[derive(Clone, Debug, Default)]
pub struct Scenario {
    info: String,
    steps: Vec<Step>,
    ranges: Vec<Range>,

    /// The id of the step being played.
    current_step: Cell<Option<u64>>,

    /// The virtual time.
    time: Cell<u64>,
}

impl Scenario {
    pub fn new(info: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            ..Default::default()
        }
    }

    /// The description of the scenario.
    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn add_range(&mut self, range: Range) {
        self.ranges.push(range);
    }

    /// The id of the step being played, if playing has started.
    pub fn current_step(&self) -> Option<u64> {
        self.current_step.get()
    }

    /// The virtual time as last set by a `TIME_PASSES` step.
    pub fn time(&self) -> u64 {
        self.time.get()
    }

    pub(crate) fn set_time(&self, time: u64) {
        self.time.set(time)
    }

    /// Finds a mocked reply for an upstream query.
    ///
    /// Eligible ranges are asked first, in order. After that the `REPLY`
    /// steps up to and including the current step are asked, in order,
    /// each with its first remaining entry only. A reply from a step is
    /// handed out once.
    ///
    /// An address no range is scoped to is treated like no address at
    /// all, so any range may answer it.
    pub fn reply(
        &self,
        query: &Message,
        address: Option<IpAddr>,
    ) -> Option<Message> {
        let step = self.current_step.get().unwrap_or(0);
        let address = address.filter(|addr| {
            self.ranges.iter().any(|range| range.address() == Some(*addr))
        });

        for range in &self.ranges {
            if !range.eligible(step, address) {
                continue;
            }
            if let Some(reply) = range.reply(query) {
                debug!(
                    "reply from range {}-{} at step {step}",
                    range.start(),
                    range.end()
                );
                return Some(reply);
            }
        }

        for candidate in &self.steps {
            if candidate.id() > step || candidate.kind() != StepKind::Reply {
                continue;
            }
            if let Some(reply) = candidate.take_reply(query) {
                debug!("reply from step {} at step {step}", candidate.id());
                return Some(reply);
            }
        }

        debug!("no reply at step {step}");
        None
    }

    /// Finds a mocked reply for an upstream query in wire format.
    ///
    /// This is [`reply`][Self::reply] for resolvers that deal in octets.
    /// A query that can't be decoded gets no reply.
    pub fn reply_wire(
        &self,
        query: &[u8],
        address: Option<IpAddr>,
    ) -> Option<Bytes> {
        let query = match Message::from_wire(Bytes::copy_from_slice(query)) {
            Ok(query) => query,
            Err(err) => {
                warn!("cannot decode upstream query: {err}");
                return None;
            }
        };
        let reply = self.reply(&query, address)?;
        match reply.to_wire() {
            Ok(octets) => Some(octets),
            Err(err) => {
                warn!("cannot encode reply: {err}");
                None
            }
        }
    }

    /// Plays all steps in order.
    ///
    /// The first failing step ends the scenario. Whatever earlier steps did,
    /// such as moving the clock, stays done.
    pub fn play<R: Resolver>(
        &self,
        ctx: &mut Context<R>,
    ) -> Result<(), PlayError> {
        if self.steps.is_empty() {
            return Err(PlayError::new(None, PlayErrorCause::NoSteps));
        }

        for step in &self.steps {
            let span = info_span!("step", "{}:{}", step.id(), step.kind());
            let _guard = span.enter();

            debug!("Processing step");
            self.current_step.set(Some(step.id()));
            step.play(self, ctx)
                .map_err(|cause| PlayError::new(Some(step.id()), cause))?;
        }

        trace!("all steps passed");
        Ok(())
    }
}

//============ Testing =======================================================
