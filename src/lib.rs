//! Scripted DNS scenarios for testing resolvers.
//!
//! A scenario is an ordered list of [steps][step::Step] played against a
//! resolver under test. Steps send queries to the resolver, check the
//! answers it gives, and move its clock. While resolving, the resolver
//! asks the scenario for the replies of mocked upstream servers. Those
//! replies come from [ranges][range::Range], which offer canned replies
//! for a window of steps, and from `REPLY` steps, which offer each reply
//! exactly once.
//!
//! Each canned message is held by an [`Entry`][entry::Entry] which also
//! says how it is matched against incoming messages and how a reply is
//! adjusted to the query it answers.
//!
//! # Playing a scenario
//!
//! The resolver under test is represented by the
//! [`Resolver`][scenario::Resolver] trait. It receives queries in wire
//! format together with the scenario so it can look up upstream replies
//! via [`Scenario::reply`][scenario::Scenario::reply] or
//! [`Scenario::reply_wire`][scenario::Scenario::reply_wire].
//!
//! ```no_run
//! use bytes::Bytes;
//! use dnsreplay::parse::parse_file;
//! use dnsreplay::scenario::{Context, Resolver, Scenario};
//!
//! struct Forwarder;
//!
//! impl Resolver for Forwarder {
//!     fn resolve(
//!         &mut self,
//!         query: &[u8],
//!         upstream: &Scenario,
//!     ) -> Option<Bytes> {
//!         upstream.reply_wire(query, None)
//!     }
//!
//!     fn set_time(&mut self, _time: u64) {}
//! }
//!
//! let file = std::fs::File::open("test-data/forward.rpl").unwrap();
//! let testcase = parse_file(file, "forward.rpl").unwrap();
//! let mut ctx = Context::new(Forwarder);
//! testcase.scenario.play(&mut ctx).unwrap();
//! ```
//!
//! # Modules
//!
//! * [message] has the structured DNS message scenarios work with and its
//!   conversion from and to the wire format,
//! * [entry], [range], [step], and [scenario] make up the scenario model,
//! * [parse] loads scenarios from `.rpl` scripts,
//! * [error] has the error types, and
//! * [logging] sets up log output for test harnesses.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod entry;
pub mod error;
pub mod logging;
pub mod message;
pub mod parse;
pub mod range;
pub mod scenario;
pub mod step;
