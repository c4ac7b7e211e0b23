use std::fs::{self, File};
use std::net::IpAddr;
use std::path::PathBuf;

use bytes::Bytes;
use rstest::rstest;
use tracing::instrument;
use tracing::trace;

use dnsreplay::entry::MatchField;
use dnsreplay::error::PlayErrorCause;
use dnsreplay::logging::init_logging;
use dnsreplay::message::{Message, StoredQuestion};
use dnsreplay::parse::{parse_file, parse_str, Config, Testcase};
use dnsreplay::scenario::{Context, Resolver, Scenario};
use dnsreplay::step::StepKind;

//----------- Tests ----------------------------------------------------------

/// Plays every script in test-data against a caching forwarder.
///
/// Note: Adding or removing .rpl files on disk won't be detected until the
/// test is re-compiled.
#[instrument(skip_all, fields(rpl = rpl_file.file_name().unwrap().to_str()))]
#[rstest]
fn scenario_tests(#[files("test-data/*.rpl")] rpl_file: PathBuf) {
    init_logging();

    let file = File::open(&rpl_file).unwrap();
    let testcase = parse_file(file, rpl_file.display()).unwrap();
    let mut ctx = Context::new(CachingForwarder::new(&testcase.config));
    if let Err(err) = testcase.scenario.play(&mut ctx) {
        panic!("{}: {err}", testcase.name);
    }
}

#[test]
fn cache_uses_reply_steps_once() {
    init_logging();

    let testcase = load("cache_expiry.rpl", |script| script);
    let scenario = &testcase.scenario;
    let mut ctx = Context::new(CachingForwarder::new(&testcase.config));
    scenario.play(&mut ctx).unwrap();

    assert_eq!(ctx.resolver().upstream_queries, 2);
    assert_eq!(ctx.resolver().now, 600);
    assert_eq!(ctx.time(), Some(600));
    assert_eq!(scenario.time(), 600);
    assert_eq!(scenario.current_step(), Some(9));
    for step in scenario.steps() {
        if step.kind() == StepKind::Reply {
            assert_eq!(step.remaining(), 0, "step {}", step.id());
        }
    }
}

#[test]
fn wrong_expectation_names_step_and_field() {
    init_logging();

    let testcase = load("forward.rpl", |mut script| {
        let pos = script.rfind("192.0.2.1").unwrap();
        script.replace_range(pos..pos + "192.0.2.1".len(), "192.0.2.9");
        script
    });
    let mut ctx = Context::new(CachingForwarder::new(&testcase.config));
    let err = testcase.scenario.play(&mut ctx).unwrap_err();

    assert_eq!(err.step(), Some(2));
    let PlayErrorCause::Mismatch(mismatch) = err.cause() else {
        panic!("unexpected error {err}");
    };
    assert_eq!(mismatch.field(), MatchField::Answer);
    assert!(
        err.to_string().starts_with("step #2 answer: expected record"),
        "{err}"
    );
}

#[test]
fn upstream_address_selects_range() {
    init_logging();

    let testcase = load("forward.rpl", |script| {
        script.replacen("192.0.2.53\n", "198.51.100.53\n", 1)
    });
    let mut ctx = Context::new(CachingForwarder::new(&testcase.config));
    let err = testcase.scenario.play(&mut ctx).unwrap_err();
    assert_eq!(err.step(), Some(2));
    let answer = ctx.last_answer().unwrap();
    assert!(answer.answer[0].to_string().contains("198.51.100.1"));

    // Unknown upstream addresses are answered by any range.
    let testcase = load("forward.rpl", |script| {
        script.replacen("192.0.2.53\n", "203.0.113.1\n", 1)
    });
    let mut ctx = Context::new(CachingForwarder::new(&testcase.config));
    testcase.scenario.play(&mut ctx).unwrap();
}

#[test]
fn query_without_upstream_answer() {
    init_logging();

    let script = "\
CONFIG_END
SCENARIO_BEGIN Nobody answers
STEP 1 QUERY
ENTRY_BEGIN
SECTION QUESTION
www.example.com. IN A
ENTRY_END
STEP 2 CHECK_ANSWER
ENTRY_BEGIN
MATCH all
SECTION QUESTION
www.example.com. IN A
ENTRY_END
SCENARIO_END
";
    let testcase = parse_str(script, "nobody").unwrap();
    let mut ctx = Context::new(CachingForwarder::new(&testcase.config));
    let err = testcase.scenario.play(&mut ctx).unwrap_err();
    assert_eq!(err.step(), Some(2));
    assert!(matches!(err.cause(), PlayErrorCause::MissingAnswer));
    assert_eq!(ctx.resolver().upstream_queries, 1);
}

#[test]
fn step_without_entry_stops_scenario() {
    init_logging();

    let script = "\
CONFIG_END
SCENARIO_BEGIN Missing entry
STEP 1 TIME_PASSES ELAPSE 10
STEP 2 CHECK_ANSWER
STEP 3 TIME_PASSES ELAPSE 20
SCENARIO_END
";
    let testcase = parse_str(script, "missing").unwrap();
    let mut ctx = Context::new(CachingForwarder::new(&testcase.config));
    let err = testcase.scenario.play(&mut ctx).unwrap_err();
    assert_eq!(err.to_string(), "step #2 response definition required");
    assert_eq!(ctx.resolver().now, 10);
}

//----------- test helpers ---------------------------------------------------

/// Loads a script from test-data after passing it through `edit`.
fn load(name: &str, edit: impl FnOnce(String) -> String) -> Testcase {
    let path = PathBuf::from("test-data").join(name);
    let script = fs::read_to_string(&path).unwrap();
    parse_str(&edit(script), name).unwrap()
}

/// A forwarding resolver with a minimal answer cache.
///
/// Answers are cached for the smallest TTL in their answer section.
/// Upstream queries go to the address given by the `forward-addr` config
/// option, if any.
struct CachingForwarder {
    upstream: Option<IpAddr>,
    now: u64,
    cache: Vec<(StoredQuestion, u64, Message)>,
    upstream_queries: usize,
}

impl CachingForwarder {
    fn new(config: &Config) -> Self {
        Self {
            upstream: config
                .get("forward-addr")
                .map(|addr| addr.parse().unwrap()),
            now: 0,
            cache: Vec::new(),
            upstream_queries: 0,
        }
    }

    fn cached(&self, question: &StoredQuestion) -> Option<&Message> {
        self.cache
            .iter()
            .find(|(q, expires, _)| q == question && *expires > self.now)
            .map(|(_, _, answer)| answer)
    }
}

impl Resolver for CachingForwarder {
    fn resolve(
        &mut self,
        query: &[u8],
        upstream: &Scenario,
    ) -> Option<Bytes> {
        let query_msg =
            Message::from_wire(Bytes::copy_from_slice(query)).ok()?;
        let question = query_msg.first_question()?.clone();

        if let Some(cached) = self.cached(&question) {
            trace!("cache hit for {question}");
            let mut answer = cached.clone();
            answer.id = query_msg.id;
            return answer.to_wire().ok();
        }

        self.upstream_queries += 1;
        let octets = upstream.reply_wire(query, self.upstream)?;
        let answer = Message::from_wire(octets.clone()).ok()?;
        let ttl = answer
            .answer
            .iter()
            .map(|record| record.ttl().as_secs())
            .min();
        if let Some(ttl) = ttl {
            self.cache.retain(|(q, _, _)| *q != question);
            self.cache.push((question, self.now + u64::from(ttl), answer));
        }
        Some(octets)
    }

    fn set_time(&mut self, time: u64) {
        self.now = time;
    }
}
