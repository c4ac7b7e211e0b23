//! Mock upstream replies valid for a window of steps.

use std::net::IpAddr;
use std::vec::Vec;

use tracing::trace;

use crate::entry::Entry;
use crate::message::Message;

//------------ Range ---------------------------------------------------------

/// A pool of reusable canned replies.
///
/// The replies are available while the scenario is at a step whose id lies
/// in the inclusive window `[start, end]`. A range may be limited to
/// queries sent to one upstream address.
#[derive(Clone, Debug, Default)]
pub struct Range {
    start: u64,
    end: u64,
    address: Option<IpAddr>,
    entries: Vec<Entry>,
}

impl Range {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn set_address(&mut self, address: IpAddr) {
        self.address = Some(address);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Appends a canned reply.
    pub fn add(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Returns whether the range may answer at this step and address.
    ///
    /// A range without an address answers for any address and a query
    /// without an address is answered by any range.
    pub fn eligible(&self, step: u64, address: Option<IpAddr>) -> bool {
        if step < self.start || step > self.end {
            return false;
        }
        match (self.address, address) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }

    /// Returns the first entry matching `query`, adjusted to it.
    ///
    /// Entries are never used up.
    pub fn reply(&self, query: &Message) -> Option<Message> {
        self.entries.iter().find_map(|entry| {
            entry
                .try_reply(query)
                .map_err(|err| {
                    trace!(
                        "range {}-{} candidate rejected: {err}",
                        self.start,
                        self.end
                    )
                })
                .ok()
        })
    }
}

//============ Testing =======================================================
