//! Poll bookkeeping for in-flight queries
//!
//! The daemon drives the cadence: each `get_results` answer says how long to
//! wait before asking again. The [`PollScheduler`] counts the polls issued
//! per qid and turns each answer into a [`PollDecision`]. It does not own
//! timers; the resolver task acts on the decision.
//!
//! Counters of finished qids are kept so a recheck continues counting, up to
//! [`DEFAULT_RETAINED_FINISHED`] of them; past that the oldest are dropped.

use crate::models::{QueryId, Response};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::trace;

/// Default poll ceiling when the daemon does not send `poll_limit`
pub const DEFAULT_MAX_POLLS: u32 = 4;

/// Delay used when a response carries neither `poll_interval` nor `refresh_interval`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Finished counters kept before the oldest are forgotten
pub const DEFAULT_RETAINED_FINISHED: usize = 1024;

/// Where a qid stands in its polling life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Admitted, waiting for the daemon to acknowledge `resolve`
    AwaitingFirstPoll,
    /// At least one `get_results` issued, more may follow
    Polling,
    /// A stop condition was met
    Terminal,
}

/// What to do after a response has been evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Issue poll number `attempt` after `delay`
    Repoll { attempt: u32, delay: Duration },
    /// Polling is over, the response is the final answer
    Stop(StopReason),
}

impl PollDecision {
    /// The `final_answer` flag handed to result handlers
    pub fn is_final(&self) -> bool {
        matches!(self, PollDecision::Stop(_))
    }
}

/// Why polling stopped, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The daemon sent a zero poll interval
    ServerRequested,
    Solved,
    /// The attempt ceiling was reached
    LimitReached,
}

#[derive(Debug, Clone, Copy)]
struct PollEntry {
    attempts: u32,
    phase: PollPhase,
}

/// Per-qid poll counters and stop-condition evaluation
#[derive(Debug)]
pub struct PollScheduler {
    max_polls: u32,
    default_interval: Duration,
    entries: HashMap<QueryId, PollEntry>,
    /// Finished qids, oldest first
    finished: VecDeque<QueryId>,
    retain_finished: usize,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL)
    }
}

impl PollScheduler {
    pub fn new(max_polls: u32, default_interval: Duration) -> Self {
        Self {
            max_polls: max_polls.max(1),
            default_interval,
            entries: HashMap::new(),
            finished: VecDeque::new(),
            retain_finished: DEFAULT_RETAINED_FINISHED,
        }
    }

    /// Keep at most `limit` finished counters
    pub fn retain_finished(mut self, limit: usize) -> Self {
        self.retain_finished = limit;
        self
    }

    /// Forget any previous counter for a qid entering as a new resolution
    pub fn admit(&mut self, qid: &QueryId) {
        self.entries.insert(
            qid.clone(),
            PollEntry {
                attempts: 0,
                phase: PollPhase::AwaitingFirstPoll,
            },
        );
    }

    /// Count the first poll of a (re)admitted qid and return its number
    ///
    /// Counters survive completion, so a recheck of an exhausted qid
    /// continues from where it stopped.
    pub fn begin(&mut self, qid: &QueryId) -> u32 {
        let entry = self.entries.entry(qid.clone()).or_insert(PollEntry {
            attempts: 0,
            phase: PollPhase::AwaitingFirstPoll,
        });
        entry.attempts += 1;
        entry.phase = PollPhase::Polling;
        entry.attempts
    }

    /// Evaluate a response and reserve the next poll if one is needed
    pub fn evaluate(&mut self, response: &Response) -> PollDecision {
        let max_polls = self.max_polls;
        let default_interval = self.default_interval;
        let entry = self
            .entries
            .entry(response.qid.clone())
            .or_insert(PollEntry {
                attempts: 0,
                phase: PollPhase::Polling,
            });

        let limit = response.poll_limit.unwrap_or(max_polls);
        let stop = if response.poll_interval == Some(0) {
            Some(StopReason::ServerRequested)
        } else if response.solved {
            Some(StopReason::Solved)
        } else if entry.attempts >= limit {
            Some(StopReason::LimitReached)
        } else {
            None
        };

        let decision = match stop {
            Some(reason) => {
                entry.phase = PollPhase::Terminal;
                PollDecision::Stop(reason)
            }
            None => {
                entry.attempts += 1;
                entry.phase = PollPhase::Polling;
                let delay = response
                    .poll_interval
                    .map(Duration::from_millis)
                    .unwrap_or(default_interval);
                PollDecision::Repoll {
                    attempt: entry.attempts,
                    delay,
                }
            }
        };

        trace!(
            qid = %response.qid,
            attempts = entry.attempts,
            limit,
            ?decision,
            "Evaluated poll response"
        );
        if decision.is_final() {
            self.retire(&response.qid);
        }
        decision
    }

    /// Mark a qid terminal without a response (call failed or timed out)
    pub fn terminate(&mut self, qid: &QueryId) {
        if let Some(entry) = self.entries.get_mut(qid) {
            entry.phase = PollPhase::Terminal;
            self.retire(qid);
        }
    }

    fn retire(&mut self, qid: &QueryId) {
        self.finished.retain(|known| known != qid);
        self.finished.push_back(qid.clone());

        while self.finished.len() > self.retain_finished {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            // a qid polled again since it finished keeps its counter
            if self.phase(&oldest) == Some(PollPhase::Terminal) {
                self.entries.remove(&oldest);
                trace!(qid = %oldest, "Forgot finished poll counter");
            }
        }
    }

    /// Number of polls issued or reserved for a qid
    pub fn attempts(&self, qid: &QueryId) -> u32 {
        self.entries.get(qid).map(|e| e.attempts).unwrap_or(0)
    }

    pub fn phase(&self, qid: &QueryId) -> Option<PollPhase> {
        self.entries.get(qid).map(|e| e.phase)
    }

    /// Snapshot of every known counter
    pub fn counts(&self) -> HashMap<QueryId, u32> {
        self.entries
            .iter()
            .map(|(qid, entry)| (qid.clone(), entry.attempts))
            .collect()
    }

    /// Drop all counters (cancellation)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.finished.clear();
    }
}
