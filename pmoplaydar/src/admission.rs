//! Admission control for resolution queries
//!
//! The [`AdmissionController`] owns the FIFO of pending queries and the
//! registry of in-flight ones. It never talks to the network: every
//! operation returns a [`Dispatch`] telling the caller which queries were
//! just admitted (and need a `resolve` call) or whether the resolver went
//! idle.
//!
//! Every admission gets a fresh generation number. Answers tagged with an
//! older generation belong to a cancelled run of the same qid.

use crate::models::{Query, QueryId};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default maximum number of queries in flight
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Outcome of a dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing pending and nothing in flight
    Idle,
    /// Every slot is taken; pending queries keep waiting
    Full,
    /// Queries moved from pending to in flight, in submission order.
    /// Empty when slots are free but nothing is pending.
    Admitted(Vec<Admission>),
}

/// A query given an in-flight slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub query: Query,
    pub generation: u64,
}

/// Outcome of [`AdmissionController::readmit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readmission {
    /// The qid already holds a slot; nothing changed
    AlreadyInFlight,
    /// The qid was still queued, so its `resolve` call has not been sent
    Unsent(Admission),
    /// The daemon already knows the qid; polling can resume
    Resume { generation: u64 },
}

/// FIFO queue plus in-flight registry with a concurrency ceiling
#[derive(Debug)]
pub struct AdmissionController {
    max_concurrent: usize,
    pending: VecDeque<Query>,
    in_flight: HashMap<QueryId, Admission>,
    next_generation: u64,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl AdmissionController {
    /// Create a controller; a ceiling of 0 is raised to 1
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Append a query to the pending queue and try to dispatch
    pub fn enqueue(&mut self, query: Query) -> Dispatch {
        debug!(qid = %query.qid(), pending = self.pending.len(), "Queueing query");
        self.pending.push_back(query);
        self.dispatch()
    }

    /// Move as many pending queries in flight as the ceiling allows
    pub fn dispatch(&mut self) -> Dispatch {
        // Rechecks may push the count above the ceiling
        let free = self.max_concurrent.saturating_sub(self.in_flight.len());
        if free == 0 {
            return Dispatch::Full;
        }

        if self.pending.is_empty() && self.in_flight.is_empty() {
            return Dispatch::Idle;
        }

        let take = free.min(self.pending.len());
        let queries: Vec<Query> = self.pending.drain(..take).collect();
        let admitted: Vec<Admission> = queries.into_iter().map(|q| self.occupy(q)).collect();

        if !admitted.is_empty() {
            debug!(
                admitted = admitted.len(),
                in_flight = self.in_flight.len(),
                pending = self.pending.len(),
                "Dispatched queries"
            );
        }

        Dispatch::Admitted(admitted)
    }

    /// Release the slot held by `qid` and dispatch again
    ///
    /// Returns `None` when `qid` was not in flight (already completed or
    /// cancelled), in which case nothing else happens.
    pub fn complete(&mut self, qid: &QueryId) -> Option<Dispatch> {
        self.in_flight.remove(qid)?;
        debug!(qid = %qid, in_flight = self.in_flight.len(), "Query completed");
        Some(self.dispatch())
    }

    /// Put `qid` back in flight, bypassing the queue and the ceiling
    ///
    /// A qid still waiting in the queue is taken out of it, so it is never in
    /// both places, and comes back as [`Readmission::Unsent`].
    pub fn readmit(&mut self, qid: QueryId) -> Readmission {
        if self.in_flight.contains_key(&qid) {
            return Readmission::AlreadyInFlight;
        }

        let queued = self
            .pending
            .iter()
            .position(|q| *q.qid() == qid)
            .and_then(|index| self.pending.remove(index));
        match queued {
            Some(query) => Readmission::Unsent(self.occupy(query)),
            None => {
                let admission = self.occupy(Query::bare(qid));
                Readmission::Resume {
                    generation: admission.generation,
                }
            }
        }
    }

    fn occupy(&mut self, query: Query) -> Admission {
        self.next_generation += 1;
        let admission = Admission {
            query,
            generation: self.next_generation,
        };
        self.in_flight
            .insert(admission.query.qid().clone(), admission.clone());
        admission
    }

    /// Whether `generation` is the live admission of `qid`
    pub fn is_current(&self, qid: &QueryId, generation: u64) -> bool {
        self.in_flight
            .get(qid)
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Drop every pending and in-flight query
    pub fn cancel_all(&mut self) {
        debug!(
            pending = self.pending.len(),
            in_flight = self.in_flight.len(),
            "Cancelling all queries"
        );
        self.pending.clear();
        self.in_flight.clear();
    }

    pub fn is_in_flight(&self, qid: &QueryId) -> bool {
        self.in_flight.contains_key(qid)
    }

    pub fn is_pending(&self, qid: &QueryId) -> bool {
        self.pending.iter().any(|q| q.qid() == qid)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending qids in dispatch order
    pub fn pending_ids(&self) -> Vec<QueryId> {
        self.pending.iter().map(|q| q.qid().clone()).collect()
    }

    /// In-flight qids, sorted
    pub fn in_flight_ids(&self) -> Vec<QueryId> {
        let mut ids: Vec<QueryId> = self.in_flight.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn in_flight_query(&self, qid: &QueryId) -> Option<&Query> {
        self.in_flight.get(qid).map(|slot| &slot.query)
    }
}
