//! Asynchronous Playdar client
//!
//! [`PlaydarClient`] is a cheap, cloneable handle. The resolution state
//! (pending queue, in-flight registry, poll counters, handlers and poll
//! timers) lives in a single resolver task which processes one command or
//! completion event at a time, so admission and completion never interleave.
//!
//! Transport calls run in their own tasks and post their outcome back to the
//! resolver, tagged with the admission generation they were issued for. A
//! call cannot be aborted once issued; an answer whose generation is no
//! longer the live one (the qid was cancelled, maybe readmitted since) is
//! dropped.
//!
//! # Example
//!
//! ```no_run
//! use pmoplaydar::{PlaydarClient, HttpTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = HttpTransport::builder().auth_token("token").build()?;
//!     let client = PlaydarClient::builder()
//!         .transport(Arc::new(transport))
//!         .build()?;
//!
//!     let qid = client.resolve("Miles Davis", "Kind of Blue", "So What", None, None)?;
//!     let mut updates = client.results_channel(qid)?;
//!     while let Some(update) = updates.recv().await {
//!         println!("{} results", update.response.results.len());
//!         if update.final_answer {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::admission::{
    Admission, AdmissionController, Dispatch, Readmission, DEFAULT_MAX_CONCURRENT,
};
use crate::error::{Error, Result};
use crate::models::{Query, QueryId, Response, StatResponse};
use crate::polling::{PollDecision, PollScheduler, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL};
use crate::router::{Listener, ResultRouter, ResultsHandler};
use crate::transport::{ApiCall, HttpTransport, Transport};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default deadline for a single `resolve` / `get_results` call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the `stat` probe
pub const DEFAULT_STAT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Tuning of the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Maximum number of queries in flight (at least 1)
    pub max_concurrent: usize,
    /// Poll ceiling when the daemon sends no `poll_limit`
    pub max_polls: u32,
    /// Delay between polls when the daemon sends no interval
    pub default_poll_interval: Duration,
    /// Deadline for each transport call; `None` waits forever
    pub call_timeout: Option<Duration>,
    pub stat_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_polls: DEFAULT_MAX_POLLS,
            default_poll_interval: DEFAULT_POLL_INTERVAL,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            stat_timeout: DEFAULT_STAT_TIMEOUT,
        }
    }
}

/// One poll response as seen by a results channel
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsUpdate {
    pub response: Response,
    /// No further update will follow for this qid
    pub final_answer: bool,
}

/// Point-in-time view of the resolver state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverSnapshot {
    /// Queued qids in dispatch order
    pub pending: Vec<QueryId>,
    /// In-flight qids, sorted
    pub in_flight: Vec<QueryId>,
    pub poll_counts: HashMap<QueryId, u32>,
    /// Most recent qid whose polling started
    pub last_qid: Option<QueryId>,
    /// Poll timers currently armed
    pub scheduled_polls: usize,
}

enum Command {
    Resolve(Query),
    Cancel,
    Recheck(QueryId),
    RegisterHandler {
        qid: Option<QueryId>,
        handler: ResultsHandler,
    },
    RegisterListener(Listener),
    NotifyStat(Option<StatResponse>),
    Snapshot(oneshot::Sender<ResolverSnapshot>),
    Shutdown,
}

enum Event {
    ResolveAcked {
        qid: QueryId,
        generation: u64,
        outcome: Result<Value>,
    },
    Results {
        qid: QueryId,
        generation: u64,
        outcome: Result<Value>,
    },
    PollDue {
        qid: QueryId,
        generation: u64,
        attempt: u32,
    },
}

impl Event {
    fn target(&self) -> (&QueryId, u64) {
        match self {
            Event::ResolveAcked { qid, generation, .. }
            | Event::Results { qid, generation, .. }
            | Event::PollDue { qid, generation, .. } => (qid, *generation),
        }
    }
}

/// Handle on a running resolver
#[derive(Clone)]
pub struct PlaydarClient {
    commands: mpsc::UnboundedSender<Command>,
    transport: Arc<dyn Transport>,
    settings: Arc<ResolverSettings>,
}

impl fmt::Debug for PlaydarClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaydarClient")
            .field("settings", &self.settings)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl PlaydarClient {
    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Start a client with the given settings and transport
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(settings: ResolverSettings, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::builder()
            .settings(settings)
            .transport(transport)
            .build()
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::ClientClosed)
    }

    // ========================================================================
    // Content resolution
    // ========================================================================

    /// Submit an artist/album/track (or URL) query and return its qid
    ///
    /// A qid is generated when none is given. Results are delivered to the
    /// handler bound to the qid, or to the `onResults` listener.
    pub fn resolve(
        &self,
        artist: impl Into<String>,
        album: impl Into<String>,
        track: impl Into<String>,
        qid: Option<QueryId>,
        url: Option<&str>,
    ) -> Result<QueryId> {
        let mut query = Query::new(artist, album, track);
        if let Some(qid) = qid {
            query = query.with_qid(qid);
        }
        if let Some(url) = url {
            query = query.with_url(url);
        }
        self.resolve_query(query)
    }

    /// Submit a prepared query and return its qid
    pub fn resolve_query(&self, query: Query) -> Result<QueryId> {
        let qid = query.qid().clone();
        self.send(Command::Resolve(query))?;
        Ok(qid)
    }

    /// Drop every queued and in-flight query
    ///
    /// Answers still travelling back from the daemon are ignored.
    pub fn cancel_resolve(&self) -> Result<()> {
        self.send(Command::Cancel)
    }

    /// Resume polling a known qid, outside of the concurrency ceiling
    pub fn recheck_results(&self, qid: impl Into<QueryId>) -> Result<()> {
        self.send(Command::Recheck(qid.into()))
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Bind `handler` to `qid`, or replace `onResults` when `qid` is `None`
    pub fn register_results_handler<F>(&self, handler: F, qid: Option<QueryId>) -> Result<()>
    where
        F: FnMut(&Response, bool) + Send + 'static,
    {
        self.send(Command::RegisterHandler {
            qid,
            handler: Box::new(handler),
        })
    }

    /// Replace the listener of one event
    pub fn register_listener(&self, listener: Listener) -> Result<()> {
        self.send(Command::RegisterListener(listener))
    }

    /// Receive the updates of `qid` on a channel instead of a callback
    ///
    /// The channel yields every poll response; the last one has
    /// `final_answer` set.
    pub fn results_channel(
        &self,
        qid: impl Into<QueryId>,
    ) -> Result<mpsc::UnboundedReceiver<ResultsUpdate>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register_results_handler(
            move |response: &Response, final_answer: bool| {
                let _ = tx.send(ResultsUpdate {
                    response: response.clone(),
                    final_answer,
                });
            },
            Some(qid.into()),
        )?;
        Ok(rx)
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Current resolver state
    pub async fn snapshot(&self) -> Result<ResolverSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| Error::ClientClosed)
    }

    /// Probe the daemon
    ///
    /// The `onStat` listener receives the status when a Playdar daemon
    /// answered in time, `None` otherwise.
    pub async fn stat(&self) -> Result<StatResponse> {
        let outcome = match tokio::time::timeout(
            self.settings.stat_timeout,
            self.transport.call(ApiCall::stat()),
        )
        .await
        {
            Ok(Ok(value)) => serde_json::from_value::<StatResponse>(value).map_err(Error::from),
            Ok(Err(e)) => Err(e),
            Err(elapsed) => Err(elapsed.into()),
        };

        let outcome = outcome.and_then(|stat| {
            if stat.is_playdar() {
                Ok(stat)
            } else {
                Err(Error::invalid_response(format!(
                    "not a Playdar daemon: {:?}",
                    stat.name
                )))
            }
        });

        match &outcome {
            Ok(stat) => info!(
                version = %stat.version,
                authenticated = stat.authenticated,
                "Playdar detected"
            ),
            Err(e) => warn!("Playdar not detected: {}", e),
        }

        self.send(Command::NotifyStat(outcome.as_ref().ok().cloned()))?;
        outcome
    }

    /// Stop the resolver task; pending poll timers are aborted
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Builder for [`PlaydarClient`]
#[derive(Default)]
pub struct ClientBuilder {
    settings: ResolverSettings,
    transport: Option<Arc<dyn Transport>>,
    listeners: Vec<Listener>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("settings", &self.settings)
            .field("transport", &self.transport.is_some())
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the concurrency ceiling
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.settings.max_concurrent = max_concurrent;
        self
    }

    /// Set the default poll ceiling
    pub fn max_polls(mut self, max_polls: u32) -> Self {
        self.settings.max_polls = max_polls;
        self
    }

    /// Set (or disable with `None`) the per-call deadline
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.call_timeout = timeout;
        self
    }

    /// Use a custom transport instead of the default [`HttpTransport`]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Install a listener before the resolver starts
    pub fn listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Spawn the resolver task and return its handle
    ///
    /// Fails when called outside of a Tokio runtime.
    pub fn build(self) -> Result<PlaydarClient> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::other(format!("No Tokio runtime: {}", e)))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let mut router = ResultRouter::new();
        for listener in self.listeners {
            router.register_listener(listener);
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let resolver = Resolver {
            admission: AdmissionController::new(self.settings.max_concurrent),
            polls: PollScheduler::new(self.settings.max_polls, self.settings.default_poll_interval),
            router,
            timers: HashMap::new(),
            transport: transport.clone(),
            call_timeout: self.settings.call_timeout,
            events: event_tx,
            last_qid: None,
        };

        debug!(settings = ?self.settings, "Starting Playdar resolver");
        runtime.spawn(resolver.run(command_rx, event_rx));

        Ok(PlaydarClient {
            commands: command_tx,
            transport,
            settings: Arc::new(self.settings),
        })
    }
}

// ============================================================================
// Resolver task
// ============================================================================

struct Resolver {
    admission: AdmissionController,
    polls: PollScheduler,
    router: ResultRouter,
    timers: HashMap<QueryId, JoinHandle<()>>,
    transport: Arc<dyn Transport>,
    call_timeout: Option<Duration>,
    events: mpsc::UnboundedSender<Event>,
    last_qid: Option<QueryId>,
}

impl Resolver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                // commands first: a handler registered right after `resolve`
                // must be in place before any answer is routed
                biased;
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }

        self.abort_timers();
        debug!("Playdar resolver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Resolve(query) => self.enqueue(query),
            Command::Cancel => self.cancel(),
            Command::Recheck(qid) => self.recheck(qid),
            Command::RegisterHandler {
                qid: Some(qid),
                handler,
            } => self.router.register_handler(qid, handler),
            Command::RegisterHandler { qid: None, handler } => {
                self.router.register_listener(Listener::Results(handler))
            }
            Command::RegisterListener(listener) => self.router.register_listener(listener),
            Command::NotifyStat(stat) => self.router.notify_stat(stat.as_ref()),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: Event) {
        let (qid, generation) = event.target();
        if !self.admission.is_current(qid, generation) {
            trace!(qid = %qid, generation, "Dropping event of a cancelled admission");
            return;
        }

        match event {
            Event::ResolveAcked {
                qid,
                generation,
                outcome,
            } => match outcome {
                Ok(_) => self.start_polling(&qid, generation),
                Err(e) => {
                    warn!(qid = %qid, "resolve call failed: {}", e);
                    self.finish_unanswered(&qid);
                }
            },
            Event::Results {
                qid,
                generation,
                outcome,
            } => match outcome {
                Ok(value) => {
                    let mut response = Response::from_value(&value, &qid);
                    if response.qid != qid {
                        warn!(qid = %qid, reported = %response.qid, "Daemon answered for another qid");
                        response.qid = qid;
                    }
                    self.handle_response(response, generation);
                }
                Err(e) => {
                    warn!(qid = %qid, "get_results call failed: {}", e);
                    self.finish_unanswered(&qid);
                }
            },
            Event::PollDue {
                qid,
                generation,
                attempt,
            } => {
                self.timers.remove(&qid);
                self.issue_poll(qid, generation, attempt);
            }
        }
    }

    fn enqueue(&mut self, query: Query) {
        let qid = query.qid().clone();
        if self.admission.is_in_flight(&qid) || self.admission.is_pending(&qid) {
            warn!(qid = %qid, "Query already being resolved, ignoring duplicate");
            return;
        }

        self.polls.admit(&qid);
        let dispatch = self.admission.enqueue(query);
        self.apply(dispatch);
    }

    fn apply(&mut self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Idle => {
                debug!("Resolution queue empty and nothing in flight");
                self.router.notify_idle();
            }
            Dispatch::Full => trace!("All resolution slots busy"),
            Dispatch::Admitted(admitted) => {
                for admission in admitted {
                    self.send_resolve(admission);
                }
            }
        }
    }

    fn send_resolve(&self, admission: Admission) {
        let Admission { query, generation } = admission;
        let qid = query.qid().clone();
        debug!(
            qid = %qid,
            artist = query.artist(),
            track = query.track(),
            "Resolving"
        );
        self.spawn_call(ApiCall::resolve(&query), move |outcome| Event::ResolveAcked {
            qid,
            generation,
            outcome,
        });
    }

    fn recheck(&mut self, qid: QueryId) {
        match self.admission.readmit(qid.clone()) {
            Readmission::AlreadyInFlight => {
                debug!(qid = %qid, "Recheck ignored, query already in flight")
            }
            // polling starts from the acknowledgement
            Readmission::Unsent(admission) => {
                debug!(qid = %qid, "Recheck of a queued query, resolving it now");
                self.send_resolve(admission);
            }
            Readmission::Resume { generation } => {
                debug!(qid = %qid, "Rechecking results");
                self.start_polling(&qid, generation);
            }
        }
    }

    fn start_polling(&mut self, qid: &QueryId, generation: u64) {
        self.last_qid = Some(qid.clone());
        let attempt = self.polls.begin(qid);
        self.issue_poll(qid.clone(), generation, attempt);
    }

    fn issue_poll(&self, qid: QueryId, generation: u64, attempt: u32) {
        trace!(qid = %qid, attempt, "Polling results");
        self.spawn_call(ApiCall::get_results(&qid, attempt), move |outcome| {
            Event::Results {
                qid,
                generation,
                outcome,
            }
        });
    }

    fn spawn_call<F>(&self, call: ApiCall, into_event: F)
    where
        F: FnOnce(Result<Value>) -> Event + Send + 'static,
    {
        let transport = self.transport.clone();
        let events = self.events.clone();
        let deadline = self.call_timeout;

        tokio::spawn(async move {
            let outcome = match deadline {
                Some(limit) => match tokio::time::timeout(limit, transport.call(call)).await {
                    Ok(outcome) => outcome,
                    Err(elapsed) => Err(elapsed.into()),
                },
                None => transport.call(call).await,
            };
            // the resolver may be gone already
            let _ = events.send(into_event(outcome));
        });
    }

    fn handle_response(&mut self, response: Response, generation: u64) {
        let qid = response.qid.clone();
        match self.polls.evaluate(&response) {
            PollDecision::Repoll { attempt, delay } => {
                self.schedule_poll(qid, generation, attempt, delay);
                self.router.route(&response, false);
            }
            PollDecision::Stop(reason) => {
                debug!(
                    qid = %qid,
                    ?reason,
                    results = response.results.len(),
                    "Query finished"
                );
                self.router.route(&response, true);
                self.finish(&qid);
            }
        }
    }

    fn schedule_poll(&mut self, qid: QueryId, generation: u64, attempt: u32, delay: Duration) {
        let events = self.events.clone();
        let due = qid.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::PollDue {
                qid: due,
                generation,
                attempt,
            });
        });
        if let Some(previous) = self.timers.insert(qid, timer) {
            previous.abort();
        }
    }

    /// Terminate a qid whose call failed or never answered
    fn finish_unanswered(&mut self, qid: &QueryId) {
        self.polls.terminate(qid);
        self.router.route(&Response::unsolved(qid.clone()), true);
        self.finish(qid);
    }

    fn finish(&mut self, qid: &QueryId) {
        if let Some(timer) = self.timers.remove(qid) {
            timer.abort();
        }
        self.router.forget(qid);
        if let Some(dispatch) = self.admission.complete(qid) {
            self.apply(dispatch);
        }
    }

    fn cancel(&mut self) {
        info!(
            pending = self.admission.pending_count(),
            in_flight = self.admission.in_flight_count(),
            "Cancelling resolution"
        );
        self.admission.cancel_all();
        self.polls.clear();
        self.router.clear_handlers();
        self.abort_timers();
    }

    fn abort_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }

    fn snapshot(&self) -> ResolverSnapshot {
        ResolverSnapshot {
            pending: self.admission.pending_ids(),
            in_flight: self.admission.in_flight_ids(),
            poll_counts: self.polls.counts(),
            last_qid: self.last_qid.clone(),
            scheduled_polls: self.timers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ResolverSettings::default();
        assert_eq!(settings.max_concurrent, 5);
        assert_eq!(settings.max_polls, 4);
        assert_eq!(settings.call_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.stat_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = PlaydarClient::builder().build();
        assert!(matches!(result, Err(Error::Other(_))));
    }

    #[tokio::test]
    async fn test_handle_reports_closed_after_shutdown() {
        let client = PlaydarClient::builder().build().unwrap();
        assert!(!client.is_closed());
        client.shutdown().unwrap();

        // the resolver drops its receiver once it has seen the shutdown
        while !client.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(client.cancel_resolve(), Err(Error::ClientClosed)));
        assert!(matches!(client.snapshot().await, Err(Error::ClientClosed)));
    }
}
