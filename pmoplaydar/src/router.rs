//! Delivery of poll results and resolver notifications
//!
//! Results for a qid go to the handler bound to that qid if there is one,
//! otherwise to the default `onResults` listener.

use crate::models::{QueryId, Response, StatResponse};
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

/// Receives every poll response for a query; the flag is `final_answer`
pub type ResultsHandler = Box<dyn FnMut(&Response, bool) + Send>;

/// Called when nothing is queued or in flight any more
pub type IdleHandler = Box<dyn FnMut() + Send>;

/// Called with the daemon status, `None` when no daemon answered
pub type StatHandler = Box<dyn FnMut(Option<&StatResponse>) + Send>;

/// A named listener slot
pub enum Listener {
    /// `onResults`: default destination for poll responses
    Results(ResultsHandler),
    /// `onResolveIdle`
    ResolveIdle(IdleHandler),
    /// `onStat`
    Stat(StatHandler),
}

impl Listener {
    pub fn results<F>(f: F) -> Self
    where
        F: FnMut(&Response, bool) + Send + 'static,
    {
        Listener::Results(Box::new(f))
    }

    pub fn resolve_idle<F>(f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Listener::ResolveIdle(Box::new(f))
    }

    pub fn stat<F>(f: F) -> Self
    where
        F: FnMut(Option<&StatResponse>) + Send + 'static,
    {
        Listener::Stat(Box::new(f))
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Listener::Results(_) => "onResults",
            Listener::ResolveIdle(_) => "onResolveIdle",
            Listener::Stat(_) => "onStat",
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.event_name()).finish()
    }
}

/// Routes responses to qid-bound handlers or the default listeners
pub struct ResultRouter {
    handlers: HashMap<QueryId, ResultsHandler>,
    on_results: ResultsHandler,
    on_resolve_idle: IdleHandler,
    on_stat: StatHandler,
}

impl Default for ResultRouter {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            on_results: Box::new(|response: &Response, final_answer: bool| {
                trace!(qid = %response.qid, final_answer, "Unhandled results");
            }),
            on_resolve_idle: Box::new(|| trace!("Resolver idle")),
            on_stat: Box::new(|stat: Option<&StatResponse>| {
                trace!(detected = stat.is_some(), "Unhandled stat")
            }),
        }
    }
}

impl fmt::Debug for ResultRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultRouter")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the listener for one event
    pub fn register_listener(&mut self, listener: Listener) {
        trace!(event = listener.event_name(), "Registering listener");
        match listener {
            Listener::Results(f) => self.on_results = f,
            Listener::ResolveIdle(f) => self.on_resolve_idle = f,
            Listener::Stat(f) => self.on_stat = f,
        }
    }

    /// Bind a handler to a qid, replacing any previous binding
    pub fn register_handler(&mut self, qid: QueryId, handler: ResultsHandler) {
        self.handlers.insert(qid, handler);
    }

    pub fn has_handler(&self, qid: &QueryId) -> bool {
        self.handlers.contains_key(qid)
    }

    /// Deliver a response to its handler, or to `onResults`
    pub fn route(&mut self, response: &Response, final_answer: bool) {
        match self.handlers.get_mut(&response.qid) {
            Some(handler) => handler(response, final_answer),
            None => (self.on_results)(response, final_answer),
        }
    }

    /// Drop the handler bound to a finished qid
    pub fn forget(&mut self, qid: &QueryId) {
        self.handlers.remove(qid);
    }

    pub fn clear_handlers(&mut self) {
        self.handlers.clear();
    }

    pub fn notify_idle(&mut self) {
        (self.on_resolve_idle)();
    }

    pub fn notify_stat(&mut self, stat: Option<&StatResponse>) {
        (self.on_stat)(stat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(String, String, bool)>>>;

    fn recorder(log: &Log, name: &str) -> ResultsHandler {
        let log = log.clone();
        let name = name.to_string();
        Box::new(move |response: &Response, final_answer: bool| {
            log.lock()
                .unwrap()
                .push((name.clone(), response.qid.to_string(), final_answer));
        })
    }

    #[test]
    fn test_bound_handler_wins_over_default() {
        let log: Log = Default::default();
        let mut router = ResultRouter::new();
        router.register_listener(Listener::Results(recorder(&log, "default")));
        router.register_handler("a".into(), recorder(&log, "bound"));

        router.route(&Response::unsolved("a".into()), false);
        router.route(&Response::unsolved("b".into()), true);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("bound".to_string(), "a".to_string(), false),
                ("default".to_string(), "b".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_register_handler_overwrites() {
        let log: Log = Default::default();
        let mut router = ResultRouter::new();
        router.register_handler("a".into(), recorder(&log, "first"));
        router.register_handler("a".into(), recorder(&log, "second"));
        router.route(&Response::unsolved("a".into()), true);

        assert_eq!(log.lock().unwrap()[0].0, "second");
    }

    #[test]
    fn test_forget_falls_back_to_default() {
        let log: Log = Default::default();
        let mut router = ResultRouter::new();
        router.register_listener(Listener::Results(recorder(&log, "default")));
        router.register_handler("a".into(), recorder(&log, "bound"));
        router.forget(&"a".into());
        assert!(!router.has_handler(&"a".into()));

        router.route(&Response::unsolved("a".into()), true);
        assert_eq!(log.lock().unwrap()[0].0, "default");
    }

    #[test]
    fn test_idle_and_stat_listeners() {
        let idle = Arc::new(Mutex::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut router = ResultRouter::new();

        let counter = idle.clone();
        router.register_listener(Listener::resolve_idle(move || *counter.lock().unwrap() += 1));
        let stats = seen.clone();
        router.register_listener(Listener::stat(move |stat| {
            stats.lock().unwrap().push(stat.map(|s| s.name.clone()))
        }));

        router.notify_idle();
        router.notify_stat(None);
        router.notify_stat(Some(&StatResponse {
            name: "playdar".into(),
            ..Default::default()
        }));

        assert_eq!(*idle.lock().unwrap(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("playdar".to_string())]
        );
    }
}
