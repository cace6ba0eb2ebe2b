//! Playdar client library for PMOMusic
//!
//! This crate talks to a [Playdar](http://www.playdar.org) content resolution
//! daemon: it submits artist/album/track queries, polls the daemon for
//! playable sources and hands every partial and final answer to the caller.
//!
//! # Features
//!
//! - **Admission control**: at most `max_concurrent` queries in flight, the
//!   rest wait in a FIFO queue
//! - **Daemon-driven polling**: the daemon's `poll_interval` / `poll_limit`
//!   decide when to poll again and when an answer is final
//! - **Result routing**: per-query handlers, a default `onResults` listener,
//!   `onResolveIdle` when everything is resolved
//! - **Recheck and cancellation**
//! - **Boffin**: tag cloud and tag queries
//! - **Audioscrobbler**: now-playing and playback state reports
//! - **Configuration extension** for `pmoconfig`
//!
//! # Example
//!
//! ```no_run
//! use pmoplaydar::{Listener, PlaydarClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PlaydarClient::builder()
//!         .listener(Listener::resolve_idle(|| println!("all done")))
//!         .build()?;
//!
//!     let stat = client.stat().await?;
//!     println!("Playdar {} on {:?}", stat.version, stat.hostname);
//!
//!     let qid = client.resolve("Portishead", "Dummy", "Roads", None, None)?;
//!     client.register_results_handler(
//!         |response, final_answer| {
//!             if let Some(best) = response.best_result() {
//!                 println!("{:?} (score {:?}, final: {})", best.sid, best.score, final_answer);
//!             }
//!         },
//!         Some(qid),
//!     )?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The admission controller, the poll scheduler and the result router are
//! plain synchronous state machines ([`admission`], [`polling`], [`router`]).
//! [`PlaydarClient`] owns them inside one Tokio task and drives them from
//! commands and transport completions; the network is behind the
//! [`Transport`] trait so the resolver can run against a scripted daemon.

pub mod admission;
mod boffin;
pub mod client;
pub mod config_ext;
pub mod error;
pub mod models;
pub mod polling;
pub mod router;
mod scrobbler;
pub mod transport;

pub use admission::{Admission, AdmissionController, Dispatch, Readmission};
pub use client::{
    ClientBuilder, PlaydarClient, ResolverSettings, ResolverSnapshot, ResultsUpdate,
};
pub use config_ext::PlaydarConfigExt;
pub use error::{Error, Result};
pub use models::{Query, QueryId, Response, ResultRecord, StatResponse};
pub use polling::{PollDecision, PollPhase, PollScheduler, StopReason};
pub use router::{Listener, ResultRouter, ResultsHandler};
pub use scrobbler::ScrobbleTrack;
pub use transport::{ApiCall, Endpoint, HttpTransport, HttpTransportBuilder, Transport};
