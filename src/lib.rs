//! Simulate networks of RPC services under different load-balancing policies.
//!
//! Requests are produced by generators, pass through branchers and forwarders, are served by
//! completers and end up in sinks. Everything runs in virtual time on a deterministic,
//! single-threaded [`Engine`]: given the same random draws, a run always unfolds the same way.
//!
//! Components are wired together through the [`Port`] trait. Feedback flows back upstream only
//! through completion callbacks and the completion [`Event`] carried on each [`Request`]. This is
//! how a [`LeastLoadedBrancher`] learns that a request it routed has finished, and how a
//! [`SynchronousForwarder`] knows when to let the next one through.
//!
//! See the README for an example.

#![deny(missing_docs)]

#[cfg(doctest)]
use doc_comment::doctest;
#[cfg(doctest)]
doctest!("../README.md");

mod brancher;
mod completer;
mod engine;
pub mod error;
mod event;
mod forwarder;
mod generator;
mod port;
mod request;
mod sink;
mod store;

pub use brancher::{LeastLoadedBrancher, RandomBrancher};
pub use completer::{CompleterStats, RequestCompleter};
pub use engine::{Engine, Handle, ProcessId, ProcessState, Sleep};
pub use error::{CallbackError, SimError, SimResult};
pub use event::{Event, Wait};
pub use forwarder::SynchronousForwarder;
pub use generator::{GeneratorBuilder, Producer, RequestGenerator};
pub use port::Port;
pub use request::{CompletionCallback, Request};
pub use sink::{RequestSink, Selector, SinkBuilder, SinkStats};
