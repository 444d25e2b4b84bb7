//! Errors that stop a simulation run, and errors contained within one.

use std::{fmt::Display, time::Duration};

use thiserror::Error;
use tokio::sync::AcquireError;

/// An error that stops a simulation run.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SimError {
    /// A component was constructed with parameters it cannot work with.
    ///
    /// Unrecoverable.
    #[error("Invalid configuration for {component}: {reason}")]
    Configuration {
        /// Which component rejected the configuration.
        component: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A producer function returned a value that is not a positive, finite number.
    ///
    /// Unrecoverable. Values are never clamped.
    #[error("{component} drew an invalid {quantity}: {value}")]
    Distribution {
        /// The component that drew the value.
        component: String,
        /// What the value was meant to be.
        quantity: Quantity,
        /// The offending value.
        value: f64,
    },

    /// A request was completed a second time.
    #[error("Request {request} from {src} was already completed at {completed_at:?}")]
    AlreadyCompleted {
        /// Sequence id of the request.
        request: u64,
        /// Source tag of the request.
        src: String,
        /// When it was first completed.
        completed_at: Duration,
    },

    /// A request was completed at a time before it arrived.
    #[error("Request {request} from {src} completed at {completed_at:?}, before it arrived at {arrived_at:?}")]
    CompletedBeforeArrival {
        /// Sequence id of the request.
        request: u64,
        /// Source tag of the request.
        src: String,
        /// When it arrived.
        arrived_at: Duration,
        /// The rejected completion time.
        completed_at: Duration,
    },

    /// A forwarder slot could not be acquired because the slot pool was closed.
    ///
    /// Forwarders never close their slots, so a run does not currently fail this way.
    #[error("Unable to acquire a forwarding slot: slots closed")]
    SlotUnavailable,
}

/// The kind of value drawn from a producer function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Quantity {
    /// Time between two consecutive requests.
    InterArrival,
    /// Cost of a request, which is also its processing time.
    Size,
    /// Processing time derived from a size and a delay factor.
    ProcessingTime,
}

/// A completion callback failed.
///
/// Contained: logged, and the remaining callbacks still run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CallbackError {
    /// A least-loaded brancher was told about more completions than it routed to an output.
    #[error("inflight count for output {output} is already zero")]
    InflightUnderflow {
        /// Index of the output.
        output: usize,
    },

    /// The callback panicked.
    #[error("callback panicked: {0}")]
    Panic(String),

    /// Any other failure reported by a callback.
    #[error("{0}")]
    Other(String),
}

/// Result of a fallible simulation operation.
pub type SimResult<T> = std::result::Result<T, SimError>;

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Quantity::InterArrival => "inter-arrival interval",
            Quantity::Size => "request size",
            Quantity::ProcessingTime => "processing time",
        })
    }
}

impl From<AcquireError> for SimError {
    fn from(_err: AcquireError) -> Self {
        SimError::SlotUnavailable
    }
}

impl SimError {
    pub(crate) fn config(component: impl Into<String>, reason: impl Into<String>) -> Self {
        SimError::Configuration {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Check a drawn value is usable as a duration in virtual time units.
pub(crate) fn positive_duration(
    component: &str,
    quantity: Quantity,
    value: f64,
) -> SimResult<Duration> {
    let invalid = || SimError::Distribution {
        component: component.to_string(),
        quantity,
        value,
    };

    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).map_err(|_| invalid())
    } else {
        Err(invalid())
    }
}
