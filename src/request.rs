use std::{
    fmt::{self, Display},
    mem,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    time::Duration,
};

use tracing::warn;

use crate::{
    error::{CallbackError, SimError, SimResult},
    event::Event,
};

/// Called when a request is completed, with the completed request.
pub type CompletionCallback = Box<dyn FnOnce(&Request) -> Result<(), CallbackError>>;

/// An inbound RPC request flowing through a topology until it is completed.
///
/// The size is the cost of completing the request, and doubles as its processing time.
pub struct Request {
    id: u64,
    source: Rc<str>,
    size: f64,
    arrived_at: Duration,
    completed_at: Option<Duration>,
    callbacks: Vec<CompletionCallback>,
    completion: Event,
}

impl Request {
    /// Create a request that arrived at `arrived_at`, with a fresh completion event.
    pub fn new(id: u64, source: impl Into<Rc<str>>, size: f64, arrived_at: Duration) -> Self {
        Self {
            id,
            source: source.into(),
            size,
            arrived_at,
            completed_at: None,
            callbacks: Vec::new(),
            completion: Event::new(),
        }
    }

    /// Sequence id, unique within the source.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Tag of the generator that created the request.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Cost of the request.
    pub fn size(&self) -> f64 {
        self.size
    }

    /// When the request was generated.
    pub fn arrived_at(&self) -> Duration {
        self.arrived_at
    }

    /// When the request was completed, if it has been.
    pub fn completed_at(&self) -> Option<Duration> {
        self.completed_at
    }

    /// Fired once the request is completed.
    pub fn completion(&self) -> &Event {
        &self.completion
    }

    /// Register a callback to run when the request is completed. Callbacks run in the order they
    /// were registered.
    pub fn on_completion<F>(&mut self, callback: F)
    where
        F: FnOnce(&Request) -> Result<(), CallbackError> + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Mark the request completed at `at`, run its callbacks and fire its completion event.
    ///
    /// A failing or panicking callback is logged and does not stop the others from running.
    pub fn complete(&mut self, at: Duration) -> SimResult<()> {
        if let Some(completed_at) = self.completed_at {
            return Err(SimError::AlreadyCompleted {
                request: self.id,
                src: self.source.to_string(),
                completed_at,
            });
        }
        if at < self.arrived_at {
            return Err(SimError::CompletedBeforeArrival {
                request: self.id,
                src: self.source.to_string(),
                arrived_at: self.arrived_at,
                completed_at: at,
            });
        }

        self.completed_at = Some(at);

        for (index, callback) in mem::take(&mut self.callbacks).into_iter().enumerate() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(self)))
                .unwrap_or_else(|payload| Err(CallbackError::Panic(panic_message(payload))));

            if let Err(err) = result {
                warn!(
                    request.id = self.id,
                    request.source = %self.source,
                    callback = index,
                    error = %err,
                    "Completion callback failed"
                );
            }
        }

        self.completion.fire();

        Ok(())
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id: {}, size: {}, time: {:?}, src: {} completed: {:?}",
            self.id, self.size, self.arrived_at, self.source, self.completed_at
        )
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("size", &self.size)
            .field("arrived_at", &self.arrived_at)
            .field("completed_at", &self.completed_at)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
