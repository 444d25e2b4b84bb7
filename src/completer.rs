use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use tracing::trace;

use crate::{
    engine::{Handle, ProcessId},
    error::{positive_duration, Quantity, SimError, SimResult},
    port::Port,
    request::Request,
    store::Store,
};

/// Completes requests one at a time, in order of receipt.
///
/// Each request is held for `size * extra_delay_factor` of virtual time, then completed and sent
/// on. Requests that arrive while busy wait in an unbounded FIFO queue.
pub struct RequestCompleter {
    state: Rc<CompleterState>,
    process: ProcessId,
}

struct CompleterState {
    queue: Store<Request>,
    out: RefCell<Rc<dyn Port>>,
    extra_delay_factor: Cell<f64>,
    busy: Cell<bool>,
    received: Cell<u64>,
    completed: Cell<u64>,
    hiwat: Cell<usize>,
    time_spent: Cell<f64>,
}

/// A snapshot of a [`RequestCompleter`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompleterStats {
    /// Requests put into the completer.
    pub received: u64,
    /// Requests completed and sent on.
    pub completed: u64,
    /// Largest number of requests an arrival ever found waiting ahead of it.
    pub hiwat: usize,
    /// Requests waiting, plus the one being processed.
    pub inflight: usize,
    /// Sum of the sizes of requests taken for processing.
    pub time_spent: f64,
}

impl RequestCompleter {
    /// Create a completer with an extra delay factor of 1, sending completed requests to `out`.
    pub fn new(handle: &Handle, out: Rc<dyn Port>) -> Rc<Self> {
        let state = Rc::new(CompleterState {
            queue: Store::new(),
            out: RefCell::new(out),
            extra_delay_factor: Cell::new(1.0),
            busy: Cell::new(false),
            received: Cell::new(0),
            completed: Cell::new(0),
            hiwat: Cell::new(0),
            time_spent: Cell::new(0.0),
        });

        let process = handle.spawn("completer", state.clone().run(handle.clone()));

        Rc::new(Self { state, process })
    }

    /// Create a completer that takes `factor` times as long as a request's size to process it.
    pub fn with_extra_delay_factor(
        handle: &Handle,
        out: Rc<dyn Port>,
        factor: f64,
    ) -> SimResult<Rc<Self>> {
        validate_factor(factor)?;

        let completer = Self::new(handle, out);
        completer.state.extra_delay_factor.set(factor);

        Ok(completer)
    }

    /// Change the extra delay factor for requests not yet taken for processing.
    pub fn set_extra_delay_factor(&self, factor: f64) -> SimResult<()> {
        validate_factor(factor)?;
        self.state.extra_delay_factor.set(factor);
        Ok(())
    }

    /// Multiplier applied to each request's size to get its processing time.
    pub fn extra_delay_factor(&self) -> f64 {
        self.state.extra_delay_factor.get()
    }

    /// Send completed requests to `out` instead.
    pub fn set_out(&self, out: Rc<dyn Port>) {
        *self.state.out.borrow_mut() = out;
    }

    /// The process serving the queue.
    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// Requests waiting, plus one if a request is being processed.
    pub fn inflight(&self) -> usize {
        self.state.queue.len() + usize::from(self.state.busy.get())
    }

    /// Whether a request is being processed.
    pub fn is_busy(&self) -> bool {
        self.state.busy.get()
    }

    /// Requests put into the completer.
    pub fn received(&self) -> u64 {
        self.state.received.get()
    }

    /// Largest number of requests an arrival ever found waiting ahead of it in the queue.
    pub fn hiwat(&self) -> usize {
        self.state.hiwat.get()
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> CompleterStats {
        CompleterStats {
            received: self.state.received.get(),
            completed: self.state.completed.get(),
            hiwat: self.state.hiwat.get(),
            inflight: self.inflight(),
            time_spent: self.state.time_spent.get(),
        }
    }
}

impl Port for RequestCompleter {
    fn put(&self, request: Request) {
        trace!(request.id = request.id(), request.source = request.source(), "Completer received request");

        self.state.received.set(self.state.received.get() + 1);

        let depth = self.state.queue.len();
        if depth > self.state.hiwat.get() {
            self.state.hiwat.set(depth);
        }

        self.state.queue.put(request);
    }
}

impl CompleterState {
    async fn run(self: Rc<Self>, handle: Handle) -> SimResult<()> {
        loop {
            let mut request = self.queue.get().await;
            self.busy.set(true);

            let hold = positive_duration(
                &format!(
                    "completer processing request {} from {:?}",
                    request.id(),
                    request.source()
                ),
                Quantity::ProcessingTime,
                request.size() * self.extra_delay_factor.get(),
            )?;
            self.time_spent.set(self.time_spent.get() + request.size());

            handle.sleep(hold).await;

            request.complete(handle.now())?;
            self.completed.set(self.completed.get() + 1);
            trace!(%request, "Completed request");

            let out = self.out.borrow().clone();
            out.put(request);

            self.busy.set(false);
        }
    }
}

fn validate_factor(factor: f64) -> SimResult<()> {
    if factor.is_finite() && factor > 0.0 {
        Ok(())
    } else {
        Err(SimError::config(
            "completer",
            format!("extra delay factor must be positive and finite, got {factor}"),
        ))
    }
}

impl fmt::Debug for RequestCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCompleter")
            .field("process", &self.process)
            .field("stats", &self.stats())
            .finish()
    }
}
