use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
    sync::Arc,
};

use tokio::sync::Semaphore;
use tracing::trace;

use crate::{
    engine::Handle,
    error::{SimError, SimResult},
    port::Port,
    request::Request,
};

/// Forwards requests downstream, allowing at most `capacity` of them to be in flight at once.
///
/// A request is in flight from the moment it is forwarded until its completion event fires.
/// Requests beyond capacity wait for a slot in order of receipt. `put` itself never blocks: each
/// request is carried through the gate by its own process.
pub struct SynchronousForwarder {
    state: Rc<ForwarderState>,
}

struct ForwarderState {
    handle: Handle,
    slots: Arc<Semaphore>,
    capacity: usize,
    out: RefCell<Rc<dyn Port>>,
    received: Cell<u64>,
    forwarded: Cell<u64>,
    in_flight: Cell<usize>,
    max_in_flight: Cell<usize>,
}

impl SynchronousForwarder {
    /// Create a forwarder with `capacity` slots, sending requests to `out`.
    pub fn new(handle: &Handle, capacity: usize, out: Rc<dyn Port>) -> SimResult<Rc<Self>> {
        if capacity == 0 {
            return Err(SimError::config("forwarder", "capacity must be at least 1"));
        }

        Ok(Rc::new(Self {
            state: Rc::new(ForwarderState {
                handle: handle.clone(),
                slots: Arc::new(Semaphore::new(capacity)),
                capacity,
                out: RefCell::new(out),
                received: Cell::new(0),
                forwarded: Cell::new(0),
                in_flight: Cell::new(0),
                max_in_flight: Cell::new(0),
            }),
        }))
    }

    /// Send future requests to `out` instead.
    pub fn set_out(&self, out: Rc<dyn Port>) {
        *self.state.out.borrow_mut() = out;
    }

    /// Maximum requests in flight.
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Requests put into the forwarder.
    pub fn received(&self) -> u64 {
        self.state.received.get()
    }

    /// Requests that have been let through the gate.
    pub fn forwarded(&self) -> u64 {
        self.state.forwarded.get()
    }

    /// Requests received but still waiting for a slot.
    pub fn waiting(&self) -> u64 {
        self.state.received.get() - self.state.forwarded.get()
    }

    /// Requests forwarded and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.get()
    }

    /// The most requests ever in flight at once. Never more than the capacity.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.get()
    }
}

impl Port for SynchronousForwarder {
    fn put(&self, request: Request) {
        self.state.received.set(self.state.received.get() + 1);
        trace!(%request, "Forwarder received request");

        let name = format!("forward {} from {:?}", request.id(), request.source());
        self.state
            .handle
            .spawn(name, self.state.clone().forward(request));
    }
}

impl ForwarderState {
    async fn forward(self: Rc<Self>, request: Request) -> SimResult<()> {
        let permit = self.slots.clone().acquire_owned().await?;

        let in_flight = self.in_flight.get() + 1;
        self.in_flight.set(in_flight);
        self.max_in_flight.set(self.max_in_flight.get().max(in_flight));
        self.forwarded.set(self.forwarded.get() + 1);

        let completion = request.completion().clone();
        trace!(%request, in_flight, "Forwarding request");

        let out = self.out.borrow().clone();
        out.put(request);

        completion.wait().await;

        self.in_flight.set(self.in_flight.get() - 1);
        drop(permit);

        Ok(())
    }
}

impl fmt::Debug for SynchronousForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronousForwarder")
            .field("capacity", &self.state.capacity)
            .field("received", &self.state.received.get())
            .field("in_flight", &self.state.in_flight.get())
            .field("max_in_flight", &self.state.max_in_flight.get())
            .finish()
    }
}
