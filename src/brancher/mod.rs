//! Components that split one stream of requests across several outputs.

mod least_loaded;
mod random;

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use tracing::trace;

pub use least_loaded::LeastLoadedBrancher;
pub use random::RandomBrancher;

use crate::{
    error::{SimError, SimResult},
    port::Port,
    request::Request,
};

/// The outputs of a brancher and how many requests each has been sent.
struct Outputs {
    component: &'static str,
    ports: RefCell<Vec<Rc<dyn Port>>>,
    dispatched: Vec<Cell<u64>>,
    received: Cell<u64>,
}

impl Outputs {
    fn new(component: &'static str, ports: Vec<Rc<dyn Port>>) -> SimResult<Self> {
        if ports.is_empty() {
            return Err(SimError::config(component, "at least one output is required"));
        }

        Ok(Self {
            component,
            dispatched: ports.iter().map(|_| Cell::new(0)).collect(),
            ports: RefCell::new(ports),
            received: Cell::new(0),
        })
    }

    fn len(&self) -> usize {
        self.dispatched.len()
    }

    fn receive(&self) {
        self.received.set(self.received.get() + 1);
    }

    fn send(&self, index: usize, request: Request) {
        trace!(%request, output = index, "Branching request");

        let port = self.ports.borrow()[index].clone();
        port.put(request);

        let count = &self.dispatched[index];
        count.set(count.get() + 1);
    }

    fn replace(&self, index: usize, port: Rc<dyn Port>) -> SimResult<()> {
        let mut ports = self.ports.borrow_mut();
        let len = ports.len();
        let slot = ports.get_mut(index).ok_or_else(|| {
            SimError::config(
                self.component,
                format!("output {index} does not exist, there are {len}"),
            )
        })?;
        *slot = port;
        Ok(())
    }

    fn stats(&self) -> Vec<u64> {
        self.dispatched.iter().map(Cell::get).collect()
    }
}

impl fmt::Display for Outputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output stats by port {:?}", self.stats())
    }
}
