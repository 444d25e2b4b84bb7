use std::{cell::RefCell, fmt, rc::Rc};

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::Outputs;
use crate::{error::SimResult, port::Port, request::Request};

/// Sends each request to an output chosen uniformly at random, regardless of load.
pub struct RandomBrancher {
    outputs: Outputs,
    rng: RefCell<StdRng>,
}

impl RandomBrancher {
    /// Create a brancher over `outputs`, seeded from the operating system.
    pub fn new(outputs: Vec<Rc<dyn Port>>) -> SimResult<Rc<Self>> {
        Self::with_rng(outputs, StdRng::from_os_rng())
    }

    /// Create a brancher over `outputs` whose choices are reproducible from `seed`.
    pub fn with_seed(outputs: Vec<Rc<dyn Port>>, seed: u64) -> SimResult<Rc<Self>> {
        Self::with_rng(outputs, StdRng::seed_from_u64(seed))
    }

    fn with_rng(outputs: Vec<Rc<dyn Port>>, rng: StdRng) -> SimResult<Rc<Self>> {
        Ok(Rc::new(Self {
            outputs: Outputs::new("random brancher", outputs)?,
            rng: RefCell::new(rng),
        }))
    }

    /// Number of outputs.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Requests put into the brancher.
    pub fn received(&self) -> u64 {
        self.outputs.received.get()
    }

    /// How many requests each output has been sent, by index.
    pub fn stats(&self) -> Vec<u64> {
        self.outputs.stats()
    }

    /// Replace the output at `index`.
    pub fn set_output(&self, index: usize, out: Rc<dyn Port>) -> SimResult<()> {
        self.outputs.replace(index, out)
    }
}

impl Port for RandomBrancher {
    fn put(&self, request: Request) {
        self.outputs.receive();
        let index = self.rng.borrow_mut().random_range(0..self.outputs.len());
        self.outputs.send(index, request);
    }
}

impl fmt::Display for RandomBrancher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.outputs, f)
    }
}

impl fmt::Debug for RandomBrancher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomBrancher")
            .field("received", &self.received())
            .field("stats", &self.stats())
            .finish()
    }
}
