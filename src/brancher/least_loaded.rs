use std::{cell::Cell, fmt, rc::Rc};

use super::Outputs;
use crate::{
    error::{CallbackError, SimResult},
    port::Port,
    request::Request,
};

/// Sends each request to the output with the fewest requests in flight.
///
/// Ties go to the lowest index. The brancher learns a request is no longer in flight through a
/// completion callback it attaches before forwarding, so it works whatever completes the request.
pub struct LeastLoadedBrancher {
    outputs: Outputs,
    inflight: Rc<[Cell<usize>]>,
}

impl LeastLoadedBrancher {
    /// Create a brancher over `outputs`, with nothing in flight.
    pub fn new(outputs: Vec<Rc<dyn Port>>) -> SimResult<Rc<Self>> {
        let outputs = Outputs::new("least-loaded brancher", outputs)?;
        let inflight = (0..outputs.len()).map(|_| Cell::new(0)).collect();

        Ok(Rc::new(Self { outputs, inflight }))
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

    /// Requests sent to each output and not yet completed, by index.
    pub fn inflight(&self) -> Vec<usize> {
        self.inflight.iter().map(Cell::get).collect()
    }

    /// Replace the output at `index`.
    pub fn set_output(&self, index: usize, out: Rc<dyn Port>) -> SimResult<()> {
        self.outputs.replace(index, out)
    }

    fn least_loaded(&self) -> usize {
        self.inflight
            .iter()
            .enumerate()
            .min_by_key(|(index, count)| (count.get(), *index))
            .map(|(index, _)| index)
            .unwrap_or_default()
    }
}

impl Port for LeastLoadedBrancher {
    fn put(&self, mut request: Request) {
        self.outputs.receive();

        let index = self.least_loaded();
        let counter = &self.inflight[index];
        counter.set(counter.get() + 1);

        let inflight = self.inflight.clone();
        request.on_completion(move |_| {
            let counter = &inflight[index];
            let count = counter
                .get()
                .checked_sub(1)
                .ok_or(CallbackError::InflightUnderflow { output: index })?;
            counter.set(count);
            Ok(())
        });

        self.outputs.send(index, request);
    }
}

impl fmt::Display for LeastLoadedBrancher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.outputs, f)
    }
}

impl fmt::Debug for LeastLoadedBrancher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeastLoadedBrancher")
            .field("received", &self.received())
            .field("inflight", &self.inflight())
            .field("stats", &self.stats())
            .finish()
    }
}
