use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
    time::Duration,
};

use tracing::{debug, trace};

use crate::{
    engine::{Handle, ProcessId},
    error::{positive_duration, Quantity, SimError, SimResult},
    port::Port,
    request::Request,
};

/// A zero-argument function producing successive values of a distribution, e.g. inter-arrival
/// times or request sizes. Values must be positive.
pub type Producer = Box<dyn FnMut() -> f64>;

/// Generates requests with a given inter-arrival time distribution.
///
/// Requests are numbered from 1 in the order they are generated, and tagged with the source.
pub struct RequestGenerator {
    state: Rc<GeneratorState>,
    process: ProcessId,
}

/// Configures a [`RequestGenerator`].
pub struct GeneratorBuilder {
    source: Rc<str>,
    interarrival: Producer,
    size: Producer,
    start_delay: Duration,
    horizon: Option<Duration>,
}

struct GeneratorState {
    source: Rc<str>,
    out: RefCell<Rc<dyn Port>>,
    sent: Cell<u64>,
    start_delay: Duration,
    horizon: Option<Duration>,
}

impl RequestGenerator {
    /// Configure a generator for `source`, drawing inter-arrival times from `interarrival` and
    /// request sizes from `size`.
    pub fn builder<A, S>(source: impl Into<Rc<str>>, interarrival: A, size: S) -> GeneratorBuilder
    where
        A: FnMut() -> f64 + 'static,
        S: FnMut() -> f64 + 'static,
    {
        GeneratorBuilder {
            source: source.into(),
            interarrival: Box::new(interarrival),
            size: Box::new(size),
            start_delay: Duration::ZERO,
            horizon: None,
        }
    }

    /// Tag given to every generated request.
    pub fn source(&self) -> &str {
        &self.state.source
    }

    /// Number of requests generated so far.
    pub fn sent(&self) -> u64 {
        self.state.sent.get()
    }

    /// The process driving this generator. Finishes once the horizon is reached.
    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// Delay before the first inter-arrival interval starts.
    pub fn start_delay(&self) -> Duration {
        self.state.start_delay
    }

    /// Time after which no more requests are generated.
    pub fn horizon(&self) -> Option<Duration> {
        self.state.horizon
    }

    /// Send future requests to `out` instead.
    pub fn set_out(&self, out: Rc<dyn Port>) {
        *self.state.out.borrow_mut() = out;
    }
}

impl GeneratorBuilder {
    /// Start generating after an initial delay. Default is zero.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Stop generating once this time has been reached. Default is never.
    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Create the generator and start its process, sending requests to `out`.
    pub fn build(self, handle: &Handle, out: Rc<dyn Port>) -> SimResult<RequestGenerator> {
        let name = component_name(&self.source);

        if let Some(horizon) = self.horizon {
            if horizon < self.start_delay {
                return Err(SimError::config(
                    name,
                    format!(
                        "horizon {:?} is before the start delay {:?}",
                        horizon, self.start_delay
                    ),
                ));
            }
        }

        let state = Rc::new(GeneratorState {
            source: self.source,
            out: RefCell::new(out),
            sent: Cell::new(0),
            start_delay: self.start_delay,
            horizon: self.horizon,
        });

        let process = handle.spawn(
            name,
            state
                .clone()
                .run(handle.clone(), self.interarrival, self.size),
        );

        Ok(RequestGenerator { state, process })
    }
}

impl GeneratorState {
    async fn run(
        self: Rc<Self>,
        handle: Handle,
        mut interarrival: Producer,
        mut size: Producer,
    ) -> SimResult<()> {
        let name = component_name(&self.source);

        handle.sleep(self.start_delay).await;

        loop {
            let gap = positive_duration(&name, Quantity::InterArrival, interarrival())?;
            handle.sleep(gap).await;

            let now = handle.now();
            if self.horizon.is_some_and(|horizon| now >= horizon) {
                debug!(source = %self.source, sent = self.sent.get(), "Generator reached its horizon");
                return Ok(());
            }

            let size = size();
            positive_duration(&name, Quantity::Size, size)?;

            let id = self.sent.get() + 1;
            self.sent.set(id);

            let request = Request::new(id, self.source.clone(), size, now);
            trace!(%request, "Generated request");

            let out = self.out.borrow().clone();
            out.put(request);
        }
    }
}

fn component_name(source: &str) -> String {
    format!("generator {source:?}")
}

impl fmt::Debug for RequestGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGenerator")
            .field("source", &self.state.source)
            .field("sent", &self.state.sent.get())
            .field("start_delay", &self.state.start_delay)
            .field("horizon", &self.state.horizon)
            .finish()
    }
}
