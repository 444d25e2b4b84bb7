use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
    time::Duration,
};

use tracing::debug;

use crate::{engine::Handle, port::Port, request::Request};

/// Decides whether a [`RequestSink`] records a request.
pub type Selector = Box<dyn Fn(&Request) -> bool>;

/// The end of a pipeline. Records statistics about the requests it receives and drops them.
pub struct RequestSink {
    handle: Handle,
    config: SinkConfig,
    stats: RefCell<SinkStats>,
    last_arrival: Cell<Duration>,
}

/// Configures a [`RequestSink`].
#[derive(Default)]
pub struct SinkBuilder {
    config: SinkConfig,
}

struct SinkConfig {
    record_waits: bool,
    record_arrivals: bool,
    absolute_arrivals: bool,
    selector: Option<Selector>,
    debug: bool,
}

/// What a [`RequestSink`] has recorded so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkStats {
    /// Requests that matched the selector.
    pub received: u64,
    /// Sum of the sizes of matching requests.
    pub bytes: f64,
    /// Time from each matching request's original arrival until it reached the sink.
    pub waits: Vec<Duration>,
    /// Either the time each matching request reached the sink, or the gap since the previous one.
    pub arrivals: Vec<Duration>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            record_waits: true,
            record_arrivals: false,
            absolute_arrivals: false,
            selector: None,
            debug: false,
        }
    }
}

impl RequestSink {
    /// Configure a sink.
    pub fn builder() -> SinkBuilder {
        SinkBuilder::default()
    }

    /// A sink recording every request's wait, and nothing else.
    pub fn new(handle: &Handle) -> Rc<Self> {
        Self::builder().build(handle)
    }

    /// Requests that matched the selector.
    pub fn received(&self) -> u64 {
        self.stats.borrow().received
    }

    /// Sum of the sizes of matching requests.
    pub fn bytes(&self) -> f64 {
        self.stats.borrow().bytes
    }

    /// Recorded waits, in order of arrival at the sink.
    pub fn waits(&self) -> Vec<Duration> {
        self.stats.borrow().waits.clone()
    }

    /// Recorded arrival times or gaps.
    pub fn arrivals(&self) -> Vec<Duration> {
        self.stats.borrow().arrivals.clone()
    }

    /// When the last recorded arrival reached the sink. Zero until one has.
    pub fn last_arrival(&self) -> Duration {
        self.last_arrival.get()
    }

    /// Snapshot of everything recorded.
    pub fn stats(&self) -> SinkStats {
        self.stats.borrow().clone()
    }

    fn accepts(&self, request: &Request) -> bool {
        self.config
            .selector
            .as_ref()
            .map_or(true, |selector| selector(request))
    }
}

impl Port for RequestSink {
    fn put(&self, request: Request) {
        if !self.accepts(&request) {
            return;
        }

        let now = self.handle.now();
        let mut stats = self.stats.borrow_mut();

        if self.config.record_waits {
            stats.waits.push(now.saturating_sub(request.arrived_at()));
        }

        if self.config.record_arrivals {
            let arrival = if self.config.absolute_arrivals {
                now
            } else {
                now - self.last_arrival.get()
            };
            stats.arrivals.push(arrival);
            self.last_arrival.set(now);
        }

        stats.received += 1;
        stats.bytes += request.size();

        if self.config.debug {
            debug!(%request, "Sink received request");
        }
    }
}

impl SinkBuilder {
    /// Record how long each request took to reach the sink. Default is on.
    pub fn record_waits(mut self, record: bool) -> Self {
        self.config.record_waits = record;
        self
    }

    /// Record when each request reached the sink. Default is off.
    pub fn record_arrivals(mut self, record: bool) -> Self {
        self.config.record_arrivals = record;
        self
    }

    /// Record arrivals as absolute times, rather than as gaps since the previous arrival. Default
    /// is gaps.
    pub fn absolute_arrivals(mut self, absolute: bool) -> Self {
        self.config.absolute_arrivals = absolute;
        self
    }

    /// Only record requests this accepts. Others are dropped without a trace.
    pub fn selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&Request) -> bool + 'static,
    {
        self.config.selector = Some(Box::new(selector));
        self
    }

    /// Log every recorded request at DEBUG level.
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Create the sink.
    pub fn build(self, handle: &Handle) -> Rc<RequestSink> {
        Rc::new(RequestSink {
            handle: handle.clone(),
            config: self.config,
            stats: RefCell::new(SinkStats::default()),
            last_arrival: Cell::new(Duration::ZERO),
        })
    }
}

impl fmt::Debug for RequestSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats.borrow();
        f.debug_struct("RequestSink")
            .field("received", &stats.received)
            .field("bytes", &stats.bytes)
            .field("selective", &self.config.selector.is_some())
            .finish()
    }
}
