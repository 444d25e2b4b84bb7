#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Exp};
use rpcsim::{Event, Port, Request};

/// Exponentially distributed values with the given mean, reproducible from `seed`.
pub fn exponential(mean: f64, seed: u64) -> impl FnMut() -> f64 + 'static {
    let mut rng = StdRng::seed_from_u64(seed);
    let exp = Exp::new(1.0 / mean).expect("mean should be positive");
    move || exp.sample(&mut rng)
}

/// Sits between two components, checking each request on its way through.
pub struct Tap {
    out: Rc<dyn Port>,
    /// Completion events of every request seen so far.
    completions: RefCell<Vec<Event>>,
    /// Most requests seen at once whose completion had not yet fired.
    max_outstanding: Cell<usize>,
    /// Requests seen whose completion timestamp was already set.
    already_completed: Cell<usize>,
}

impl Tap {
    pub fn new(out: Rc<dyn Port>) -> Rc<Self> {
        Rc::new(Self {
            out,
            completions: RefCell::new(Vec::new()),
            max_outstanding: Cell::new(0),
            already_completed: Cell::new(0),
        })
    }

    pub fn seen(&self) -> usize {
        self.completions.borrow().len()
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.get()
    }

    pub fn already_completed(&self) -> usize {
        self.already_completed.get()
    }
}

impl Port for Tap {
    fn put(&self, request: Request) {
        if request.completed_at().is_some() {
            self.already_completed.set(self.already_completed.get() + 1);
        }

        let outstanding = {
            let mut completions = self.completions.borrow_mut();
            completions.push(request.completion().clone());
            completions.iter().filter(|event| !event.is_fired()).count()
        };
        self.max_outstanding
            .set(self.max_outstanding.get().max(outstanding));

        self.out.put(request);
    }
}

/// Keeps every completed request it receives.
#[derive(Default)]
pub struct Collect(pub RefCell<Vec<Request>>);

impl Port for Collect {
    fn put(&self, request: Request) {
        self.0.borrow_mut().push(request);
    }
}

pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Collect `count` values by calling `f` at `every` interval of virtual time from `start`.
pub fn sample_every<T, F>(
    handle: &rpcsim::Handle,
    start: Duration,
    every: Duration,
    count: u32,
    f: F,
) -> Rc<RefCell<Vec<T>>>
where
    T: 'static,
    F: Fn() -> T + Clone + 'static,
{
    let samples = Rc::new(RefCell::new(Vec::new()));
    for n in 0..count {
        let f = f.clone();
        let samples = samples.clone();
        handle.schedule(start + every * n, move || samples.borrow_mut().push(f()));
    }
    samples
}
