//! Virtual clock and cooperative process scheduler.
//!
//! Processes are futures polled by the [`Engine`] on a single thread. They only suspend at
//! explicit points: [`Handle::sleep`], [`Event::wait`](crate::Event::wait), or another future
//! whose waker was handed out by the engine. Every resumption goes through one timeline ordered
//! by `(time, insertion sequence)`, so runs are reproducible given the same draws.

use std::{
    cell::{Cell, RefCell},
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
    fmt,
    future::Future,
    mem,
    pin::Pin,
    rc::Rc,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll, Wake, Waker},
    time::Duration,
};

use futures::future::{FutureExt, LocalBoxFuture};
use tracing::{debug, span, trace, Instrument, Level};

use crate::error::SimResult;

/// Identifies a process spawned on an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a process is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Waiting on the timeline, an event or a queue.
    Suspended,
    /// Currently being polled.
    Running,
    /// Returned, successfully or not.
    Finished,
}

enum Resume {
    /// Poll this process.
    Process(ProcessId),
    /// A sleep deadline was reached. The waker is in `Timeline::timers` under the entry's
    /// sequence number.
    Timer,
    /// Run the continuation stored under the entry's sequence number.
    Callback,
}

struct Entry {
    time: Duration,
    sequence: u64,
    resume: Resume,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // FIFO for entries at the same instant.
        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Timeline {
    now: Duration,
    sequence: u64,
    entries: BinaryHeap<Reverse<Entry>>,
    /// Sleeps whose deadline has not been reached, with the waker of the process awaiting each.
    timers: HashMap<u64, Option<Waker>>,
    /// Set while a timer wakes its process, so the process resumes in the timer's place.
    inherited: Option<u64>,
}

impl Timeline {
    fn push(&mut self, time: Duration, resume: Resume) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        self.push_at(time, sequence, resume);
        sequence
    }

    fn push_at(&mut self, time: Duration, sequence: u64, resume: Resume) {
        self.entries.push(Reverse(Entry {
            time,
            sequence,
            resume,
        }));
    }

    /// Take the earliest entry, unless it is due at or after `until`.
    fn pop_before(&mut self, until: Option<Duration>) -> Option<Entry> {
        let next = self.entries.peek()?;
        if until.is_some_and(|until| next.0.time >= until) {
            return None;
        }

        let Reverse(entry) = self.entries.pop()?;
        self.now = self.now.max(entry.time);
        Some(entry)
    }
}

/// Wakers must be `Send + Sync`, so the timeline they push into sits behind a mutex even though
/// the engine only ever runs on one thread.
type SharedTimeline = Arc<Mutex<Timeline>>;

fn lock(timeline: &SharedTimeline) -> MutexGuard<'_, Timeline> {
    timeline
        .lock()
        .expect("should not panic while holding the timeline lock")
}

struct ProcessWaker {
    process: ProcessId,
    timeline: SharedTimeline,
}

impl Wake for ProcessWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let mut timeline = lock(&self.timeline);
        let now = timeline.now;
        match timeline.inherited.take() {
            Some(sequence) => timeline.push_at(now, sequence, Resume::Process(self.process)),
            None => {
                timeline.push(now, Resume::Process(self.process));
            }
        }
    }
}

struct Process {
    name: String,
    future: LocalBoxFuture<'static, SimResult<()>>,
}

struct Core {
    timeline: SharedTimeline,
    processes: RefCell<HashMap<ProcessId, Process>>,
    callbacks: RefCell<HashMap<u64, Box<dyn FnOnce()>>>,
    next_process: Cell<u64>,
    running: Cell<Option<ProcessId>>,
}

/// Owns virtual time and every process in a simulation.
///
/// Dropping the engine drops all processes that are still suspended, along with any requests
/// they hold.
pub struct Engine {
    handle: Handle,
}

/// A cheap, cloneable reference to an [`Engine`], given to components so they can read the clock,
/// sleep and spawn processes.
#[derive(Clone)]
pub struct Handle {
    core: Rc<Core>,
}

impl Engine {
    /// Create an engine with the clock at zero and nothing scheduled.
    pub fn new() -> Self {
        Self {
            handle: Handle {
                core: Rc::new(Core {
                    timeline: SharedTimeline::default(),
                    processes: RefCell::new(HashMap::new()),
                    callbacks: RefCell::new(HashMap::new()),
                    next_process: Cell::new(0),
                    running: Cell::new(None),
                }),
            },
        }
    }

    /// Get a handle for constructing components.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// The current virtual time.
    pub fn now(&self) -> Duration {
        self.handle.now()
    }

    /// The number of processes that have not finished.
    pub fn pending(&self) -> usize {
        self.handle.core.processes.borrow().len()
    }

    /// Run the simulation until nothing is left on the timeline, or the next entry is due at or
    /// after `until`. The clock then reads `until`.
    ///
    /// Can be called again with a later horizon to continue the same simulation. Processes still
    /// suspended when this returns are not an error: requests they hold are simply never
    /// completed.
    ///
    /// Stops at the first process that returns an error, and returns that error.
    pub fn run(&self, until: Duration) -> SimResult<()> {
        self.drive(Some(until))?;

        let mut timeline = lock(&self.handle.core.timeline);
        timeline.now = timeline.now.max(until);
        debug!(now = ?timeline.now, pending = self.pending(), "Simulation run reached its horizon");

        Ok(())
    }

    /// Run the simulation until nothing is left on the timeline.
    ///
    /// Processes waiting on something that can no longer happen (e.g. an empty queue) stay
    /// suspended.
    pub fn run_until_idle(&self) -> SimResult<()> {
        self.drive(None)?;

        debug!(now = ?self.now(), pending = self.pending(), "Simulation run went idle");

        Ok(())
    }

    fn drive(&self, until: Option<Duration>) -> SimResult<()> {
        loop {
            let entry = lock(&self.handle.core.timeline).pop_before(until);
            let Some(entry) = entry else {
                return Ok(());
            };

            match entry.resume {
                Resume::Process(id) => self.handle.poll_process(id)?,
                Resume::Timer => self.handle.fire_timer(entry.sequence),
                Resume::Callback => {
                    let callback = self.handle.core.callbacks.borrow_mut().remove(&entry.sequence);
                    if let Some(callback) = callback {
                        callback();
                    }
                }
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Components hold handles and processes hold components, so the cycle is broken here.
        let processes = mem::take(&mut *self.handle.core.processes.borrow_mut());
        drop(processes);

        let callbacks = mem::take(&mut *self.handle.core.callbacks.borrow_mut());
        drop(callbacks);

        let (entries, timers) = {
            let mut timeline = lock(&self.handle.core.timeline);
            (
                mem::take(&mut timeline.entries),
                mem::take(&mut timeline.timers),
            )
        };
        drop(entries);
        drop(timers);
    }
}

impl Handle {
    /// The current virtual time.
    pub fn now(&self) -> Duration {
        lock(&self.core.timeline).now
    }

    /// Start a new process. It is first polled at the current instant, after anything already
    /// scheduled for this instant.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> ProcessId
    where
        F: Future<Output = SimResult<()>> + 'static,
    {
        let id = ProcessId(self.core.next_process.get());
        self.core.next_process.set(id.0 + 1);

        let name = name.into();
        let span = span!(Level::DEBUG, "process", process.name = %name, process.id = id.0);

        trace!(process.name = %name, process.id = id.0, "Spawning process");

        self.core.processes.borrow_mut().insert(
            id,
            Process {
                name,
                future: future.instrument(span).boxed_local(),
            },
        );

        let mut timeline = lock(&self.core.timeline);
        let now = timeline.now;
        timeline.push(now, Resume::Process(id));

        id
    }

    /// Run `continuation` after `delay` of virtual time.
    ///
    /// Its place on the timeline is taken now, so it runs before anything scheduled later for the
    /// same instant.
    pub fn schedule<F>(&self, delay: Duration, continuation: F)
    where
        F: FnOnce() + 'static,
    {
        let mut timeline = lock(&self.core.timeline);
        let at = timeline.now + delay;
        let sequence = timeline.push(at, Resume::Callback);
        self.core
            .callbacks
            .borrow_mut()
            .insert(sequence, Box::new(continuation));
    }

    /// Suspend the current process for `duration` of virtual time.
    ///
    /// The sleep takes its place on the timeline when it is created, not when first awaited. A
    /// zero duration still yields, resuming after everything already scheduled for now.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        let mut timeline = lock(&self.core.timeline);
        let deadline = timeline.now + duration;
        let sequence = timeline.push(deadline, Resume::Timer);
        timeline.timers.insert(sequence, None);

        Sleep {
            timeline: self.core.timeline.clone(),
            deadline,
            sequence,
        }
    }

    /// Where the given process is in its lifecycle.
    pub fn state(&self, id: ProcessId) -> ProcessState {
        if self.core.running.get() == Some(id) {
            ProcessState::Running
        } else if self.core.processes.borrow().contains_key(&id) {
            ProcessState::Suspended
        } else {
            ProcessState::Finished
        }
    }

    /// Wake the process awaiting a sleep, letting it resume in the sleep's place on the timeline.
    fn fire_timer(&self, sequence: u64) {
        let waker = {
            let mut timeline = lock(&self.core.timeline);
            let waker = timeline.timers.remove(&sequence).flatten();
            if waker.is_some() {
                timeline.inherited = Some(sequence);
            }
            waker
        };

        if let Some(waker) = waker {
            waker.wake();
            // Not every waker comes from this engine.
            lock(&self.core.timeline).inherited = None;
        }
    }

    fn poll_process(&self, id: ProcessId) -> SimResult<()> {
        let process = self.core.processes.borrow_mut().remove(&id);
        let Some(mut process) = process else {
            // Woken more than once, and already finished.
            return Ok(());
        };

        let waker = Waker::from(Arc::new(ProcessWaker {
            process: id,
            timeline: self.core.timeline.clone(),
        }));
        let mut cx = Context::from_waker(&waker);

        self.core.running.set(Some(id));
        let poll = process.future.as_mut().poll(&mut cx);
        self.core.running.set(None);

        match poll {
            Poll::Pending => {
                self.core.processes.borrow_mut().insert(id, process);
                Ok(())
            }
            Poll::Ready(result) => {
                debug!(process.name = %process.name, process.id = id.0, ok = result.is_ok(), "Process finished");
                result
            }
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("now", &self.now()).finish()
    }
}

/// Future returned by [`Handle::sleep`].
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    timeline: SharedTimeline,
    deadline: Duration,
    sequence: u64,
}

impl Sleep {
    /// The virtual time at which this sleep ends.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut timeline = lock(&self.timeline);

        match timeline.timers.get_mut(&self.sequence) {
            // The deadline has been reached.
            None => Poll::Ready(()),
            Some(waker) => {
                if !waker.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
                    *waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        lock(&self.timeline).timers.remove(&self.sequence);
    }
}
