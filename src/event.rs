use std::{
    cell::RefCell,
    future::Future,
    mem,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// A one-shot signal that processes can wait on.
///
/// Fires at most once, waking every waiter in the order they started waiting. Waiting on an event
/// that has already fired completes immediately. Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct Event {
    state: Rc<RefCell<EventState>>,
}

#[derive(Debug, Default)]
struct EventState {
    fired: bool,
    waiters: Vec<Waker>,
}

impl Event {
    /// Create an event that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`fire`](Self::fire) has been called.
    pub fn is_fired(&self) -> bool {
        self.state.borrow().fired
    }

    /// Fire the event, waking all current waiters.
    ///
    /// Returns `false`, and wakes nobody, if the event had already fired.
    pub fn fire(&self) -> bool {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if state.fired {
                return false;
            }
            state.fired = true;
            mem::take(&mut state.waiters)
        };

        for waiter in waiters {
            waiter.wake();
        }

        true
    }

    /// Wait for the event to fire.
    pub fn wait(&self) -> Wait {
        Wait {
            event: self.clone(),
            slot: None,
        }
    }
}

/// Future returned by [`Event::wait`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Wait {
    event: Event,
    /// Position in the waiter list, once registered.
    slot: Option<usize>,
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.event.state.borrow_mut();

        if state.fired {
            return Poll::Ready(());
        }

        match this.slot {
            Some(slot) => {
                if let Some(waker) = state.waiters.get_mut(slot) {
                    if !waker.will_wake(cx.waker()) {
                        *waker = cx.waker().clone();
                    }
                }
            }
            None => {
                this.slot = Some(state.waiters.len());
                state.waiters.push(cx.waker().clone());
            }
        }

        Poll::Pending
    }
}
