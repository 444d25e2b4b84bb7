use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

/// An unbounded FIFO queue with a single consuming process.
///
/// [`put`](Store::put) never blocks. [`get`](Store::get) suspends the consumer until an item is
/// available.
pub(crate) struct Store<T> {
    state: RefCell<StoreState<T>>,
}

struct StoreState<T> {
    items: VecDeque<T>,
    consumer: Option<Waker>,
}

impl<T> Store<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(StoreState {
                items: VecDeque::new(),
                consumer: None,
            }),
        }
    }

    /// Add an item to the back of the queue, returning the queue depth including it.
    pub(crate) fn put(&self, item: T) -> usize {
        let (depth, consumer) = {
            let mut state = self.state.borrow_mut();
            state.items.push_back(item);
            (state.items.len(), state.consumer.take())
        };

        if let Some(consumer) = consumer {
            consumer.wake();
        }

        depth
    }

    /// Take the item at the front of the queue, waiting for one if necessary.
    pub(crate) fn get(&self) -> Get<'_, T> {
        Get { store: self }
    }

    /// Number of items waiting.
    pub(crate) fn len(&self) -> usize {
        self.state.borrow().items.len()
    }
}

/// Future returned by [`Store::get`].
pub(crate) struct Get<'a, T> {
    store: &'a Store<T>,
}

impl<T> Future for Get<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.store.state.borrow_mut();

        match state.items.pop_front() {
            Some(item) => Poll::Ready(item),
            None => {
                state.consumer = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
