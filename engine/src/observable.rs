//! Current-value-plus-subscribe state primitive
//!
//! One writer publishes, any number of readers observe. Every published value
//! is delivered to every subscriber in publication order, and a new subscriber
//! immediately receives the value current at the time it subscribed.

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

enum Observer<T> {
    /// Invoked synchronously on the publishing thread
    Callback(Callback<T>),
    /// Queued for an async consumer
    Channel(mpsc::UnboundedSender<T>),
}

/// Published state value with ordered fan-out
pub struct Observable<T> {
    value: RwLock<T>,
    /// Also serialises delivery: publications never interleave
    observers: Mutex<Vec<Observer<T>>>,
}

impl<T: Clone + Send + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: RwLock::new(initial),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Publish a value to every subscriber, even if it equals the current one.
    ///
    /// Callbacks run before `set` returns. A callback may read this observable
    /// but must not publish to it.
    pub fn set(&self, value: T) {
        let mut observers = self.observers.lock();
        *self.value.write() = value.clone();

        observers.retain(|observer| match observer {
            Observer::Callback(f) => {
                f(&value);
                true
            }
            Observer::Channel(tx) => tx.send(value.clone()).is_ok(),
        });
    }

    /// Register a synchronous callback; it is called with the current value first
    pub fn observe<F>(&self, f: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut observers = self.observers.lock();
        let current = self.get();
        f(&current);
        observers.push(Observer::Callback(Box::new(f)));
    }

    /// Open a stream of values starting with the current one
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observers = self.observers.lock();
        // Receiver is alive, cannot fail
        let _ = tx.send(self.get());
        observers.push(Observer::Channel(tx));
        rx
    }
}

impl<T: Clone + PartialEq + Send + 'static> Observable<T> {
    /// Publish only if the value differs from the current one. Returns whether it did.
    pub fn set_if_changed(&self, value: T) -> bool {
        if *self.value.read() == value {
            return false;
        }
        self.set(value);
        true
    }
}
