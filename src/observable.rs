//! Single-slot push observable.
//!
//! Publishing stores the value as the latest one and wakes a dispatcher
//! thread that hands it to subscribers. The publisher never waits on
//! subscribers: if a value is still waiting for dispatch when a newer one
//! arrives, the older one is replaced and never delivered.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    latest: Mutex<Option<Arc<T>>>,
    pending: Mutex<Option<Arc<T>>>,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    published: AtomicU64,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner side of an observable value. Dropping it stops the dispatcher.
pub struct Observable<T: Send + Sync + 'static> {
    publisher: Publisher<T>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Cheap handle for publishing from other threads.
pub struct Publisher<T> {
    slot: Arc<Slot<T>>,
    wake: Sender<()>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            wake: self.wake.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Observable<T> {
    /// Create the observable and its dispatcher thread.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let slot = Arc::new(Slot {
            latest: Mutex::new(None),
            pending: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        // One queued wake-up is enough: the dispatcher always takes the newest value.
        let (wake, rx) = crossbeam_channel::bounded(1);

        let dispatcher = std::thread::Builder::new()
            .name(format!("{name}-dispatch"))
            .spawn({
                let slot = slot.clone();
                move || dispatch(slot, rx)
            })?;

        Ok(Self {
            publisher: Publisher { slot, wake },
            dispatcher: Some(dispatcher),
        })
    }

    pub fn publisher(&self) -> Publisher<T> {
        self.publisher.clone()
    }

    pub fn publish(&self, value: T) {
        self.publisher.publish(value);
    }

    /// Most recently published value, if any.
    pub fn get(&self) -> Option<Arc<T>> {
        lock(&self.publisher.slot.latest).clone()
    }

    /// Number of values published so far.
    pub fn version(&self) -> u64 {
        self.publisher.slot.published.load(Ordering::Acquire)
    }

    /// Register a callback invoked on the dispatcher thread for each
    /// delivered value.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        lock(&self.publisher.slot.subscribers).push(Arc::new(callback));
    }
}

impl<T> Publisher<T> {
    /// Store `value` and schedule delivery. Never blocks on subscribers.
    pub fn publish(&self, value: T) {
        let value = Arc::new(value);
        *lock(&self.slot.latest) = Some(value.clone());
        *lock(&self.slot.pending) = Some(value);
        self.slot.published.fetch_add(1, Ordering::AcqRel);

        match self.wake.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::trace!("Observable dispatcher gone; value kept as latest only");
            }
        }
    }
}

fn dispatch<T>(slot: Arc<Slot<T>>, wake: Receiver<()>) {
    while wake.recv().is_ok() {
        if slot.closed.load(Ordering::Acquire) {
            break;
        }
        let Some(value) = lock(&slot.pending).take() else {
            continue;
        };
        let subscribers: Vec<Subscriber<T>> = lock(&slot.subscribers).clone();
        for subscriber in &subscribers {
            subscriber(&value);
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Observable<T> {
    fn drop(&mut self) {
        self.publisher.slot.closed.store(true, Ordering::Release);
        // The queue may already hold a wake-up; either way the dispatcher
        // sees `closed` on its next iteration.
        let _ = self.publisher.wake.try_send(());
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}
