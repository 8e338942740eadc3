use crate::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Bounded hand-off from a latency-sensitive producer to a user callback.
///
/// `push` never blocks and never grows past `capacity`: when full, the oldest
/// queued value is evicted without being delivered. A dedicated worker drains
/// values in arrival order and sleeps while the queue is empty.
///
/// Dropping the queue discards undelivered values and joins the worker.
pub struct AsyncCallback<T: Send + 'static> {
    name: String,
    shared: Arc<Shared<T>>,
    thread: Option<JoinHandle<()>>,
}

struct Shared<T> {
    capacity: usize,
    queue: Mutex<Queue<T>>,
    ready: Condvar,
    evicted: AtomicU64,
    delivered: AtomicU64,
}

struct Queue<T> {
    items: VecDeque<T>,
    running: bool,
}

impl<T: Send + 'static> AsyncCallback<T> {
    /// Spawn the delivery worker. A `capacity` of 0 is treated as 1.
    pub fn new<F>(name: impl Into<String>, capacity: usize, callback: F) -> Result<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        let name = name.into();
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            capacity,
            queue: Mutex::new(Queue {
                items: VecDeque::with_capacity(capacity.min(1024)),
                running: true,
            }),
            ready: Condvar::new(),
            evicted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        });

        let worker_shared = shared.clone();
        let worker_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(format!("mynteye-cb-{}", name))
            .spawn(move || delivery_loop(&worker_name, &worker_shared, callback))?;

        Ok(Self {
            name,
            shared,
            thread: Some(thread),
        })
    }

    /// Enqueue `value`, evicting the oldest queued value when full.
    ///
    /// Returns `true` if a value was evicted.
    pub fn push(&self, value: T) -> bool {
        let evicted = {
            let mut queue = self.shared.lock();
            let evicted = if queue.items.len() >= self.shared.capacity {
                queue.items.pop_front().is_some()
            } else {
                false
            };
            queue.items.push_back(value);
            evicted
        };
        self.shared.ready.notify_one();

        if evicted {
            let total = self.shared.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            log::trace!("{} callback busy, evicted oldest (total {})", self.name, total);
        }
        evicted
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Values waiting for delivery.
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values dropped because the queue was full.
    pub fn evicted_count(&self) -> u64 {
        self.shared.evicted.load(Ordering::Relaxed)
    }

    /// Values handed to the callback.
    pub fn delivered_count(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    fn shutdown(&mut self) {
        {
            let mut queue = self.shared.lock();
            queue.running = false;
        }
        self.shared.ready.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("{} callback worker panicked", self.name);
            }
        }
    }
}

impl<T: Send + 'static> Drop for AsyncCallback<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Queue<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn delivery_loop<T, F>(name: &str, shared: &Shared<T>, mut callback: F)
where
    F: FnMut(T),
{
    log::debug!("{} callback worker started", name);
    loop {
        let value = {
            let mut queue = shared.lock();
            while queue.running && queue.items.is_empty() {
                queue = shared
                    .ready
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if !queue.running {
                if !queue.items.is_empty() {
                    log::debug!(
                        "{} callback stopping, discarding {} queued",
                        name,
                        queue.items.len()
                    );
                    queue.items.clear();
                }
                break;
            }
            queue.items.pop_front()
        };

        if let Some(value) = value {
            callback(value);
            shared.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
    log::debug!("{} callback worker stopped", name);
}

/// Where a producer hands its values: straight into a callback on the
/// producing thread, or through an [`AsyncCallback`].
pub(crate) enum Delivery<T: Send + 'static> {
    Direct(Box<dyn FnMut(T) + Send>),
    Queued(AsyncCallback<T>),
}

impl<T: Send + 'static> Delivery<T> {
    pub fn new<F>(name: &str, capacity: usize, is_async: bool, callback: F) -> Result<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        if is_async {
            Ok(Delivery::Queued(AsyncCallback::new(name, capacity, callback)?))
        } else {
            Ok(Delivery::Direct(Box::new(callback)))
        }
    }

    pub fn deliver(&mut self, value: T) {
        match self {
            Delivery::Direct(callback) => callback(value),
            Delivery::Queued(queue) => {
                queue.push(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_capacity_one_latest_wins() {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (out_tx, out_rx) = crossbeam_channel::unbounded();

        let cb = AsyncCallback::new("latest", 1, move |v: u32| {
            if v == 0 {
                started_tx.send(()).unwrap();
                gate_rx.recv().unwrap();
            }
            out_tx.send(v).unwrap();
        })
        .unwrap();

        cb.push(0);
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // Worker is parked inside the callback; every push returns at once.
        let mut evictions = 0;
        for i in 1..=10 {
            if cb.push(i) {
                evictions += 1;
            }
        }
        assert_eq!(evictions, 9);
        assert_eq!(cb.evicted_count(), 9);
        assert_eq!(cb.len(), 1);

        gate_tx.send(()).unwrap();
        assert_eq!(out_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
        assert_eq!(out_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 10);
        assert!(out_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(cb.delivered_count(), 2);
    }

    #[test]
    fn test_preserves_arrival_order() {
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let cb = AsyncCallback::new("motion", 1000, move |v: usize| {
            if v % 100 == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
            out_tx.send(v).unwrap();
        })
        .unwrap();

        for i in 0..500 {
            cb.push(i);
        }
        let received: Vec<usize> = (0..500)
            .map(|_| out_rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(received, (0..500).collect::<Vec<_>>());
        assert_eq!(cb.evicted_count(), 0);
    }

    #[test]
    fn test_drop_joins_with_pending_items() {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (out_tx, out_rx) = crossbeam_channel::unbounded();

        let cb = AsyncCallback::new("drop", 4, move |v: u32| {
            if v == 0 {
                started_tx.send(()).unwrap();
                gate_rx.recv().unwrap();
            }
            out_tx.send(v).unwrap();
        })
        .unwrap();
        cb.push(0);
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        cb.push(1);
        cb.push(2);

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            gate_tx.send(()).unwrap();
        });
        drop(cb);
        releaser.join().unwrap();

        let delivered: Vec<u32> = out_rx.try_iter().collect();
        assert_eq!(delivered[0], 0);
        assert!(delivered.len() <= 3);
    }

    #[test]
    fn test_delivery_direct_runs_inline() {
        let caller = std::thread::current().id();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut d = Delivery::new("direct", 1, false, move |v: u8| {
            tx.send((v, std::thread::current().id())).unwrap();
        })
        .unwrap();
        d.deliver(9);
        assert_eq!(rx.try_recv().unwrap(), (9, caller));

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut d = Delivery::new("queued", 1, true, move |v: u8| {
            tx.send((v, std::thread::current().id())).unwrap();
        })
        .unwrap();
        d.deliver(3);
        let (v, thread) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(v, 3);
        assert_ne!(thread, caller);
    }
}
