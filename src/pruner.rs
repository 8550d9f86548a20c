use crate::Store;

use crossbeam::channel::{bounded, select, tick, Sender};
use tracing::{debug, warn};

use std::hash::{BuildHasher, Hash};
use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a thread which calls [`Store::prune`] on a fixed interval.
///
/// The thread holds a weak reference to the store and stops on its own once the store is
/// dropped. Dropping the handle stops the thread and waits for it to finish.
///
/// # Examples
///
/// ```
/// use lapse::Store;
///
/// use std::sync::Arc;
/// use std::thread::sleep;
/// use std::time::Duration;
///
/// let store = Arc::new(Store::new());
/// let pruner = store.spawn_pruner(Duration::from_millis(10)).unwrap();
///
/// store.set_with_timeout("a", 1, Duration::from_millis(5));
/// sleep(Duration::from_millis(50));
///
/// assert_eq!(store.len_approx(), 0);
/// pruner.stop().unwrap();
/// ```
pub struct Pruner {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Pruner {
    /// Starts pruning `store` every `interval`. Intervals below one millisecond are raised to
    /// one millisecond.
    pub fn spawn<K, V, H>(store: &Arc<Store<K, V, H>>, interval: Duration) -> io::Result<Self>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
        H: Send + Sync + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let store = Arc::downgrade(store);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("lapse-pruner".into())
            .spawn(move || {
                debug!(?interval, "pruner started");

                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if !prune_once(&store) {
                                break;
                            }
                        }
                        // only ever disconnected, nothing is sent.
                        recv(stop_rx) -> _ => break,
                    }
                }

                debug!("pruner stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Returns `true` while the pruning thread is running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stops the pruning thread and waits for it. Returns the thread's panic payload if it
    /// panicked.
    pub fn stop(mut self) -> thread::Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> thread::Result<()> {
        self.stop_tx.take();

        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for Pruner {
    fn drop(&mut self) {
        if self.shutdown().is_err() {
            warn!("pruner thread panicked");
        }
    }
}

// returns `false` once the store is gone.
fn prune_once<K, V, H>(store: &Weak<Store<K, V, H>>) -> bool {
    match store.upgrade() {
        Some(store) => {
            store.prune();
            true
        }
        None => false,
    }
}

impl<K, V, H> Store<K, V, H>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Send + Sync + 'static,
{
    /// Spawns a [`Pruner`] for this store. See [`Pruner::spawn`].
    pub fn spawn_pruner(self: &Arc<Self>, interval: Duration) -> io::Result<Pruner> {
        Pruner::spawn(self, interval)
    }
}
