//! Single callback thread for the loopback service.
//!
//! Every callback the service raises is queued here and run in submission
//! order, so events from one source are never reordered and never run on
//! the caller's thread.

use std::io;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct CallbackDispatcher {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    handle: Option<JoinHandle<()>>,
}

impl CallbackDispatcher {
    pub(crate) fn spawn(name: &str) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut delivered = 0u64;
                while let Ok(job) = rx.recv() {
                    job();
                    delivered += 1;
                }
                debug!("callback thread exiting after {delivered} callbacks");
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Some(handle),
        })
    }

    pub(crate) fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let tx = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match tx.as_ref() {
            Some(tx) => {
                if tx.send(Box::new(job)).is_err() {
                    warn!("callback thread gone, dropping callback");
                }
            }
            None => warn!("dispatcher shut down, dropping callback"),
        }
    }

    /// Waits until every callback queued so far has run. Returns false on
    /// timeout or once the callback thread is gone.
    pub(crate) fn flush(&self, timeout: Duration) -> bool {
        if self.is_dispatcher_thread() {
            return true;
        }
        let (done_tx, done_rx) = mpsc::channel::<()>();
        self.dispatch(move || {
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(timeout).is_ok()
    }

    fn is_dispatcher_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        // A callback may hold the last reference to the service.
        if self.is_dispatcher_thread() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
