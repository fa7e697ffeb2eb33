//! Async writers
//!
//! Each worker owns two async writers: a generic one for the write-ahead
//! log and a bounded one for stats lines. A writer runs one labeled OS
//! thread draining its queue into a host-provided sink; it never touches
//! request state, signaling outcomes back through entry completions
//! instead.
//!
//! Stopping joins the thread only when the current process is the one that
//! spawned it: after a fork the child must not join threads it does not
//! own.

use bytes::Bytes;
use memrouter_common::{RouterError, RouterResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Destination the writer thread drains into.
pub type WriterSink = Box<dyn FnMut(&[u8]) -> std::io::Result<()> + Send>;

/// Completion invoked on the writer thread with the sink outcome.
pub type WriteCompletion = Box<dyn FnOnce(std::io::Result<()>) + Send>;

/// One queued write.
pub struct WriteEntry {
    pub payload: Bytes,
    pub completion: Option<WriteCompletion>,
}

impl WriteEntry {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: WriteCompletion) -> Self {
        self.completion = Some(completion);
        self
    }
}

enum WriterTx {
    Unbounded(mpsc::UnboundedSender<WriteEntry>),
    Bounded(mpsc::Sender<WriteEntry>),
}

enum WriterRx {
    Unbounded(mpsc::UnboundedReceiver<WriteEntry>),
    Bounded(mpsc::Receiver<WriteEntry>),
}

impl WriterRx {
    fn blocking_recv(&mut self) -> Option<WriteEntry> {
        match self {
            WriterRx::Unbounded(rx) => rx.blocking_recv(),
            WriterRx::Bounded(rx) => rx.blocking_recv(),
        }
    }
}

/// A queue drained by one named OS thread.
pub struct AsyncWriter {
    name: &'static str,
    capacity: Option<usize>,
    tx: Mutex<Option<WriterTx>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    spawn_pid: AtomicU32,
}

impl AsyncWriter {
    /// A writer with the given thread label; `capacity` of `None` means an
    /// unbounded queue.
    pub fn new(name: &'static str, capacity: Option<usize>) -> Self {
        Self {
            name,
            capacity,
            tx: Mutex::new(None),
            handle: Mutex::new(None),
            spawn_pid: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn the writer thread. Fails if already running or if the OS
    /// refuses the thread.
    pub fn start(&self, mut sink: WriterSink) -> RouterResult<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(RouterError::lifecycle(format!(
                "writer {} already started",
                self.name
            )));
        }

        let (tx, mut rx) = match self.capacity {
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (WriterTx::Unbounded(tx), WriterRx::Unbounded(rx))
            }
            Some(cap) => {
                let (tx, rx) = mpsc::channel(cap.max(1));
                (WriterTx::Bounded(tx), WriterRx::Bounded(rx))
            }
        };

        let name = self.name;
        let joined = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(writer = name, "async writer thread running");
                while let Some(entry) = rx.blocking_recv() {
                    let result = sink(&entry.payload);
                    if let Err(e) = &result {
                        error!(writer = name, error = %e, "async write failed");
                    }
                    if let Some(completion) = entry.completion {
                        completion(result);
                    }
                }
                debug!(writer = name, "async writer thread exiting");
            })
            .map_err(|e| RouterError::WriterStartup {
                name: name.to_string(),
                source: e,
            })?;

        self.spawn_pid.store(std::process::id(), Ordering::Relaxed);
        *self.tx.lock() = Some(tx);
        *handle = Some(joined);
        Ok(())
    }

    /// Whether the writer thread is running.
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Queue one entry. A bounded writer rejects entries when full rather
    /// than blocking the caller.
    pub fn post(&self, entry: WriteEntry) -> RouterResult<()> {
        match &*self.tx.lock() {
            Some(WriterTx::Unbounded(tx)) => tx.send(entry).map_err(|_| RouterError::WriterQueue {
                message: format!("writer {} stopped", self.name),
            }),
            Some(WriterTx::Bounded(tx)) => tx.try_send(entry).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RouterError::WriterQueue {
                    message: format!("writer {} queue full", self.name),
                },
                mpsc::error::TrySendError::Closed(_) => RouterError::WriterQueue {
                    message: format!("writer {} stopped", self.name),
                },
            }),
            None => Err(RouterError::WriterQueue {
                message: format!("writer {} not started", self.name),
            }),
        }
    }

    /// Close the queue and drain. Joins only in the spawning process.
    pub fn stop(&self) {
        *self.tx.lock() = None;
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if std::process::id() == self.spawn_pid.load(Ordering::Relaxed) {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        self.stop();
    }
}
