//! In-process server backend.
//!
//! Keeps variables in a map and "serves" by blocking until aborted. Used by
//! the test suites to observe node stores and run-loop threads without
//! opening sockets.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::server::{ServerBackend, ServerFactory};

/// A server instance backed by a map of label to value.
#[derive(Debug)]
pub struct MemoryBackend {
    port: u16,
    variables: Mutex<BTreeMap<String, bool>>,
    aborted: Mutex<bool>,
    wake: Condvar,
}

impl MemoryBackend {
    fn new(port: u16) -> Self {
        Self {
            port,
            variables: Mutex::new(BTreeMap::new()),
            aborted: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// Labels currently in the store.
    pub fn labels(&self) -> Vec<String> {
        self.variables
            .lock()
            .map(|vars| vars.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a variable behind the manager's back.
    pub fn remove_variable(&self, label: &str) -> bool {
        self.variables
            .lock()
            .map(|mut vars| vars.remove(label).is_some())
            .unwrap_or(false)
    }

    /// Whether [`abort`](ServerBackend::abort) has been called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.lock().map(|a| *a).unwrap_or(true)
    }

    fn store_error(label: &str) -> BridgeError {
        BridgeError::NodeStore(format!("node store poisoned while accessing '{}'", label))
    }
}

impl ServerBackend for MemoryBackend {
    type Node = String;

    fn port(&self) -> u16 {
        self.port
    }

    fn run(&self) {
        let Ok(mut aborted) = self.aborted.lock() else {
            return;
        };
        while !*aborted {
            aborted = match self.wake.wait(aborted) {
                Ok(guard) => guard,
                Err(_) => return,
            };
        }
    }

    fn abort(&self) {
        if let Ok(mut aborted) = self.aborted.lock() {
            *aborted = true;
        }
        self.wake.notify_all();
    }

    fn find_variable(&self, label: &str) -> Option<String> {
        let vars = self.variables.lock().ok()?;
        vars.contains_key(label).then(|| label.to_string())
    }

    fn add_variable(&self, label: &str, value: bool) -> Result<String> {
        let mut vars = self.variables.lock().map_err(|_| Self::store_error(label))?;
        if vars.contains_key(label) {
            return Err(BridgeError::NodeStore(format!(
                "node '{}' already exists",
                label
            )));
        }
        vars.insert(label.to_string(), value);
        Ok(label.to_string())
    }

    fn write_variable(&self, node: &String, value: bool) -> Result<()> {
        let mut vars = self.variables.lock().map_err(|_| Self::store_error(node))?;
        match vars.get_mut(node) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(BridgeError::NodeStore(format!("node '{}' not found", node))),
        }
    }

    fn read_variable(&self, label: &str) -> Option<bool> {
        self.variables.lock().ok()?.get(label).copied()
    }
}

#[derive(Debug, Default)]
struct FactoryInner {
    built: AtomicUsize,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    fail_build: AtomicBool,
    fail_spawn: AtomicBool,
    last: Mutex<Option<Arc<MemoryBackend>>>,
}

/// Factory for [`MemoryBackend`] instances.
///
/// Clones share counters, so a test can keep one clone while the manager owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFactory {
    inner: Arc<FactoryInner>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`build`](ServerFactory::build) fail.
    pub fn fail_next_build(&self) {
        self.inner.fail_build.store(true, Ordering::SeqCst);
    }

    /// Make the next run-loop spawn fail.
    pub fn fail_next_spawn(&self) {
        self.inner.fail_spawn.store(true, Ordering::SeqCst);
    }

    /// Instances built so far.
    pub fn instances_built(&self) -> usize {
        self.inner.built.load(Ordering::SeqCst)
    }

    /// Run-loop threads spawned and not yet exited.
    pub fn live_run_loops(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live run-loop threads.
    pub fn peak_run_loops(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// The most recently built instance.
    pub fn last_backend(&self) -> Option<Arc<MemoryBackend>> {
        self.inner.last.lock().ok()?.clone()
    }
}

impl ServerFactory for MemoryFactory {
    type Backend = MemoryBackend;

    fn build(&self, port: u16) -> Result<Arc<MemoryBackend>> {
        if self.inner.fail_build.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::Server(format!(
                "failed to build server on port {}",
                port
            )));
        }

        let backend = Arc::new(MemoryBackend::new(port));
        self.inner.built.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.inner.last.lock() {
            *last = Some(backend.clone());
        }
        Ok(backend)
    }

    fn spawn_run_loop(&self, backend: Arc<MemoryBackend>) -> io::Result<JoinHandle<()>> {
        if self.inner.fail_spawn.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "cannot create run-loop thread",
            ));
        }

        // Counted from spawn to thread exit, so the count is exact as soon as
        // start() returns and again once stop() has joined.
        let live = self.inner.live.clone();
        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);

        let thread_live = live.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("memory-server-{}", backend.port()))
            .spawn(move || {
                backend.run();
                thread_live.fetch_sub(1, Ordering::SeqCst);
            });

        if spawned.is_err() {
            live.fetch_sub(1, Ordering::SeqCst);
        }
        spawned
    }
}
