//! Host-side module instances and their worker threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use iris_loader::Module;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

/// Shared worker state: the signaled flag the worker sleeps on, plus the
/// run flags the host flips from outside.
struct WorkerState {
    signaled: Mutex<bool>,
    cv: Condvar,
    should_run: AtomicBool,
    running: AtomicBool,
}

/// One module instance as the graph sees it: identity, run state, and the
/// worker thread that performs `execute()`.
///
/// The worker sleeps on its condition variable until [`ModuleHost::kick`]
/// raises the signaled flag, runs one `execute`, clears the flag, and
/// sleeps again. [`ModuleHost::stop`] drops the should-run flag; a kick
/// racing a stop resolves to the worker exiting without executing.
pub struct ModuleHost {
    name: String,
    type_name: String,
    version: u32,
    graph_id: u32,
    state: Arc<WorkerState>,
    module: Option<Box<dyn Module>>,
    worker: Option<JoinHandle<Box<dyn Module>>>,
}

impl ModuleHost {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        version: u32,
        graph_id: u32,
        module: Box<dyn Module>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            version,
            graph_id,
            state: Arc::new(WorkerState {
                signaled: Mutex::new(false),
                cv: Condvar::new(),
                should_run: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            module: Some(module),
            worker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn graph_id(&self) -> u32 {
        self.graph_id
    }

    /// Run the module's one-time setup. Only valid while the worker is not
    /// running; new modules are initialized before their first start.
    pub fn initialize(&mut self) {
        if let Some(module) = self.module.as_mut() {
            module.initialize();
        }
    }

    /// Spawn the worker thread. A host whose worker is already running is
    /// left alone.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let Some(mut module) = self.module.take() else {
            return;
        };

        let state = self.state.clone();
        state.should_run.store(true, Ordering::SeqCst);
        state.running.store(true, Ordering::SeqCst);

        let name = self.name.clone();
        let handle = thread::Builder::new()
            .name(format!("module-{name}"))
            .spawn(move || {
                debug!(module = %name, "worker started");
                loop {
                    {
                        let mut signaled = state.signaled.lock();
                        while !*signaled {
                            state.cv.wait(&mut signaled);
                        }
                    }
                    // A stop that raced the kick wins: exit without executing.
                    if !state.should_run.load(Ordering::SeqCst) {
                        break;
                    }
                    module.execute();
                    *state.signaled.lock() = false;
                }
                state.running.store(false, Ordering::SeqCst);
                debug!(module = %name, "worker exited");
                module
            })
            .expect("failed to spawn module worker");
        self.worker = Some(handle);
    }

    /// Wake the worker for one `execute()`.
    pub fn kick(&self) {
        let mut signaled = self.state.signaled.lock();
        *signaled = true;
        self.state.cv.notify_one();
    }

    /// Whether the worker has consumed its last kick.
    pub fn ready(&self) -> bool {
        !*self.state.signaled.lock()
    }

    /// Ask the worker to exit. Returns true once the worker is no longer
    /// running; callers kick between polls so a sleeping worker wakes and
    /// observes the flag.
    pub fn stop(&self) -> bool {
        self.state.should_run.store(false, Ordering::SeqCst);
        !self.state.running.load(Ordering::SeqCst)
    }

    /// Stop the worker and take the module back for shutdown/destruction.
    pub fn stop_and_join(&mut self) {
        while !self.stop() {
            self.kick();
            thread::sleep(std::time::Duration::from_micros(10));
        }
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(module) => self.module = Some(module),
                Err(_) => error!(module = %self.name, "worker panicked; instance lost"),
            }
        }
    }

    /// Hand the module instance out for destruction. The worker must have
    /// been joined first.
    pub fn into_module(mut self) -> Option<Box<dyn Module>> {
        self.stop_and_join();
        self.module.take()
    }
}
