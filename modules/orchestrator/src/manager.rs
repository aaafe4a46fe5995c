//! Top-level supervisor: one graph per pipeline, one thread per graph

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use iris_config::Configuration;
use iris_event_bus::{cancel_all_waits, BusHandle, Requirement};
use iris_loader::{Descriptor, Loader};
use parking_lot::{Condvar, Mutex};
use tracing::{error, info, warn};

use crate::error::OrchestratorResult;
use crate::graph::Graph;

/// The well-known bus key any module can emit `true` on to ask the host
/// process to shut down.
pub const EXIT_FLAG_KEY: &str = "Iris::Exit::Flag";

struct GraphWorker {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Graph>>,
    /// Present until [`Manager::start`] hands the graph to its thread.
    graph: Option<Graph>,
}

struct RunState {
    running: Mutex<bool>,
    cv: Condvar,
}

/// Owns the loader, the pipeline document, and every graph it names.
///
/// `initialize` builds one [`Graph`] per top-level key of the pipeline
/// document; `start` gives each graph a worker thread running its tick
/// loop; `run` blocks until some module raises [`EXIT_FLAG_KEY`];
/// `shutdown` stops and destroys everything, joining the workers.
pub struct Manager {
    loader: Option<Loader>,
    config: Configuration,
    graphs: HashMap<String, GraphWorker>,
    bus: BusHandle,
    state: Arc<RunState>,
    timing_enabled: bool,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            loader: Some(Loader::new()),
            config: Configuration::new(),
            graphs: HashMap::new(),
            bus: BusHandle::new(),
            state: Arc::new(RunState {
                running: Mutex::new(false),
                cv: Condvar::new(),
            }),
            timing_enabled: false,
        }
    }

    /// Enable per-tick timing logs on every graph.
    pub fn set_enable_graph_timings(&mut self, enabled: bool) {
        self.timing_enabled = enabled;
    }

    /// Register an in-process module descriptor ahead of `initialize`, for
    /// statically linked module types.
    pub fn register_descriptor(&mut self, descriptor: Descriptor) {
        if let Some(loader) = self.loader.as_mut() {
            loader.register(descriptor);
        } else {
            warn!("descriptor registered after initialize is ignored");
        }
    }

    /// Load modules from `module_path`, parse the pipeline document at
    /// `config_path`, and construct one graph per top-level entry.
    pub fn initialize(
        &mut self,
        module_path: impl AsRef<Path>,
        config_path: impl AsRef<Path>,
    ) -> OrchestratorResult<()> {
        let config_path = config_path.as_ref();
        info!(
            modules = %module_path.as_ref().display(),
            config = %config_path.display(),
            "initializing module manager"
        );

        let mut loader = self.loader.take().unwrap_or_default();
        loader.initialize(module_path);
        // Every graph holds the loader from here on; its libraries stay
        // open until the last graph has destroyed its modules.
        let loader = Arc::new(loader);

        // The exit flag must be live before any module can emit it.
        let state = self.state.clone();
        *state.running.lock() = true;
        self.bus
            .subscribe::<bool, _>(EXIT_FLAG_KEY, Requirement::Optional, move |exit| {
                if *exit {
                    info!("exit requested over the bus");
                    *state.running.lock() = false;
                    state.cv.notify_all();
                }
            });

        if let Err(error) = self.config.initialize(config_path) {
            warn!(%error, "pipeline document unreadable; no graphs constructed");
            return Ok(());
        }

        for (graph_name, _) in self.config.begin().entries() {
            if graph_name.is_empty() {
                warn!("skipping pipeline entry with empty graph name");
                continue;
            }
            if self.graphs.contains_key(&graph_name) {
                continue;
            }
            info!(graph = %graph_name, "adding graph");

            let mut graph = Graph::new(
                graph_name.as_str(),
                loader.clone(),
                config_path,
                self.graphs.len() as u32,
            );
            graph.set_enable_timings(self.timing_enabled);
            graph.initialize()?;

            self.graphs.insert(
                graph_name,
                GraphWorker {
                    running: graph.running_flag(),
                    thread: None,
                    graph: Some(graph),
                },
            );
        }

        Ok(())
    }

    /// Whether a graph of this name was constructed.
    pub fn has_graph(&self, name: &str) -> bool {
        self.graphs.contains_key(name)
    }

    /// The solved execution order of one graph, while it is not yet started.
    pub fn execution_order(&self, graph: &str) -> Option<Vec<String>> {
        self.graphs
            .get(graph)?
            .graph
            .as_ref()
            .map(|g| g.execution_order().to_vec())
    }

    /// Spawn one worker thread per graph, each running the graph's tick
    /// loop.
    pub fn start(&mut self) {
        info!("starting all graphs");
        for (name, worker) in self.graphs.iter_mut() {
            let Some(mut graph) = worker.graph.take() else {
                continue;
            };
            let thread = thread::Builder::new()
                .name(format!("graph-{name}"))
                .spawn(move || {
                    graph.kick();
                    graph
                })
                .expect("failed to spawn graph worker");
            worker.thread = Some(thread);
        }
    }

    /// Ask every graph to stop after its current tick.
    pub fn stop(&self) {
        for worker in self.graphs.values() {
            worker.running.store(false, Ordering::SeqCst);
        }
    }

    /// Block until a module asks the process to exit (or `shutdown` runs).
    pub fn run(&self) {
        let mut running = self.state.running.lock();
        while *running {
            self.state.cv.wait(&mut running);
        }
    }

    /// Stop every graph, release blocked waits, join the graph threads, and
    /// destroy all modules before the loader lets go of its libraries.
    pub fn shutdown(&mut self) {
        info!("shutting down");
        self.stop();

        // Workers blocked in a required wait will never see another emit.
        cancel_all_waits();

        for (name, mut worker) in self.graphs.drain() {
            if let Some(thread) = worker.thread.take() {
                match thread.join() {
                    Ok(mut graph) => graph.reset(),
                    Err(_) => error!(graph = %name, "graph thread panicked"),
                }
            } else if let Some(mut graph) = worker.graph.take() {
                graph.reset();
            }
        }

        let mut running = self.state.running.lock();
        *running = false;
        self.state.cv.notify_all();
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if !self.graphs.is_empty() {
            self.shutdown();
        }
    }
}
