//! One named pipeline: module loading, priority order, and the tick loop

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use iris_config::{Configuration, Token};
use iris_event_bus::{key, BusHandle};
use iris_loader::Loader;
use tracing::{error, info, warn};

use crate::error::OrchestratorResult;
use crate::module_host::ModuleHost;
use crate::solver::{ModuleIo, Solver};

/// How long the driver sleeps between readiness polls at the end of a tick.
const READY_POLL: Duration = Duration::from_micros(10);

/// A named set of modules executed together each tick.
///
/// The graph materializes its modules from the pipeline document, solves a
/// priority order from their declared inputs and outputs, and then drives
/// one kick of every module per tick until stopped, reloading itself when
/// the document changes on disk.
pub struct Graph {
    name: String,
    id: u32,
    config_path: PathBuf,
    config: Configuration,
    loader: Arc<Loader>,
    bus: BusHandle,
    hosts: HashMap<String, ModuleHost>,
    queue: Vec<String>,
    running: Arc<AtomicBool>,
    timing_enabled: bool,
}

impl Graph {
    pub fn new(
        name: impl Into<String>,
        loader: Arc<Loader>,
        config_path: impl AsRef<Path>,
        id: u32,
    ) -> Self {
        let name = name.into();
        Self {
            bus: BusHandle::with_channel(id),
            name,
            id,
            config_path: config_path.as_ref().to_owned(),
            config: Configuration::new(),
            loader,
            hosts: HashMap::new(),
            queue: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            timing_enabled: false,
        }
    }

    pub fn set_enable_timings(&mut self, enabled: bool) {
        self.timing_enabled = enabled;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The stop flag shared with whoever supervises this graph's thread.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Parse the pipeline document, create this graph's modules, and solve
    /// the execution order.
    pub fn initialize(&mut self) -> OrchestratorResult<()> {
        if let Err(error) = self.config.initialize(&self.config_path) {
            warn!(graph = %self.name, %error, "pipeline document unreadable; graph stays empty");
            return Ok(());
        }
        self.load();
        self.solve()
    }

    pub fn has(&self, module: &str) -> bool {
        self.hosts.contains_key(module)
    }

    /// Module names in solved priority order.
    pub fn execution_order(&self) -> &[String] {
        &self.queue
    }

    /// Run the graph: initialize and start every module, then tick until
    /// the running flag drops. Blocks for the graph's lifetime; the manager
    /// gives each graph its own thread.
    pub fn kick(&mut self) {
        info!(graph = %self.name, "kicking off graph");
        self.running.store(true, Ordering::SeqCst);

        self.start_modules(&HashSet::new());
        self.traverse();

        self.stop_modules();
    }

    /// Ask the tick loop to exit after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Shut down and destroy every module in the graph.
    pub fn reset(&mut self) {
        self.stop_modules();
        self.queue.clear();
        for (_, host) in self.hosts.drain() {
            destroy_host(&self.loader, host);
        }
    }

    /// One tick per iteration: honor document changes, kick every module in
    /// priority order, and wait for the tail of the queue to come back up.
    fn traverse(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            let tick_start = Instant::now();

            if self.config.modified() {
                self.reload();
            }

            if self.queue.is_empty() {
                thread::sleep(Duration::from_millis(1));
                continue;
            }

            for name in &self.queue {
                self.hosts[name].kick();
            }

            if let Some(last) = self.queue.last() {
                let host = &self.hosts[last];
                while self.running.load(Ordering::SeqCst) && !host.ready() {
                    thread::sleep(READY_POLL);
                }
            }

            if self.timing_enabled {
                info!(
                    graph = %self.name,
                    tick_micros = tick_start.elapsed().as_micros() as u64,
                    "graph execution time"
                );
            }
        }
    }

    /// Create any module declared for this graph that does not exist yet,
    /// then fan its parameters out over the bus.
    fn load(&mut self) {
        let root = self.config.begin();
        let Some(graph_token) = root.get(&self.name) else {
            warn!(graph = %self.name, "no declaration in pipeline document");
            return;
        };

        for (module_name, declaration) in graph_token.entries() {
            let mut module_type = String::new();
            let mut version = 0u32;
            for (param, token) in declaration.entries() {
                match param.as_str() {
                    "type" => module_type = token.string(),
                    "version" => version = token.number(),
                    _ => {}
                }
            }

            if !self.hosts.contains_key(&module_name) {
                info!(
                    name = %module_name,
                    module = %module_type,
                    version,
                    graph = %self.name,
                    "initializing module"
                );

                match self.loader.descriptor(&module_type).create(version) {
                    Some(mut module) => {
                        module.set_name(&module_name);
                        module.subscribe(self.id);
                        self.hosts.insert(
                            module_name.clone(),
                            ModuleHost::new(
                                module_name.as_str(),
                                module_type.as_str(),
                                version,
                                self.id,
                                module,
                            ),
                        );
                    }
                    None => {
                        warn!(name = %module_name, module = %module_type, "failed to load module");
                    }
                }
            }

            self.configure_module(&module_name, &declaration);
        }
    }

    /// Emit a module's declared parameters under `"<module>::<key>"`.
    ///
    /// Scalars go out once under each scalar accessor so the module's
    /// subscription matches whichever type it chose; arrays additionally
    /// emit per element with the element index.
    fn configure_module(&self, module_name: &str, declaration: &Token) {
        for (param, token) in declaration.entries() {
            if param == "type" || param == "version" {
                continue;
            }
            let key = key![module_name, "::", &param];

            if token.is_array() {
                for index in 0..token.size() {
                    let i = index as u32;
                    self.bus.emit_indexed(&token.number_at(index), i, key.clone());
                    self.bus.emit_indexed(&token.decimal_at(index), i, key.clone());
                    self.bus.emit_indexed(&token.string_at(index), i, key.clone());
                    self.bus.emit_indexed(&token.boolean_at(index), i, key.clone());
                    self.bus.emit(&token.number_at(index), key.clone());
                    self.bus.emit(&token.decimal_at(index), key.clone());
                    self.bus.emit(&token.string_at(index), key.clone());
                    self.bus.emit(&token.boolean_at(index), key.clone());
                }
            } else {
                self.bus.emit(&token.number(), key.clone());
                self.bus.emit(&token.decimal(), key.clone());
                self.bus.emit(&token.string(), key.clone());
                self.bus.emit(&token.boolean(), key.clone());
            }
        }
    }

    /// Solve the execution order from the declared inputs and outputs of
    /// every module this graph holds.
    fn solve(&mut self) -> OrchestratorResult<()> {
        let root = self.config.begin();
        let graph_token = root.get(&self.name).unwrap_or_else(Token::null);

        let mut solver = Solver::new();
        for name in self.hosts.keys() {
            let declaration = graph_token.get(name).unwrap_or_else(Token::null);
            solver.add(find_inputs_and_outputs(name, &declaration));
        }

        self.queue = solver.solve(&self.name)?;
        info!(graph = %self.name, order = ?self.queue, "solved execution order");
        Ok(())
    }

    /// Initialize modules that were not preserved across a reload, then
    /// start every worker in priority order.
    fn start_modules(&mut self, preserved: &HashSet<String>) {
        for name in &self.queue {
            if let Some(host) = self.hosts.get_mut(name) {
                if !preserved.contains(name) {
                    host.initialize();
                }
                host.start();
            }
        }
    }

    /// Stop every worker, waking each so it observes the flag. A worker
    /// blocked inside a required bus wait is released as well; for it, the
    /// stop is the shutdown that cancels the wait. Only this graph's
    /// channel is released: other pipelines' required waits are not part
    /// of this stop.
    fn stop_modules(&mut self) {
        for host in self.hosts.values() {
            host.stop();
        }
        iris_event_bus::cancel_waits_on_channel(self.id);
        for host in self.hosts.values_mut() {
            host.stop_and_join();
        }
    }

    /// The reload protocol: stop workers, re-read the document, keep the
    /// modules whose names survive, destroy the rest, then rebuild and
    /// restart. Preserved modules are not re-initialized.
    fn reload(&mut self) {
        info!(graph = %self.name, "configuration changed, reloading");
        self.stop_modules();

        self.config.reset();
        if let Err(error) = self.config.initialize(&self.config_path) {
            warn!(graph = %self.name, %error, "reload failed; graph stays empty");
            self.queue.clear();
            for (_, host) in self.hosts.drain() {
                destroy_host(&self.loader, host);
            }
            return;
        }

        let declared: HashSet<String> = self
            .config
            .begin()
            .get(&self.name)
            .map(|token| token.entries().into_iter().map(|(k, _)| k).collect())
            .unwrap_or_default();

        let preserved: HashSet<String> = self
            .hosts
            .keys()
            .filter(|name| declared.contains(*name))
            .cloned()
            .collect();

        let vanished: Vec<String> = self
            .hosts
            .keys()
            .filter(|name| !declared.contains(*name))
            .cloned()
            .collect();
        for name in vanished {
            info!(graph = %self.name, module = %name, "module removed by reload");
            if let Some(host) = self.hosts.remove(&name) {
                destroy_host(&self.loader, host);
            }
        }

        self.queue.clear();
        self.load();
        if let Err(error) = self.solve() {
            // A live document was rewritten into a loop; nothing sane can
            // be scheduled from here.
            error!(graph = %self.name, %error, "reloaded pipeline is cyclic");
            std::process::exit(1);
        }
        self.start_modules(&preserved);
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Shut a module down and release it through its descriptor.
fn destroy_host(loader: &Loader, host: ModuleHost) {
    let type_name = host.type_name().to_owned();
    let version = host.version();
    if let Some(mut module) = host.into_module() {
        module.shutdown();
        loader.descriptor(&type_name).destroy(module, version);
    }
}

/// Pull the declared `inputs`/`outputs` (scalar or array of strings) out of
/// a module declaration.
fn find_inputs_and_outputs(name: &str, declaration: &Token) -> ModuleIo {
    let mut io = ModuleIo {
        name: name.to_owned(),
        ..ModuleIo::default()
    };

    for (param, token) in declaration.entries() {
        let target = if param == "inputs" {
            &mut io.inputs
        } else if param == "outputs" {
            &mut io.outputs
        } else {
            continue;
        };

        if token.is_array() {
            for index in 0..token.size() {
                target.push(token.string_at(index));
            }
        } else {
            target.push(token.string());
        }
    }

    io
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration(json: &str) -> Token {
        Token::new(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn inputs_and_outputs_accept_scalar_or_array() {
        let decl = declaration(r#"{"inputs": ["a", "b"], "outputs": "c"}"#);
        let io = find_inputs_and_outputs("m", &decl);
        assert_eq!(io.inputs, ["a", "b"]);
        assert_eq!(io.outputs, ["c"]);
    }

    #[test]
    fn other_keys_are_not_structural_for_ordering() {
        let decl = declaration(r#"{"type": "T", "width": 3}"#);
        let io = find_inputs_and_outputs("m", &decl);
        assert!(io.inputs.is_empty());
        assert!(io.outputs.is_empty());
    }

    #[test]
    fn similarly_named_parameters_are_plain_parameters() {
        let decl = declaration(r#"{"max_inputs": 3, "num_outputs": "eight", "inputs": "a"}"#);
        let io = find_inputs_and_outputs("m", &decl);
        assert_eq!(io.inputs, ["a"]);
        assert!(io.outputs.is_empty());
    }
}
