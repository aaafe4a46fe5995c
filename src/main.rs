//! Iris host executable.
//!
//! Reads a setup document, configures logging, pre-loads any extra shared
//! dependencies named on the command line, and supervises the module
//! manager until a module asks the process to exit.

use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

use iris_config::{Configuration, Token};
use iris_loader::preload_dependencies;
use iris_orchestrator::Manager;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn usage() -> String {
    "Usage: iris <IRIS_SETUP_JSON_PATH> <ADDITIONAL_DEPENDENCY_PATHS...>\n\
     \x20      iris <IRIS_SETUP_JSON_PATH>"
        .to_owned()
}

/// The recognized top-level keys of the setup document.
struct Setup {
    graph_config_path: Option<String>,
    module_path: Option<String>,
    log_output_path: Option<String>,
    log_use_stdout: bool,
    log_mode: String,
    log_enable: bool,
    graph_timing_enable: bool,
}

fn parse_setup(root: &Token) -> Setup {
    Setup {
        graph_config_path: root.get("graph_config_path").map(|t| t.string()),
        module_path: root.get("module_path").map(|t| t.string()),
        log_output_path: root.get("log_output_path").map(|t| t.string()),
        log_use_stdout: root
            .get("log_use_stdout")
            .map(|t| t.boolean())
            .unwrap_or(true),
        log_mode: root
            .get("log_mode")
            .map(|t| t.string())
            .unwrap_or_else(|| "Normal".to_owned()),
        log_enable: root.get("log_enable").map(|t| t.boolean()).unwrap_or(true),
        graph_timing_enable: root
            .get("graph_timing_enable")
            .map(|t| t.boolean())
            .unwrap_or(false),
    }
}

fn log_filter(setup: &Setup) -> &'static str {
    if !setup.log_enable {
        return "off";
    }
    match setup.log_mode.as_str() {
        "Quiet" => "warn",
        "Verbose" => "trace",
        _ => "info",
    }
}

/// Debug log file name, stamped with the moment the process started.
fn log_file_name(now: chrono::DateTime<chrono::Local>) -> String {
    now.format("iris_debug_log_%mD_%dM_%YY_%HH%MM%SS.txt")
        .to_string()
}

fn init_logging(setup: &Setup) {
    let stdout_layer = setup
        .log_use_stdout
        .then(|| tracing_subscriber::fmt::layer());

    let file_layer = setup.log_output_path.as_deref().and_then(|dir| {
        let dir = Path::new(dir);
        if let Err(error) = fs::create_dir_all(dir) {
            eprintln!("cannot create log directory {}: {error}", dir.display());
            return None;
        }
        let path = dir.join(log_file_name(chrono::Local::now()));
        match fs::File::create(&path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            ),
            Err(error) => {
                eprintln!("cannot create log file {}: {error}", path.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(EnvFilter::new(log_filter(setup)))
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() == 1 {
        println!("{}", usage());
        return;
    }

    let setup_path = &args[1];
    let mut config = Configuration::new();
    if let Err(error) = config.initialize(setup_path) {
        eprintln!("cannot read setup document {setup_path}: {error}");
        process::exit(-1);
    }
    let setup = parse_setup(&config.begin());
    init_logging(&setup);

    // Shared dependencies named after the setup document stay loaded for
    // the process lifetime so module libraries can resolve against them.
    let mut preloaded = Vec::new();
    for dependency_path in &args[2..] {
        info!(path = %dependency_path, "pre-loading dependencies");
        preloaded.extend(preload_dependencies(dependency_path));
    }

    let Some(graph_config_path) = setup.graph_config_path.as_deref() else {
        error!(
            setup = %setup_path,
            "no graph config path given; unable to start any graph"
        );
        process::exit(-1);
    };
    let Some(module_path) = setup.module_path.as_deref() else {
        error!(
            setup = %setup_path,
            "no module path given; cannot load any modules for the graphs to use"
        );
        process::exit(-1);
    };

    let mut manager = Manager::new();
    manager.set_enable_graph_timings(setup.graph_timing_enable);
    if let Err(error) = manager.initialize(module_path, graph_config_path) {
        error!(%error, "failed to initialize module manager");
        process::exit(1);
    }

    manager.start();
    manager.run();
    manager.shutdown();
    info!("clean shutdown");
}
