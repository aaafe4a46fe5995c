//! Demo plugin: validates that declared parameters arrive over the bus.
//!
//! Declare it in a pipeline like so:
//!
//! ```json
//! { "main": { "tester": {
//!     "type": "TestModule",
//!     "thing1": 0.25,
//!     "thing2": "thing2",
//!     "thing3": 2503
//! } } }
//! ```

use std::sync::{Arc, Mutex};

use iris_event_bus::{key, BusHandle, Requirement};
use iris_loader::{declare_module, Module};
use tracing::{error, info};

const VERSION: u32 = 1;

#[derive(Default)]
struct Expected {
    thing1: Option<f64>,
    thing2: Option<String>,
    thing3: Option<u32>,
}

#[derive(Default)]
pub struct TestModule {
    name: String,
    bus: BusHandle,
    expected: Arc<Mutex<Expected>>,
}

impl TestModule {
    pub fn new(_version: u32) -> Self {
        Self::default()
    }
}

impl Module for TestModule {
    fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn subscribe(&mut self, channel: u32) {
        self.bus.set_channel(channel);

        let expected = self.expected.clone();
        self.bus.subscribe::<f64, _>(
            key![&self.name, "::thing1"],
            Requirement::Optional,
            move |v| expected.lock().unwrap().thing1 = Some(*v),
        );

        let expected = self.expected.clone();
        self.bus.subscribe::<String, _>(
            key![&self.name, "::thing2"],
            Requirement::Optional,
            move |v| expected.lock().unwrap().thing2 = Some(v.clone()),
        );

        let expected = self.expected.clone();
        self.bus.subscribe::<u32, _>(
            key![&self.name, "::thing3"],
            Requirement::Optional,
            move |v| expected.lock().unwrap().thing3 = Some(*v),
        );
    }

    fn initialize(&mut self) {
        info!(module = %self.name, "initializing test module");
        let expected = self.expected.lock().unwrap();

        // Missing parameters mean the host never delivered the document
        // values; that is exactly what this module exists to catch.
        if expected.thing1 != Some(0.25) {
            error!(value = ?expected.thing1, "float parameter failed to set");
            std::process::exit(1);
        }
        if expected.thing2.as_deref() != Some("thing2") {
            error!(value = ?expected.thing2, "string parameter failed to set");
            std::process::exit(1);
        }
        if expected.thing3 != Some(2503) {
            error!(value = ?expected.thing3, "integer parameter failed to set");
            std::process::exit(1);
        }
    }

    fn execute(&mut self) {}

    fn shutdown(&mut self) {}
}

declare_module!("TestModule", VERSION, TestModule::new);
