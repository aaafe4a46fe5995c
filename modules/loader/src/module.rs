//! The module contract and the plugin ABI

use std::os::raw::c_char;

/// The unit of work the scheduler drives.
///
/// A module is created by a [`Descriptor`](crate::Descriptor), enrolls its
/// bus endpoints in [`Module::subscribe`], and is then driven from its own
/// worker thread: `initialize` once, `execute` once per graph tick,
/// `shutdown` before destruction.
pub trait Module: Send {
    /// Receive the instance name this module was declared under. Called
    /// before [`Module::subscribe`]; modules that key their subscriptions by
    /// name store it here.
    fn set_name(&mut self, _name: &str) {}

    /// Enroll this module's bus subscriptions on the given channel. Called
    /// once, at creation, before any configuration parameters are emitted.
    fn subscribe(&mut self, channel: u32);

    /// One-time setup, after the module's parameters have been delivered.
    fn initialize(&mut self);

    /// One tick of work.
    fn execute(&mut self);

    /// Teardown before the module is destroyed.
    fn shutdown(&mut self);
}

/// Exported symbol names every module library must provide.
pub const NAME_SYMBOL: &[u8] = b"name\0";
pub const VERSION_SYMBOL: &[u8] = b"version\0";
pub const MAKE_SYMBOL: &[u8] = b"make\0";
pub const DESTROY_SYMBOL: &[u8] = b"destroy\0";

/// `name() -> *const c_char`: the module type name this library implements.
pub type NameFn = unsafe fn() -> *const c_char;

/// `version() -> u32`: the version this library implements.
pub type VersionFn = unsafe fn() -> u32;

/// `make(u32) -> *mut dyn Module`: construct one instance of the module.
pub type MakeFn = unsafe fn(u32) -> *mut dyn Module;

/// `destroy(*mut dyn Module)`: release an instance created by this library.
pub type DestroyFn = unsafe fn(*mut dyn Module);

/// Emit the four ABI exports for a module library.
///
/// `$make` is a `fn(u32) -> $ty` constructor; the version it receives is the
/// one the descriptor selected.
///
/// ```ignore
/// iris_loader::declare_module!("TestModule", 1, TestModule::new);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($name:literal, $version:expr, $make:path) => {
        /// The module type name this library implements.
        #[no_mangle]
        pub unsafe fn name() -> *const ::std::os::raw::c_char {
            concat!($name, "\0").as_ptr() as *const ::std::os::raw::c_char
        }

        /// The version this library implements.
        #[no_mangle]
        pub unsafe fn version() -> u32 {
            $version
        }

        /// Construct one instance of the module.
        #[no_mangle]
        pub unsafe fn make(version: u32) -> *mut dyn $crate::Module {
            let module: Box<dyn $crate::Module> = Box::new($make(version));
            Box::into_raw(module)
        }

        /// Release an instance created by this library.
        #[no_mangle]
        pub unsafe fn destroy(module: *mut dyn $crate::Module) {
            if !module.is_null() {
                drop(Box::from_raw(module));
            }
        }
    };
}
