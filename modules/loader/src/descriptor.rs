//! Versioned module factories

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::{debug, warn};

use crate::error::{LoaderError, LoaderResult};
use crate::module::{
    DestroyFn, MakeFn, Module, NameFn, VersionFn, DESTROY_SYMBOL, MAKE_SYMBOL, NAME_SYMBOL,
    VERSION_SYMBOL,
};

/// Where one version of a module type comes from.
#[derive(Clone)]
enum Factory {
    /// A probed shared library; `make`/`destroy` are re-resolved per call so
    /// the library handle stays the single owner of the code.
    Shared { library: Arc<Library> },
    /// A statically linked factory registered in-process.
    Builtin { make: fn(u32) -> Box<dyn Module> },
}

/// A versioned factory for one module type.
///
/// Libraries reporting the same `name()` merge into a single descriptor,
/// indexed by their declared `version()`; the highest version is "latest"
/// and is what version `0` selects. An empty descriptor creates nothing.
#[derive(Clone, Default)]
pub struct Descriptor {
    name: String,
    versions: BTreeMap<u32, Factory>,
    latest: u32,
}

impl Descriptor {
    /// An empty descriptor for `name`; [`Descriptor::create`] returns `None`
    /// until a version is added.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: BTreeMap::new(),
            latest: 0,
        }
    }

    /// A descriptor backed by an in-process factory, for statically linked
    /// module types.
    pub fn builtin(name: impl Into<String>, version: u32, make: fn(u32) -> Box<dyn Module>) -> Self {
        let mut descriptor = Self::empty(name);
        descriptor.versions.insert(version, Factory::Builtin { make });
        descriptor.latest = version;
        descriptor
    }

    /// Add another in-process version to this descriptor.
    pub fn add_builtin(&mut self, version: u32, make: fn(u32) -> Box<dyn Module>) {
        self.versions.insert(version, Factory::Builtin { make });
        self.latest = self.latest.max(version);
    }

    /// Probe `path` for the module ABI and absorb it as one version of this
    /// type. The library stays open for as long as the descriptor lives.
    pub(crate) fn add_library(&mut self, path: &Path) -> LoaderResult<()> {
        let library = open_library(path)?;

        // Resolve all four symbols up front so a partial ABI is rejected
        // before anything is registered.
        let version_fn: Symbol<'_, VersionFn> = resolve(&library, path, "version", VERSION_SYMBOL)?;
        resolve::<NameFn>(&library, path, "name", NAME_SYMBOL)?;
        resolve::<MakeFn>(&library, path, "make", MAKE_SYMBOL)?;
        resolve::<DestroyFn>(&library, path, "destroy", DESTROY_SYMBOL)?;

        // SAFETY: the symbol matches the ABI's `version` signature.
        let version = unsafe { version_fn() };
        drop(version_fn);

        debug!(
            path = %path.display(),
            name = %self.name,
            version,
            "loaded shared library"
        );

        self.latest = self.latest.max(version);
        self.versions
            .entry(version)
            .or_insert(Factory::Shared { library: Arc::new(library) });
        Ok(())
    }

    /// The module type this descriptor creates.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The highest registered version, or 0 when empty.
    pub fn latest(&self) -> u32 {
        self.latest
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Create a new module instance. Version `0` selects "latest"; an
    /// unknown version creates nothing.
    pub fn create(&self, version: u32) -> Option<Box<dyn Module>> {
        let version = if version == 0 { self.latest } else { version };
        match self.versions.get(&version)? {
            Factory::Builtin { make } => Some(make(version)),
            Factory::Shared { library } => {
                // SAFETY: `make` was verified against the ABI at load time
                // and the library outlives the descriptor's Arc.
                unsafe {
                    let make: Symbol<'_, MakeFn> = library.get(MAKE_SYMBOL).ok()?;
                    let raw = make(version);
                    if raw.is_null() {
                        None
                    } else {
                        Some(Box::from_raw(raw))
                    }
                }
            }
        }
    }

    /// Release a module created by this descriptor. An unknown version still
    /// releases the instance through the generic drop path so nothing leaks.
    pub fn destroy(&self, module: Box<dyn Module>, version: u32) {
        let version = if version == 0 { self.latest } else { version };
        match self.versions.get(&version) {
            Some(Factory::Shared { library }) => {
                // SAFETY: the instance was produced by this library's `make`;
                // handing the raw pointer back to its `destroy` keeps
                // allocation and release on the same side.
                unsafe {
                    match library.get::<DestroyFn>(DESTROY_SYMBOL) {
                        Ok(destroy) => destroy(Box::into_raw(module)),
                        Err(error) => {
                            warn!(%error, "destroy symbol vanished; releasing generically");
                            drop(module);
                        }
                    }
                }
            }
            Some(Factory::Builtin { .. }) | None => drop(module),
        }
    }
}

fn open_library(path: &Path) -> LoaderResult<Library> {
    // SAFETY: library initializers run on open; the module ABI requires
    // them to be side-effect free.
    unsafe {
        Library::new(path).map_err(|source| LoaderError::Open {
            path: path.to_owned(),
            source,
        })
    }
}

fn resolve<'lib, T>(
    library: &'lib Library,
    path: &Path,
    symbol: &'static str,
    raw: &[u8],
) -> LoaderResult<Symbol<'lib, T>> {
    // SAFETY: callers pair `raw` with the matching ABI function type.
    unsafe {
        library.get(raw).map_err(|source| LoaderError::MissingSymbol {
            path: path.to_owned(),
            symbol,
            source,
        })
    }
}

/// Probe a library for its exported `name()`.
pub(crate) fn probe_name(path: &Path) -> LoaderResult<String> {
    let library = open_library(path)?;
    let name_fn: Symbol<'_, NameFn> = resolve(&library, path, "name", NAME_SYMBOL)?;

    // SAFETY: the ABI requires `name` to return a NUL-terminated string with
    // static lifetime.
    let name = unsafe { CStr::from_ptr(name_fn()) };
    let name = name
        .to_str()
        .map_err(|e| LoaderError::InvalidName {
            path: path.to_owned(),
            reason: e.to_string(),
        })?
        .to_owned();

    if name.is_empty() {
        return Err(LoaderError::InvalidName {
            path: path.to_owned(),
            reason: "empty name".into(),
        });
    }
    Ok(name)
}
