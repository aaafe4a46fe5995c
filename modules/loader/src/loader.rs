//! Module discovery over a directory of shared libraries

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::descriptor::{probe_name, Descriptor};

/// File extensions treated as dynamic libraries.
const DYLIB_EXTENSIONS: &[&str] = &["so", "dll", "dylib"];

fn is_dylib(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DYLIB_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Discovers module libraries on disk and hands out their descriptors.
///
/// Libraries reporting the same `name()` merge into one [`Descriptor`]
/// indexed by version. A library that fails to open or is missing part of
/// the ABI is logged and skipped; discovery itself never fails.
#[derive(Default)]
pub struct Loader {
    descriptors: HashMap<String, Descriptor>,
    module_directory: Option<PathBuf>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `path` recursively (following symlinks) and absorb every dynamic
    /// library found into the descriptor table.
    pub fn initialize(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        info!(path = %path.display(), "loading modules");
        self.module_directory = Some(path.to_owned());

        for entry in WalkDir::new(path).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(%error, "skipping unreadable directory entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_dylib(entry.path()) {
                self.add_library(entry.path());
            }
        }
    }

    fn add_library(&mut self, path: &Path) {
        let name = match probe_name(path) {
            Ok(name) => name,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping library");
                return;
            }
        };

        let descriptor = self
            .descriptors
            .entry(name.clone())
            .or_insert_with(|| Descriptor::empty(name.clone()));
        if let Err(error) = descriptor.add_library(path) {
            warn!(path = %path.display(), %error, "skipping library");
        }
    }

    /// Register an in-process descriptor, replacing any existing descriptor
    /// of the same type name.
    pub fn register(&mut self, descriptor: Descriptor) {
        self.descriptors
            .insert(descriptor.name().to_owned(), descriptor);
    }

    /// The descriptor for a module type, or an empty descriptor that creates
    /// nothing when the type is unknown.
    pub fn descriptor(&self, module_type: &str) -> Descriptor {
        self.descriptors
            .get(module_type)
            .cloned()
            .unwrap_or_else(|| Descriptor::empty(module_type))
    }

    pub fn has_descriptor(&self, module_type: &str) -> bool {
        self.descriptors.contains_key(module_type)
    }

    /// Drop all descriptors and close their libraries. Every module created
    /// through them must already be destroyed.
    pub fn reset(&mut self) {
        self.descriptors.clear();
    }
}

/// Open every file under `path` as a shared library and keep it loaded.
///
/// Used by the driver to pre-load dependencies module libraries link
/// against. Files that are not loadable are skipped with a warning.
pub fn preload_dependencies(path: impl AsRef<Path>) -> Vec<Library> {
    let mut libraries = Vec::new();
    for entry in WalkDir::new(path.as_ref()).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%error, "skipping unreadable dependency entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        info!(path = %entry.path().display(), "loading specified dependency");
        // SAFETY: dependency initializers run on open, as they would under
        // the platform loader.
        match unsafe { Library::new(entry.path()) } {
            Ok(library) => libraries.push(library),
            Err(error) => warn!(path = %entry.path().display(), %error, "failed to pre-load"),
        }
    }
    libraries
}
