//! Configuration files: atomic reads and on-disk change detection

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::token::Token;

/// Change reports are held back until the file has been quiet this long, so
/// an editor's truncate-then-write save triggers one reload, not two.
const MODIFY_DEBOUNCE: Duration = Duration::from_millis(10);

/// A parsed configuration document tied to its file on disk.
pub struct Configuration {
    path: Option<PathBuf>,
    root: Option<Token>,
    mtime: Option<SystemTime>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self {
            path: None,
            root: None,
            mtime: None,
        }
    }

    /// Read and parse `path`, remembering its modification time.
    ///
    /// A writer replacing the live file can race the read; a parse failure
    /// is retried once before it is reported.
    pub fn initialize(&mut self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();

        let root = match read_document(path) {
            Ok(root) => root,
            Err(first) => {
                warn!(path = %path.display(), error = %first, "config read failed, retrying once");
                std::thread::sleep(Duration::from_millis(5));
                read_document(path)?
            }
        };

        self.mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
        self.path = Some(path.to_owned());
        self.root = Some(root);
        debug!(path = %path.display(), "configuration parsed");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.root.is_some()
    }

    /// The root token of the parsed document.
    pub fn begin(&self) -> Token {
        self.root.clone().unwrap_or_else(Token::null)
    }

    /// Whether the file changed on disk since the last report.
    ///
    /// Arms itself on detection: returns true at most once per underlying
    /// mtime change. Reports are debounced until the newest write is at
    /// least [`MODIFY_DEBOUNCE`] old.
    pub fn modified(&mut self) -> bool {
        let Some(path) = self.path.as_deref() else {
            return false;
        };
        let Ok(current) = fs::metadata(path).and_then(|m| m.modified()) else {
            return false;
        };
        if Some(current) == self.mtime {
            return false;
        }

        // Let a burst of writes settle before reporting.
        match current.elapsed() {
            Ok(age) if age >= MODIFY_DEBOUNCE => {
                self.mtime = Some(current);
                true
            }
            _ => false,
        }
    }

    /// Discard parsed state; the path and change tracking are kept so the
    /// document can be re-initialized.
    pub fn reset(&mut self) {
        self.root = None;
    }

    /// The file this configuration was parsed from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn read_document(path: &Path) -> ConfigResult<Token> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    let value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })?;
    Ok(Token::new(value))
}
