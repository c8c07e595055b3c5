//! Process-wide code cache root.
//!
//! Every bridge in the process shares one root directory. The first bridge
//! that resolves it wins; later bridges reuse the stored path whatever base
//! directory they were configured with.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const CODE_CACHE_DIR_NAME: &str = "codecache";

/// The root used by bridges that are not given their own.
pub static PROCESS_CODE_CACHE: CodeCacheRoot = CodeCacheRoot::new();

pub struct CodeCacheRoot {
    root: Mutex<Option<PathBuf>>,
}

impl Default for CodeCacheRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeCacheRoot {
    pub const fn new() -> Self {
        Self {
            root: Mutex::new(None),
        }
    }

    /// Resolve the root under `base`, or return the one already resolved.
    ///
    /// A failed attempt stores nothing, so a later bridge may try again.
    pub fn resolve(&self, base: Option<&Path>) -> Option<PathBuf> {
        let mut root = match self.root.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Code cache root mutex poisoned - recovering");
                poisoned.into_inner()
            }
        };
        if let Some(existing) = root.as_ref() {
            return Some(existing.clone());
        }

        let dir = base?.join(CODE_CACHE_DIR_NAME);
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(path = %dir.display(), "Resolved code cache root");
                *root = Some(dir.clone());
                Some(dir)
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Cannot create code cache root");
                None
            }
        }
    }

    pub fn get(&self) -> Option<PathBuf> {
        match self.root.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Create (if needed) and return `<root>/<tag>/`.
pub fn prepare_tag_dir(root: &Path, tag: &str) -> io::Result<PathBuf> {
    let is_plain_name = !tag.is_empty()
        && tag != "."
        && tag != ".."
        && !tag.contains(['/', '\\']);
    if !is_plain_name {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid code cache tag {tag:?}"),
        ));
    }
    let dir = root.join(tag);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
