//! Dynamic plugin image loading.
//!
//! A plugin image is a `cdylib` exporting the fixed-name entry point.
//! [`PluginImage`] keeps the library mapped for as long as any Action
//! type or instance still reaches into it; the registry hands an
//! `Arc<PluginImage>` to everything that does.

use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;
use tracing::info;

use axon_abi::{PLUGIN_ENTRY_SYMBOL, PluginEntryFn};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to load plugin image '{path}': {source}")]
    Open {
        path: PathBuf,
        source: libloading::Error,
    },
    #[error("plugin image '{path}' does not export the entry symbol: {source}")]
    MissingEntry {
        path: PathBuf,
        source: libloading::Error,
    },
    #[error("failed to read plugin directory '{path}': {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A mapped plugin shared library.
#[derive(Debug)]
pub struct PluginImage {
    library: Library,
    path: PathBuf,
}

impl PluginImage {
    /// Map the image and verify it exports the entry symbol.
    ///
    /// # Safety
    /// Loading a shared library runs its initializers; only trusted
    /// plugin images may be loaded.
    pub unsafe fn load(path: &Path) -> Result<Self, LoaderError> {
        info!(path = %path.display(), "loading plugin image");
        // SAFETY: per the function contract.
        let library = unsafe { Library::new(path) }.map_err(|source| LoaderError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let image = Self {
            library,
            path: path.to_path_buf(),
        };
        // Fail early if the symbol is absent.
        image.entry()?;
        Ok(image)
    }

    /// The image's entry point.
    pub fn entry(&self) -> Result<PluginEntryFn, LoaderError> {
        // SAFETY: the symbol type is fixed by the ABI contract shared
        // with the plugin.
        let symbol = unsafe {
            self.library
                .get::<PluginEntryFn>(PLUGIN_ENTRY_SYMBOL)
                .map_err(|source| LoaderError::MissingEntry {
                    path: self.path.clone(),
                    source,
                })?
        };
        Ok(*symbol)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Shared-library extension of the current platform.
pub const PLUGIN_EXTENSION: &str = if cfg!(target_os = "windows") {
    "dll"
} else if cfg!(target_os = "macos") {
    "dylib"
} else {
    "so"
};

/// List the plugin image candidates in a directory, sorted by file
/// name for deterministic load order.
pub fn discover_plugins(dir: &Path) -> Result<Vec<PathBuf>, LoaderError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoaderError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == PLUGIN_EXTENSION))
        .collect();
    paths.sort();
    Ok(paths)
}
