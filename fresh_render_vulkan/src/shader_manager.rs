/// ShaderManager - SPIR-V files loaded from disk, with optional hot reload
///
/// Every loaded file is remembered with its modification time. With hot
/// reload on, files whose time moved are reported and can be read again.

use fresh_render::fresh::{Error, Result};
use fresh_render::{engine_debug, engine_error, engine_info};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::vulkan_util::{spirv_words, SOURCE};

pub struct ShaderManager {
    hot_reload: bool,
    loaded: FxHashMap<PathBuf, SystemTime>,
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).map_err(|e| {
        engine_error!(SOURCE, "Cannot stat shader '{}': {}", path.display(), e);
        Error::ShaderCompilation(format!("{}: {}", path.display(), e))
    })
}

impl ShaderManager {
    pub fn new(hot_reload: bool) -> Self {
        Self {
            hot_reload,
            loaded: FxHashMap::default(),
        }
    }

    pub fn is_hot_reload_enabled(&self) -> bool {
        self.hot_reload
    }

    pub fn set_hot_reload(&mut self, enabled: bool) {
        self.hot_reload = enabled;
    }

    /// Number of files loaded so far
    pub fn tracked_count(&self) -> usize {
        self.loaded.len()
    }

    /// Read a SPIR-V file and remember its modification time
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<Vec<u32>> {
        let path = path.as_ref();
        let modified = modified_time(path)?;
        let bytes = std::fs::read(path).map_err(|e| {
            engine_error!(SOURCE, "Cannot read shader '{}': {}", path.display(), e);
            Error::ShaderCompilation(format!("{}: {}", path.display(), e))
        })?;
        let words = spirv_words(&bytes).map_err(|e| {
            engine_error!(SOURCE, "'{}' is not SPIR-V: {}", path.display(), e);
            e
        })?;

        self.loaded.insert(path.to_path_buf(), modified);
        engine_debug!(SOURCE, "Loaded '{}' ({} words)", path.display(), words.len());
        Ok(words)
    }

    /// Loaded files changed on disk since they were read, sorted by path
    ///
    /// Always empty with hot reload off. A file that can no longer be
    /// stat'ed is not reported.
    pub fn check_for_changes(&self) -> Vec<PathBuf> {
        if !self.hot_reload {
            return Vec::new();
        }
        let mut changed: Vec<PathBuf> = self
            .loaded
            .iter()
            .filter(|(path, recorded)| {
                std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .is_ok_and(|modified| modified > **recorded)
            })
            .map(|(path, _)| path.clone())
            .collect();
        changed.sort();
        changed
    }

    /// Read every changed file again
    ///
    /// Stops at the first file that fails to load; files reloaded before it
    /// keep their new times.
    pub fn reload_modified(&mut self) -> Result<Vec<(PathBuf, Vec<u32>)>> {
        let changed = self.check_for_changes();
        let mut reloaded = Vec::with_capacity(changed.len());
        for path in changed {
            let words = self.load(&path)?;
            engine_info!(SOURCE, "Hot-reloaded '{}'", path.display());
            reloaded.push((path, words));
        }
        Ok(reloaded)
    }
}

impl Default for ShaderManager {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
#[path = "shader_manager_tests.rs"]
mod tests;
