//! Per-architecture build cache on local disk.
//!
//! Layout under the cache root:
//!
//! ```text
//! <arch>_build/plotnetcfg/      cloned tool sources
//! <arch>_build/jansson/         cloned dependency sources
//! <arch>_build/plotnetcfg.bin   cached binary, the only memoization signal
//! <host>_build/plotnetcfg.out   captured remote stdout
//! <host>_build/plotnetcfg.err   captured remote stderr
//! ```
//!
//! Entries are never invalidated. A truncated binary left by an aborted run
//! counts as a hit until someone deletes it by hand.

use crate::error::Result;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

pub const BINARY_NAME: &str = "plotnetcfg.bin";
pub const TOOL_DIR: &str = "plotnetcfg";
pub const DEPENDENCY_DIR: &str = "jansson";
pub const OUTPUT_NAME: &str = "plotnetcfg.out";
pub const ERROR_NAME: &str = "plotnetcfg.err";

#[derive(Debug, Clone)]
pub struct BuildCache {
    root: PathBuf,
}

impl BuildCache {
    /// Relative roots are resolved against the current directory once, so
    /// build steps running in other working directories see the same tree.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn arch_dir(&self, arch: &str) -> PathBuf {
        self.root.join(format!("{}_build", arch))
    }

    pub fn binary_path(&self, arch: &str) -> PathBuf {
        self.arch_dir(arch).join(BINARY_NAME)
    }

    pub fn tool_dir(&self, arch: &str) -> PathBuf {
        self.arch_dir(arch).join(TOOL_DIR)
    }

    pub fn dependency_dir(&self, arch: &str) -> PathBuf {
        self.arch_dir(arch).join(DEPENDENCY_DIR)
    }

    /// True iff a cached binary exists for `arch`. Contents are not checked.
    pub fn has_binary(&self, arch: &str) -> bool {
        let hit = self.binary_path(arch).exists();
        debug!("Build cache {} for {}", if hit { "hit" } else { "miss" }, arch);
        hit
    }

    /// Creates `<arch>_build/` if absent.
    pub fn ensure_dir(&self, arch: &str) -> Result<PathBuf> {
        let dir = self.arch_dir(arch);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn host_dir(&self, host: &str) -> PathBuf {
        self.root.join(format!("{}_build", host))
    }

    /// Writes the captured streams of one host, returning both file paths.
    pub fn store_output(&self, host: &str, stdout: &[u8], stderr: &[u8]) -> Result<(PathBuf, PathBuf)> {
        let dir = self.host_dir(host);
        fs::create_dir_all(&dir)?;

        let out_path = dir.join(OUTPUT_NAME);
        let err_path = dir.join(ERROR_NAME);
        fs::write(&out_path, stdout)?;
        fs::write(&err_path, stderr)?;
        Ok((out_path, err_path))
    }
}
