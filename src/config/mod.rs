//! Configuration management for plotfetch.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! environment variables and command-line flags (applied by the CLI layer).
//!
//! # Configuration File Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/plotfetch/config.yml`
//! - macOS: `~/Library/Application Support/plotfetch/config.yml`
//!
//! # Example Configuration
//!
//! ```yaml
//! port: 2222
//! remote_path: "/tmp/plotnetcfg.bin"
//! cache_dir: "/var/cache/plotfetch"
//! sources:
//!   tool: "https://github.com/jbenc/plotnetcfg"
//!   dependency: "https://github.com/akheron/jansson"
//! toolchains:
//!   aarch64:
//!     - aarch64-linux-gnu-gcc
//!   arm:
//!     - arm-linux-gnueabihf-gcc
//!     - arm-linux-gnu-gcc
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::toolchain::ToolchainTable;

/// Default SSH port
const DEFAULT_SSH_PORT: u16 = 22;

/// Where the binary is placed on every remote host
pub const DEFAULT_REMOTE_PATH: &str = "/tmp/plotnetcfg.bin";

/// Upstream of the diagnostic tool
pub const DEFAULT_TOOL_REPO: &str = "https://github.com/jbenc/plotnetcfg";

/// Upstream of the JSON library the tool links against
pub const DEFAULT_DEPENDENCY_REPO: &str = "https://github.com/akheron/jansson";

/// Main configuration structure for plotfetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SSH port used for every host
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Upload destination on the remote hosts
    #[serde(default = "default_remote_path")]
    pub remote_path: String,

    /// Root directory holding the `<arch>_build` and `<host>_build` trees
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Git repositories cloned on a cache miss
    #[serde(default)]
    pub sources: SourceRepos,

    /// Extra or replacement architecture -> compiler candidate entries, in
    /// file order
    #[serde(default)]
    pub toolchains: ToolchainTable,
}

/// Git URLs for the two source trees the build needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRepos {
    #[serde(default = "default_tool_repo")]
    pub tool: String,

    #[serde(default = "default_dependency_repo")]
    pub dependency: String,
}

/// Credentials supplied for the whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<String>,
}

/// One host to provision, immutable for the run.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTarget {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_remote_path() -> String {
    DEFAULT_REMOTE_PATH.to_string()
}

fn default_tool_repo() -> String {
    DEFAULT_TOOL_REPO.to_string()
}

fn default_dependency_repo() -> String {
    DEFAULT_DEPENDENCY_REPO.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            remote_path: default_remote_path(),
            cache_dir: None,
            sources: SourceRepos::default(),
            toolchains: ToolchainTable::default(),
        }
    }
}

impl Default for SourceRepos {
    fn default() -> Self {
        Self {
            tool: default_tool_repo(),
            dependency: default_dependency_repo(),
        }
    }
}

impl Config {
    /// Returns the default configuration file path for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("plotfetch").join("config.yml"))
    }

    /// Loads configuration from the default location.
    ///
    /// Returns `Ok(Config::default())` if no config file exists.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    /// Loads configuration from a specific file path.
    ///
    /// Returns `Ok(Config::default())` if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}\n\n\
                 Suggestions:\n\
                 • Check file permissions: ls -la {}\n\
                 • Verify the file is readable",
                path.display(),
                e,
                path.display()
            ))
        })?;

        Self::from_yaml(&contents).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Parses a configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Config::default());
        }

        serde_yaml::from_str(contents).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file: {}\n\n\
                 Suggestions:\n\
                 • Check YAML syntax in the config file\n\
                 • Verify indentation uses spaces, not tabs\n\
                 • Toolchain entries map an architecture to a list of compiler names",
                e
            ))
        })
    }

    /// Directory under which all build and output trees are created.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Built-in compiler table with this file's entries layered on top.
    pub fn toolchain_table(&self) -> ToolchainTable {
        let mut table = ToolchainTable::builtin();
        for (arch, candidates) in self.toolchains.entries() {
            table.insert(arch.to_string(), candidates.to_vec());
        }
        table
    }
}

impl Credentials {
    /// Username to authenticate as, falling back to the local login name.
    pub fn username(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("LOGNAME").ok())
            .unwrap_or_else(|| "root".to_string())
    }

    /// Expands the key-file path, replacing ~ with the home directory.
    pub fn expanded_key_file(&self) -> Option<PathBuf> {
        self.key_file.as_ref().map(|key| {
            if let Some(stripped) = key.strip_prefix("~/") {
                if let Some(home) = dirs::home_dir() {
                    return home.join(stripped);
                }
            }
            PathBuf::from(key)
        })
    }
}

impl HostTarget {
    pub fn new(host: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port,
            credentials,
        }
    }

    /// Returns the SSH connection string (user@host or user@host:port).
    pub fn connection_string(&self) -> String {
        let user = self.credentials.username();
        if self.port == DEFAULT_SSH_PORT {
            format!("{}@{}", user, self.host)
        } else {
            format!("{}@{}:{}", user, self.host, self.port)
        }
    }
}
