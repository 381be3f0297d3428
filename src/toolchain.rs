//! Cross-compiler resolution.
//!
//! Maps the machine type a host reports to the compilers able to target it,
//! then looks for the first of those on the local search path.

use crate::error::{Error, Result};
use log::{debug, info};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

/// Ordered architecture -> compiler candidates table.
///
/// Candidate order expresses preference. Some cross toolchains (Code Sourcery
/// among them) don't follow an algorithmic naming scheme, so every name is
/// listed explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolchainTable {
    entries: Vec<(String, Vec<String>)>,
}

impl ToolchainTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (arch, candidates) in [
            ("x86_64", &["x86_64-linux-gnu-gcc", "x86_64-redhat-linux-gcc"][..]),
            ("i686", &["i686-linux-gnu-gcc", "i686-redhat-linux-gcc"][..]),
            ("i386", &["i386-linux-gnu-gcc", "i386-redhat-linux-gcc"][..]),
            ("arm", &["arm-linux-gnu-gcc"][..]),
        ] {
            table.insert(
                arch.to_string(),
                candidates.iter().map(|c| c.to_string()).collect(),
            );
        }
        table
    }

    /// Adds an entry, replacing the candidates of an existing tag in place.
    pub fn insert(&mut self, arch: String, candidates: Vec<String>) {
        match self.entries.iter_mut().find(|(tag, _)| *tag == arch) {
            Some((_, existing)) => *existing = candidates,
            None => self.entries.push((arch, candidates)),
        }
    }

    /// Compiler candidates for a tag, used verbatim as the lookup key.
    pub fn candidates(&self, arch: &str) -> Result<&[String]> {
        self.entries
            .iter()
            .find(|(tag, _)| tag == arch)
            .map(|(_, candidates)| candidates.as_slice())
            .filter(|candidates| !candidates.is_empty())
            .ok_or_else(|| Error::UnknownArchitecture(arch.to_string()))
    }

    pub fn architectures(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(tag, _)| tag.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(tag, candidates)| (tag.as_str(), candidates.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Written as a YAML mapping; entry order is kept both ways.
impl Serialize for ToolchainTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (tag, candidates) in &self.entries {
            map.serialize_entry(tag, candidates)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ToolchainTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ToolchainTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from architecture to a list of compiler names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut table = ToolchainTable::default();
                while let Some((tag, candidates)) = access.next_entry::<String, Vec<String>>()? {
                    table.insert(tag, candidates);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

/// Directories searched for compiler executables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Builds the search path from the `PATH` environment variable.
    pub fn from_env() -> Self {
        std::env::var_os("PATH")
            .map(|paths| Self::parse(&paths))
            .unwrap_or_default()
    }

    /// Splits a PATH-style value, dropping surrounding double quotes.
    pub fn parse(paths: &OsStr) -> Self {
        let dirs = std::env::split_paths(paths)
            .map(|dir| match dir.to_str() {
                Some(s) => PathBuf::from(s.trim_matches('"')),
                None => dir,
            })
            .collect();
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Finds the first candidate present anywhere on the path.
    ///
    /// Candidates are the outer loop: a later candidate never wins over an
    /// earlier one, even if it sits in an earlier directory.
    pub fn resolve(&self, arch: &str, candidates: &[String]) -> Result<PathBuf> {
        for candidate in candidates {
            for dir in &self.dirs {
                let full_path = dir.join(candidate);
                if is_executable(&full_path) {
                    info!("Using compiler {} for {}", full_path.display(), arch);
                    return Ok(absolute(full_path));
                }
            }
            debug!("Compiler candidate {} not on search path", candidate);
        }

        Err(Error::NoCompilerFound {
            arch: arch.to_string(),
            candidates: candidates.to_vec(),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&path))
        .unwrap_or(path)
}
