//! Per-host provisioning pipeline.
//!
//! For each host, in order: connect, detect the architecture, build the
//! binary on a cache miss, upload it, make it executable, run it and store
//! what it printed. The first error ends the whole run; files already
//! written for earlier hosts stay on disk.

use crate::builder::{ArtifactBuilder, CommandRunner};
use crate::cache::BuildCache;
use crate::config::{Config, HostTarget, SourceRepos};
use crate::error::Result;
use crate::remote::{self, Connector, RemoteSession};
use crate::toolchain::{SearchPath, ToolchainTable};
use log::{debug, info};
use std::path::PathBuf;

/// What happened on one host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostOutcome {
    pub host: String,
    pub arch: String,
    /// True when the cached binary was reused without building
    pub cache_hit: bool,
    pub output_file: PathBuf,
    pub error_file: PathBuf,
}

/// Outcomes of a run that completed on every host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub hosts: Vec<HostOutcome>,
}

impl RunReport {
    pub fn builds(&self) -> usize {
        self.hosts.iter().filter(|h| !h.cache_hit).count()
    }
}

pub struct Pipeline<'a, C: Connector, R: CommandRunner> {
    connector: &'a C,
    runner: &'a R,
    cache: BuildCache,
    toolchains: ToolchainTable,
    search_path: SearchPath,
    sources: SourceRepos,
    remote_path: String,
}

impl<'a, C: Connector, R: CommandRunner> Pipeline<'a, C, R> {
    /// Creates a pipeline searching compilers on the process `PATH`.
    pub fn new(config: &Config, connector: &'a C, runner: &'a R) -> Self {
        Self {
            connector,
            runner,
            cache: BuildCache::new(config.cache_root()),
            toolchains: config.toolchain_table(),
            search_path: SearchPath::from_env(),
            sources: config.sources.clone(),
            remote_path: config.remote_path.clone(),
        }
    }

    pub fn with_search_path(mut self, search_path: SearchPath) -> Self {
        self.search_path = search_path;
        self
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Processes every host in order, stopping at the first failure.
    pub fn run(&self, targets: &[HostTarget]) -> Result<RunReport> {
        let mut report = RunReport::default();
        for target in targets {
            report.hosts.push(self.process_host(target)?);
        }
        info!(
            "Completed {} host(s), {} build(s)",
            report.hosts.len(),
            report.builds()
        );
        Ok(report)
    }

    pub fn process_host(&self, target: &HostTarget) -> Result<HostOutcome> {
        println!("Connecting to {}", target.host);
        let mut session = self.connector.connect(target)?;

        let arch = remote::detect_arch(&mut session)?;
        println!("Host {} reports {} machinetype", target.host, arch);

        let (binary, cache_hit) = self.ensure_binary(&arch)?;

        session.upload(&binary, &self.remote_path)?;
        session.run(&format!("chmod +x {}", self.remote_path))?;

        let result = session.run(&self.remote_path)?;
        debug!(
            "{} produced {} bytes of output, {} bytes of errors",
            target.host,
            result.stdout.len(),
            result.stderr.len()
        );

        let (output_file, error_file) =
            self.cache
                .store_output(&target.host, &result.stdout, &result.stderr)?;
        println!("Extracted data into {}", output_file.display());

        Ok(HostOutcome {
            host: target.host.clone(),
            arch,
            cache_hit,
            output_file,
            error_file,
        })
    }

    /// Returns the cached binary for `arch`, building it first on a miss.
    fn ensure_binary(&self, arch: &str) -> Result<(PathBuf, bool)> {
        if self.cache.has_binary(arch) {
            info!("Reusing cached binary for {}", arch);
            return Ok((self.cache.binary_path(arch), true));
        }

        let candidates = self.toolchains.candidates(arch)?;
        let compiler = self.search_path.resolve(arch, candidates)?;

        let builder = ArtifactBuilder::new(&self.cache, &self.sources, self.runner);
        let binary = builder.build(arch, &compiler)?;
        Ok((binary, false))
    }
}
