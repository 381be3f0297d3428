//! Command-line entry: provision and run plotnetcfg on a list of hosts.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::builder::SystemRunner;
use crate::config::{Config, Credentials, HostTarget};
use crate::pipeline::Pipeline;
use crate::remote::SshConnector;

#[derive(Parser, Debug)]
#[command(name = "plotfetch")]
#[command(
    about = "Connect to hosts, deploy a statically built plotnetcfg and collect its output",
    long_about = "Connect to each host in turn, detect its machine type, cross-build \
                  plotnetcfg for it (cached per architecture under <arch>_build/), upload \
                  and run it, and save its output to <host>_build/plotnetcfg.out and \
                  plotnetcfg.err. The first failure aborts the remaining hosts."
)]
pub struct RunCommand {
    /// Hosts to connect to, processed in order
    #[arg(required = true, num_args = 1.., value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Username to use when connecting
    #[arg(short, long, env = "PLOT_USER")]
    pub user: Option<String>,

    /// Password to use when connecting
    #[arg(short, long, env = "PLOT_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Key file to use for key-based authentication
    #[arg(short, long, env = "PLOT_KEY")]
    pub key: Option<String>,

    /// SSH port (overrides the config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding the build cache and per-host output
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Config file (default: ~/.config/plotfetch/config.yml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Show build output and debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunCommand {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::load()?,
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        Ok(config)
    }

    pub fn targets(&self, config: &Config) -> Vec<HostTarget> {
        let credentials = Credentials {
            user: self.user.clone(),
            password: self.password.clone(),
            key_file: self.key.clone(),
        };
        self.hosts
            .iter()
            .map(|host| HostTarget::new(host.clone(), config.port, credentials.clone()))
            .collect()
    }

    pub fn execute(&self) -> Result<()> {
        let config = self.load_config()?;
        let targets = self.targets(&config);

        let connector = SshConnector::new();
        let runner = SystemRunner::new(self.verbose);
        Pipeline::new(&config, &connector, &runner).run(&targets)?;

        println!("Completed.");
        Ok(())
    }
}
