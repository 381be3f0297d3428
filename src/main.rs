use anyhow::Result;
use clap::Parser;

use plotfetch::cli::run::RunCommand;

fn main() -> Result<()> {
    let cmd = match RunCommand::try_parse() {
        Ok(cmd) => cmd,
        Err(e) => {
            // Usage errors exit 1; --help and --version exit 0
            let code = if e.use_stderr() { 1 } else { 0 };
            e.print().ok();
            std::process::exit(code);
        }
    };

    let default_level = if cmd.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    cmd.execute()
}
