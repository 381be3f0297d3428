use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlotfetchError {
    #[error("{0}")]
    Usage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to successfully connect to {host}: {reason}\naborting remaining operations")]
    ConnectionFailed { host: String, reason: String },

    #[error("Unable to run `{command}` on {host}: {reason}")]
    CommandFailed {
        host: String,
        command: String,
        reason: String,
    },

    #[error(
        "Unknown host type '{0}'. Configure a cross-compiler for it and add it to the toolchains table"
    )]
    UnknownArchitecture(String),

    #[error("Appropriate compiler for {arch} not found. Install one of the following compilers and rerun:\n{}",
        .candidates.iter().map(|c| format!(" * {}", c)).collect::<Vec<_>>().join("\n"))]
    NoCompilerFound {
        arch: String,
        candidates: Vec<String>,
    },

    #[error("Failed the libjansson build for {arch} (missing {artifact}); build plotnetcfg manually and save it as {cached}")]
    DependencyBuildFailed {
        arch: String,
        artifact: String,
        cached: String,
    },

    #[error("Failure building plotnetcfg for {arch} (missing {artifact}); rebuild manually and place it in {cached}")]
    ToolBuildFailed {
        arch: String,
        artifact: String,
        cached: String,
    },
}

pub type Error = PlotfetchError;
pub type Result<T> = std::result::Result<T, Error>;
