use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchtraceError {
    #[error("Tracer error: {0}")]
    Tracer(#[from] TracerError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Argument contains an interior NUL byte: {0}")]
    InvalidArgument(#[from] std::ffi::NulError),

    #[error("Fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("Waiting for initial stop of {pid} failed: {source}")]
    InitialWait {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("Child {pid} did not stop for the tracer: {status}")]
    UnexpectedInitialStatus { pid: i32, status: String },

    #[error("Setting ptrace options on {pid} failed: {source}")]
    SetOptions {
        pid: i32,
        #[source]
        source: nix::Error,
    },
}

#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Ptrace error on {pid}: {source}")]
    Ptrace {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("Wait failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("Process table exhausted while tracking pid {pid}: {source}")]
    TableExhausted {
        pid: i32,
        #[source]
        source: std::collections::TryReserveError,
    },

    #[error("Architecture not supported: {0}")]
    UnsupportedArch(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WatchtraceError>;
