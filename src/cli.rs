use clap::Parser;
use std::path::PathBuf;

/// A log-monitoring daemon that fires shell actions on frequency and size thresholds.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file. Required unless a default exists at /etc/<program>.conf.
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write the daemon's own logs to this file, overriding `logfacility`/`logfile` from config.
    #[arg(long, value_name = "PATH")]
    pub logfile: Option<PathBuf>,

    /// Write the daemon's own logs to stdout, overriding `logfacility` from config.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub stdout: bool,

    /// Detach and run as a background daemon.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub daemon: bool,

    /// Raise the default log level from info to debug.
    #[arg(short = 'v', long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Run as this numeric uid after startup (0 = do not switch).
    #[arg(long, value_name = "UID")]
    pub uid: Option<u32>,

    /// Run as this numeric gid after startup (0 = do not switch).
    #[arg(long, value_name = "GID")]
    pub gid: Option<u32>,

    /// Change the working directory to this path before entering the main loop.
    #[arg(long, value_name = "DIR")]
    pub chdir: Option<PathBuf>,

    /// Path to the pid file (default: /var/run/<program>.pid).
    #[arg(long, value_name = "PATH")]
    pub pid: Option<PathBuf>,

    /// Load and validate a configuration file, print the result, and exit 0 on success or 1 on
    /// failure. Does not start the daemon.
    #[arg(long, value_name = "PATH")]
    pub test: Option<PathBuf>,

    /// Apply a regex to each line of stdin and print its capture groups, one line per input line.
    #[arg(long, value_name = "REGEX")]
    pub retest: Option<String>,
}

pub fn parse_args() -> Args {
    Args::parse()
}
