//! `RunContext`: the process-wide state that replaces the original's global singletons (program
//! name, pid file path, uid/gid, logging facility), built once in `main` and passed by `Arc`.

use crate::config::LogFacility;
use std::path::PathBuf;

pub struct RunContext {
    pub program_name: String,
    pub pid_path: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub logfacility: LogFacility,
    pub logfile: PathBuf,
}

impl RunContext {
    pub fn new(
        program_name: impl Into<String>,
        pid_path: Option<PathBuf>,
        uid: u32,
        gid: u32,
        logfacility: LogFacility,
        logfile: PathBuf,
    ) -> Self {
        let program_name = program_name.into();
        let pid_path =
            pid_path.unwrap_or_else(|| PathBuf::from(format!("/var/run/{program_name}.pid")));
        Self {
            program_name,
            pid_path,
            uid,
            gid,
            logfacility,
            logfile,
        }
    }
}
