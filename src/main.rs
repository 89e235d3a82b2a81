// Main application entry point.
// Orchestrates command-line parsing, the signal thread, daemonization, and the Controller loop.

use logwarden::action::ActionQueue;
use logwarden::cli::{self, Args};
use logwarden::config::{Config, LogFacility};
use logwarden::context::RunContext;
use logwarden::controller::Controller;
use logwarden::daemon;
use logwarden::ini::IniFile;
use logwarden::logging;
use logwarden::pidfile;
use logwarden::worker;

use regex::Regex;
use signal_hook::consts::signal::*;
use signal_hook::iterator::Signals;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const DEFAULT_CONFIG_PATH: &str = "/etc/logwarden.conf";

fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn resolve_config_path(args: &Args) -> PathBuf {
    args.config.clone().unwrap_or_else(default_config_path)
}

/// `--test <path>`: load and validate, report the result, exit 0/1.
fn run_test_mode(path: &PathBuf) -> ! {
    match IniFile::parse_file(path).map_err(Into::into).and_then(|ini| Config::load(&ini)) {
        Ok(cfg) => {
            println!("configuration OK: {} rule(s)", cfg.rules.len());
            exit(0);
        }
        Err(err) => {
            let err: Box<dyn std::error::Error> = err;
            eprintln!("configuration invalid: {err}");
            exit(1);
        }
    }
}

/// `--retest <regex>`: apply a regex to each stdin line, printing captures.
fn run_retest_mode(pattern: &str) -> ! {
    let regex = match Regex::new(pattern) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("invalid regex: {err}");
            exit(1);
        }
    };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match regex.captures(&line) {
            Some(caps) => {
                let rendered: Vec<String> = caps
                    .iter()
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                println!("{}", rendered.join(" | "));
            }
            None => println!("(no match)"),
        }
    }
    exit(0);
}

fn main() -> io::Result<()> {
    let args = cli::parse_args();

    if let Some(path) = &args.test {
        run_test_mode(path);
    }
    if let Some(pattern) = &args.retest {
        run_retest_mode(pattern);
    }

    let config_path = resolve_config_path(&args);
    let ini = IniFile::parse_file(&config_path).unwrap_or_else(|err| {
        eprintln!("failed to read configuration {}: {err}", config_path.display());
        exit(1);
    });
    let cfg = Config::load(&ini).unwrap_or_else(|err| {
        eprintln!("invalid configuration {}: {err}", config_path.display());
        exit(1);
    });

    let logfacility = if args.stdout {
        LogFacility::Stdout
    } else if args.logfile.is_some() {
        LogFacility::File
    } else {
        cfg.defaults.logfacility.clone()
    };
    let logfile = args.logfile.clone().unwrap_or_else(|| cfg.defaults.logfile.clone());
    let uid = args.uid.unwrap_or(cfg.defaults.uid);
    let gid = args.gid.unwrap_or(cfg.defaults.gid);

    let ctx = Arc::new(RunContext::new(
        "logwarden",
        args.pid.clone(),
        uid,
        gid,
        logfacility,
        logfile,
    ));

    let logging_handle = logging::init(&ctx, args.verbose).unwrap_or_else(|err| {
        eprintln!("failed to initialize logging: {err}");
        exit(1);
    });

    if let Some(dir) = &args.chdir {
        if let Err(err) = std::env::set_current_dir(dir) {
            tracing::error!(dir = %dir.display(), error = %err, "failed to chdir");
            exit(1);
        }
    }

    if args.daemon {
        if let Err(err) = daemon::daemonize() {
            tracing::error!(error = %err, "failed to daemonize");
            exit(1);
        }
        if let Err(err) = pidfile::write(&ctx.pid_path, std::process::id()) {
            tracing::error!(error = %err, "failed to write pid file");
        }
    }

    apply_uid_gid(&ctx);

    let running = Arc::new(AtomicBool::new(true));
    let reload_requested = Arc::new(AtomicBool::new(false));
    let action_queue = ActionQueue::new();

    let mut controller = Controller::new(
        Arc::clone(&ctx),
        config_path,
        action_queue.clone(),
        Arc::clone(&running),
        Arc::clone(&reload_requested),
    )
    .unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to initialize controller");
        exit(1);
    });

    if let Err(err) = controller.load() {
        tracing::error!(error = %err, "failed to load configuration");
        exit(1);
    }

    let n_workers = cfg.defaults.athread_count.max(1);
    let mut worker_handles = worker::spawn_executors(n_workers, action_queue.clone(), Arc::clone(&running));
    worker_handles.push(worker::spawn_sweeper(
        controller.rules_handle(),
        action_queue.clone(),
        Arc::clone(&running),
        controller.started_at(),
    ));

    spawn_signal_thread(Arc::clone(&running), Arc::clone(&reload_requested), logging_handle);

    controller.run();

    for handle in worker_handles {
        let _ = handle.join();
    }

    if args.daemon {
        pidfile::remove(&ctx.pid_path);
    }

    Ok(())
}

fn apply_uid_gid(ctx: &RunContext) {
    if ctx.gid != 0 {
        // SAFETY: ctx.gid is caller-supplied configuration, not attacker input; setgid's only
        // precondition is sufficient privilege, which we simply let fail and report.
        if unsafe { libc::setgid(ctx.gid) } != 0 {
            tracing::error!(gid = ctx.gid, "failed to switch gid");
        }
    }
    if ctx.uid != 0 {
        // SAFETY: see setgid above.
        if unsafe { libc::setuid(ctx.uid) } != 0 {
            tracing::error!(uid = ctx.uid, "failed to switch uid");
        }
    }
}

fn spawn_signal_thread(
    running: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
    logging_handle: logging::LoggingHandle,
) {
    let mut signals = match Signals::new([SIGHUP, SIGUSR1, SIGUSR2, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            tracing::error!(error = %err, "failed to install signal handlers");
            return;
        }
    };

    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGHUP => logging_handle.reopen_on_sighup(),
                SIGUSR1 => reload_requested.store(true, Ordering::SeqCst),
                SIGUSR2 => {}
                SIGTERM => {
                    running.store(false, Ordering::SeqCst);
                    break;
                }
                _ => {}
            }
        }
    });
}
