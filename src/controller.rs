//! Controller (C10): owns the Source Registry and Rule set, drives the main loop, and runs the
//! reload protocol (C11) on request.

use crate::action::ActionQueue;
use crate::config::{Config, ConfigError, RuleSpec};
use crate::context::RunContext;
use crate::ini::{IniError, IniFile};
use crate::listener::Listener;
use crate::preprocessor::preprocess;
use crate::registry::SourceRegistry;
use crate::rule::Rule;
use crate::source::{expand_separator, LogSource, SourceError};
use crate::watcher::{Watcher, WatcherError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const POLL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Ini(#[from] IniError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct LoadedState {
    registry: SourceRegistry,
    rules: Vec<Arc<Rule>>,
}

/// Builds fresh Sources and Rules from a validated `Config`, grouping rule specs that share a
/// `path` onto one shared Log Source, but does not open or watch anything yet.
fn build(cfg: &Config) -> Result<LoadedState, ControllerError> {
    let mut by_path: HashMap<PathBuf, Vec<&RuleSpec>> = HashMap::new();
    for spec in &cfg.rules {
        by_path.entry(spec.path.clone()).or_default().push(spec);
    }

    let mut registry = SourceRegistry::new();
    let mut rules = Vec::new();

    for (path, specs) in by_path {
        let first = specs[0];
        let mut source = LogSource::new(path.clone(), first.kind, expand_separator(&first.separator));

        for spec in &specs {
            let rule = Arc::new(Rule::new(
                spec.name.clone(),
                &spec.regex,
                spec.up_action.clone(),
                spec.down_action.clone(),
                spec.size_action.clone(),
                spec.up_freq,
                spec.down_freq,
                spec.size_threshold_bytes,
                spec.use_fingerprint,
            )?);
            rules.push(Arc::clone(&rule));
            source.attached_rules().push(rule);
        }

        registry.insert(source);
    }

    Ok(LoadedState { registry, rules })
}

/// Opens every source in `state` (seeking to end, so pre-existing content at load time is not
/// replayed) and subscribes the watcher to each.
fn open_and_watch(state: &mut LoadedState, watcher: &mut Watcher) -> Result<(), ControllerError> {
    for path in state.registry.paths() {
        let handle = state.registry.get(&path).expect("just listed");
        {
            let mut source = handle.lock().unwrap();
            if let Err(err) = source.open(true) {
                tracing::warn!(path = %path.display(), error = %err, "failed to open source at startup; will retry via directory watch");
                watcher.watch_directory(&path)?;
                continue;
            }
        }
        state.registry.refresh_fd_index(&path);
        watcher.watch_file(&path)?;
    }
    Ok(())
}

pub struct Controller {
    ctx: Arc<RunContext>,
    config_path: PathBuf,
    registry: SourceRegistry,
    rules: Arc<Mutex<Vec<Arc<Rule>>>>,
    watcher: Watcher,
    action_queue: ActionQueue,
    running: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
    started_at: Instant,
}

impl Controller {
    pub fn new(
        ctx: Arc<RunContext>,
        config_path: PathBuf,
        action_queue: ActionQueue,
        running: Arc<AtomicBool>,
        reload_requested: Arc<AtomicBool>,
    ) -> Result<Self, ControllerError> {
        let watcher = Watcher::new()?;
        Ok(Self {
            ctx,
            config_path,
            registry: SourceRegistry::new(),
            rules: Arc::new(Mutex::new(Vec::new())),
            watcher,
            action_queue,
            running,
            reload_requested,
            started_at: Instant::now(),
        })
    }

    pub fn rules_handle(&self) -> Arc<Mutex<Vec<Arc<Rule>>>> {
        Arc::clone(&self.rules)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Initial load, per step 1 of the main-loop contract: parse, validate, build, open, watch.
    pub fn load(&mut self) -> Result<(), ControllerError> {
        let ini = IniFile::parse_file(&self.config_path)?;
        let cfg = Config::load(&ini)?;
        let mut state = build(&cfg)?;
        open_and_watch(&mut state, &mut self.watcher)?;
        self.registry = state.registry;
        *self.rules.lock().unwrap() = state.rules;
        Ok(())
    }

    /// Drives the main loop forever (or until `running` is cleared by the signal thread).
    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            let ready = {
                let mut listener = Listener::new(&mut self.watcher);
                listener.wait(&mut self.registry, POLL_TIMEOUT)
            };

            for path in ready {
                self.drain_source(&path);
            }

            if self.reload_requested.swap(false, Ordering::SeqCst) {
                self.reload();
            }
        }
    }

    fn drain_source(&self, path: &PathBuf) {
        let Some(handle) = self.registry.get(path) else {
            return;
        };
        let mut source = handle.lock().unwrap();
        let mut produced_any = false;

        loop {
            let item = match source.fetch_next() {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "error reading source");
                    break;
                }
            };
            produced_any = true;
            let line = String::from_utf8_lossy(&item).into_owned();
            let position = source.position();

            for rule in source.rules() {
                if rule.has_size_action() && rule.size_exceeded(position) {
                    let caps = vec![line.clone()];
                    let command = preprocess(&rule.size_action_template, &line, &caps);
                    self.action_queue.push(command);
                }

                if rule.has_up_action() && !line.is_empty() {
                    if let Some(caps) = rule.try_match(&line, now_secs()) {
                        if rule.up_bound_exceeded(&caps[0]) {
                            let command = preprocess(&rule.up_action_template, &line, &caps);
                            self.action_queue.push(command);
                            rule.reset_up_unsharded();
                        }
                    }
                }
            }
        }

        if !produced_any {
            let _ = source.handle_if_truncated();
        }
    }

    /// Reload protocol (§4.8): validate a temporary config first; only on success do we stop
    /// watching, drop the active Rules/Sources, and install the new ones.
    fn reload(&mut self) {
        tracing::info!("configuration reload requested");
        let ini = match IniFile::parse_file(&self.config_path) {
            Ok(ini) => ini,
            Err(err) => {
                tracing::error!(error = %err, "reload aborted: failed to parse configuration");
                return;
            }
        };
        let cfg = match Config::load(&ini) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::error!(error = %err, "reload aborted: configuration failed validation");
                return;
            }
        };
        let mut state = match build(&cfg) {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(error = %err, "reload aborted: failed to build rules");
                return;
            }
        };

        for path in self.registry.paths() {
            self.watcher.unwatch(&path);
        }

        if let Err(err) = open_and_watch(&mut state, &mut self.watcher) {
            tracing::error!(error = %err, "reload aborted: failed to open/watch new sources; configuration unchanged");
            return;
        }

        self.registry = state.registry;
        *self.rules.lock().unwrap() = state.rules;
        tracing::info!(rules = self.rules.lock().unwrap().len(), "configuration reloaded");
    }

    pub fn program_name(&self) -> &str {
        &self.ctx.program_name
    }
}
