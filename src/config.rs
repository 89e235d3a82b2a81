//! Validates the parsed INI map (C12) into typed `Config`/`RuleSpec` values (C13).
//!
//! Any single validation failure anywhere aborts the whole load; a partially-valid `Config` is
//! never returned to callers (reload protocol, §4.8, depends on this).

use crate::freq::{FreqSpec, FreqSpecError};
use crate::ini::{IniFile, Section, GENERAL_SECTION};
use crate::source::SourceKind;
use std::collections::HashMap;
use std::path::PathBuf;

const RECOGNIZED_KEYS: &[&str] = &[
    "tmpdir",
    "logfacility",
    "logfile",
    "uid",
    "gid",
    "regex",
    "file_type",
    "path",
    "separator",
    "upbound_freq",
    "downbound_freq",
    "upbound_action",
    "downbound_action",
    "size",
    "size_action",
    "usecrc",
    "athread_count",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown option {key:?} in section [{section}]")]
    UnknownKey { section: String, key: String },
    #[error("section [{0}] is missing required key \"path\"")]
    MissingPath(String),
    #[error("section [{section}] has invalid frequency expression for {key}: {source}")]
    InvalidFreq {
        section: String,
        key: String,
        #[source]
        source: FreqSpecError,
    },
    #[error("section [{section}] has invalid file_type {value:?} (expected file, fifo, or usock)")]
    InvalidFileType { section: String, value: String },
    #[error("section [{section}] has invalid logfacility {value:?} (expected file, stdout, or system)")]
    InvalidLogFacility { section: String, value: String },
    #[error("section [{section}] has invalid size expression {value:?}")]
    InvalidSize { section: String, value: String },
    #[error("duplicate rule name {0:?}")]
    DuplicateName(String),
    #[error(transparent)]
    Rule(#[from] crate::rule::RuleError),
    #[error(transparent)]
    Ini(#[from] crate::ini::IniError),
}

#[derive(Debug, Clone)]
pub enum LogFacility {
    File,
    Stdout,
    System,
}

/// Resolved `[general]` defaults, applied to any rule section key left unset.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub tmpdir: PathBuf,
    pub logfacility: LogFacility,
    pub logfile: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub athread_count: usize,
}

impl Defaults {
    pub fn from_general(section: &Section) -> Result<Self, ConfigError> {
        check_unknown_keys(section)?;

        let logfacility = match section.entries.get("logfacility").map(String::as_str) {
            None | Some("stdout") => LogFacility::Stdout,
            Some("file") => LogFacility::File,
            Some("system") => LogFacility::System,
            Some(other) => {
                return Err(ConfigError::InvalidLogFacility {
                    section: GENERAL_SECTION.to_string(),
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            tmpdir: PathBuf::from(section.entries.get("tmpdir").map_or("/tmp", String::as_str)),
            logfacility,
            logfile: PathBuf::from(
                section
                    .entries
                    .get("logfile")
                    .map_or("/var/log/logwarden.log", String::as_str),
            ),
            uid: parse_u32(section.entries.get("uid")),
            gid: parse_u32(section.entries.get("gid")),
            athread_count: section
                .entries
                .get("athread_count")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n >= 1)
                .unwrap_or(2),
        })
    }
}

fn parse_u32(v: Option<&String>) -> u32 {
    v.and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn boolean_value(v: &str) -> bool {
    if v.len() > 1 {
        v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true")
    } else {
        v != "0" && !v.is_empty()
    }
}

fn size_value(section: &str, v: &str) -> Result<u64, ConfigError> {
    if v.is_empty() {
        return Ok(0);
    }
    let digit_len = v.bytes().take_while(u8::is_ascii_digit).count();
    if digit_len == 0 {
        return Err(ConfigError::InvalidSize {
            section: section.to_string(),
            value: v.to_string(),
        });
    }
    let base: u64 = v[..digit_len].parse().map_err(|_| ConfigError::InvalidSize {
        section: section.to_string(),
        value: v.to_string(),
    })?;
    let multiplier = match v[digit_len..].trim() {
        "" | "B" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1u64 << 40,
        _ => {
            return Err(ConfigError::InvalidSize {
                section: section.to_string(),
                value: v.to_string(),
            })
        }
    };
    Ok(base * multiplier)
}

fn check_unknown_keys(section: &Section) -> Result<(), ConfigError> {
    for key in section.entries.keys() {
        if !RECOGNIZED_KEYS.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey {
                section: section.name.clone(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

fn resolve<'a>(section: &'a Section, general: &'a Section, key: &str) -> Option<&'a str> {
    section
        .entries
        .get(key)
        .or_else(|| general.entries.get(key))
        .map(String::as_str)
}

/// A single validated rule section, not yet turned into a live `Rule` (which also needs a
/// compiled regex and fresh frequency windows — see `Config::build`).
pub struct RuleSpec {
    pub name: String,
    pub regex: String,
    pub up_action: String,
    pub down_action: String,
    pub size_action: String,
    pub up_freq: FreqSpec,
    pub down_freq: FreqSpec,
    pub size_threshold_bytes: u64,
    pub use_fingerprint: bool,
    pub path: PathBuf,
    pub kind: SourceKind,
    pub separator: String,
}

impl RuleSpec {
    pub fn from_section(section: &Section, general: &Section) -> Result<Self, ConfigError> {
        check_unknown_keys(section)?;

        let path = resolve(section, general, "path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MissingPath(section.name.clone()))?;

        let file_type = resolve(section, general, "file_type").unwrap_or("file");
        let kind = match file_type {
            "file" => SourceKind::Regular,
            "fifo" => SourceKind::Fifo,
            "usock" => SourceKind::Socket,
            other => {
                return Err(ConfigError::InvalidFileType {
                    section: section.name.clone(),
                    value: other.to_string(),
                })
            }
        };

        let up_freq_raw = resolve(section, general, "upbound_freq").unwrap_or("0/1");
        let down_freq_raw = resolve(section, general, "downbound_freq").unwrap_or("0/1");
        let up_freq = FreqSpec::parse(up_freq_raw).map_err(|source| ConfigError::InvalidFreq {
            section: section.name.clone(),
            key: "upbound_freq".to_string(),
            source,
        })?;
        let down_freq =
            FreqSpec::parse(down_freq_raw).map_err(|source| ConfigError::InvalidFreq {
                section: section.name.clone(),
                key: "downbound_freq".to_string(),
                source,
            })?;

        let size_raw = resolve(section, general, "size").unwrap_or("0");
        let size_threshold_bytes = size_value(&section.name, size_raw)?;

        Ok(Self {
            name: section.name.clone(),
            regex: resolve(section, general, "regex").unwrap_or("/.*/").to_string(),
            up_action: resolve(section, general, "upbound_action").unwrap_or("").to_string(),
            down_action: resolve(section, general, "downbound_action")
                .unwrap_or("")
                .to_string(),
            size_action: resolve(section, general, "size_action").unwrap_or("").to_string(),
            up_freq,
            down_freq,
            size_threshold_bytes,
            use_fingerprint: resolve(section, general, "usecrc").map_or(false, boolean_value),
            path: PathBuf::from(path),
            kind,
            separator: resolve(section, general, "separator").unwrap_or("\\n").to_string(),
        })
    }
}

/// An immutable, fully-validated configuration snapshot: resolved defaults plus an ordered list
/// of rule specs, in file order.
pub struct Config {
    pub defaults: Defaults,
    pub rules: Vec<RuleSpec>,
}

impl Config {
    pub fn load(ini: &IniFile) -> Result<Self, ConfigError> {
        let defaults = Defaults::from_general(ini.general())?;
        let mut seen = HashMap::new();
        let mut rules = Vec::new();

        for section in ini.rule_sections() {
            let spec = RuleSpec::from_section(section, ini.general())?;
            if seen.insert(spec.name.clone(), ()).is_some() {
                return Err(ConfigError::DuplicateName(spec.name));
            }
            rules.push(spec);
        }

        Ok(Self { defaults, rules })
    }
}
