//! Minimal INI tokenizer: turns config text into an ordered section -> key -> value map.
//!
//! This is the thin, pre-parsed interface the core consumes (SPEC_FULL.md treats the INI
//! tokenizer itself as an external collaborator); everything past this module validates the
//! resulting map, it never re-parses text.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const GENERAL_SECTION: &str = "general";

#[derive(Debug, thiserror::Error)]
pub enum IniError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Clone)]
pub struct Section {
    pub name: String,
    pub entries: HashMap<String, String>,
}

/// An ordered collection of sections, in file order, with `[general]` implicitly present (even
/// if empty) at index 0.
#[derive(Debug, Default, Clone)]
pub struct IniFile {
    sections: Vec<Section>,
}

impl IniFile {
    pub fn parse_file(path: &Path) -> Result<Self, IniError> {
        let contents = fs::read_to_string(path).map_err(|source| IniError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse_str(&contents))
    }

    pub fn parse_str(contents: &str) -> Self {
        let mut sections: Vec<Section> = vec![Section {
            name: GENERAL_SECTION.to_string(),
            entries: HashMap::new(),
        }];
        let mut current = 0usize;

        for (lineno, raw_line) in contents.lines().enumerate() {
            match parse_line(raw_line) {
                Line::Blank | Line::Comment => {}
                Line::Section(name) => {
                    if let Some(idx) = sections.iter().position(|s| s.name == name) {
                        current = idx;
                    } else {
                        sections.push(Section {
                            name,
                            entries: HashMap::new(),
                        });
                        current = sections.len() - 1;
                    }
                }
                Line::KeyValue(key, value) => {
                    sections[current].entries.insert(key, value);
                }
                Line::Malformed => {
                    tracing::warn!(line = lineno + 1, "malformed ini entry, skipping");
                }
            }
        }

        Self { sections }
    }

    pub fn general(&self) -> &Section {
        &self.sections[0]
    }

    /// Every section other than `[general]`, in file order.
    pub fn rule_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().skip(1)
    }
}

enum Line {
    Blank,
    Comment,
    Section(String),
    KeyValue(String, String),
    Malformed,
}

fn parse_line(raw: &str) -> Line {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Line::Blank;
    }
    if trimmed.starts_with(';') || trimmed.starts_with('#') {
        return Line::Comment;
    }
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return Line::Section(inner.trim().to_string());
    }
    if let Some(eq) = trimmed.find('=') {
        let key = trimmed[..eq].trim();
        let value = trimmed[eq + 1..].trim();
        if key.is_empty() {
            return Line::Malformed;
        }
        return Line::KeyValue(key.to_string(), value.to_string());
    }
    Line::Malformed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_keys() {
        let ini = IniFile::parse_str(
            "; a comment\n\
             logfacility = stdout\n\
             \n\
             [errors]\n\
             regex = ^ERR\n\
             upbound_freq = 2/60\n",
        );
        assert_eq!(ini.general().entries.get("logfacility").unwrap(), "stdout");
        let rules: Vec<&Section> = ini.rule_sections().collect();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "errors");
        assert_eq!(rules[0].entries.get("regex").unwrap(), "^ERR");
    }

    #[test]
    fn duplicate_section_headers_merge() {
        let ini = IniFile::parse_str("[a]\nx=1\n[a]\ny=2\n");
        let rules: Vec<&Section> = ini.rule_sections().collect();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].entries.get("x").unwrap(), "1");
        assert_eq!(rules[0].entries.get("y").unwrap(), "2");
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let ini = IniFile::parse_str("not a valid line\nkey=value\n");
        assert_eq!(ini.general().entries.get("key").unwrap(), "value");
    }
}
