//! Tag glob compilation.
//!
//! A match pattern is a list of space-separated globs; it matches a tag when
//! any glob does. Glob syntax over dot-separated tags:
//!
//! - `*` matches exactly one non-empty segment (`app.*` matches
//!   `app.access` but not `app` or `app.sub.x`)
//! - `**` matches zero or more segments (`app.**` matches `app`,
//!   `app.access`, `app.sub.x`)
//! - `{a,b,c}` matches one of the alternatives within a segment
//! - anything else matches byte-for-byte
//!
//! Each glob is compiled once into a regular expression; the regex engine's
//! linear-time automaton keeps matching O(len(tag)) per rule.

use regex::Regex;

use crate::config::ConfigError;

/// One compiled glob.
#[derive(Clone, Debug)]
pub struct GlobMatcher {
    pattern: String,
    regex: Regex,
}

impl GlobMatcher {
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let source = translate(pattern)?;
        let regex = Regex::new(&source).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(GlobMatcher {
            pattern: pattern.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn matches(&self, tag: &str) -> bool {
        self.regex.is_match(tag)
    }
}

/// A rule pattern: one or more globs, any of which may match.
#[derive(Clone, Debug)]
pub struct MatchPattern {
    globs: Vec<GlobMatcher>,
}

impl MatchPattern {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let globs: Vec<GlobMatcher> = source
            .split_whitespace()
            .map(GlobMatcher::compile)
            .collect::<Result<_, _>>()?;
        if globs.is_empty() {
            return Err(ConfigError::InvalidPattern {
                pattern: source.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }
        Ok(MatchPattern { globs })
    }

    #[must_use]
    pub fn matches(&self, tag: &str) -> bool {
        self.globs.iter().any(|g| g.matches(tag))
    }
}

enum Item {
    Segment(String),
    MultiWild,
}

/// Translates one glob into an anchored regex source string.
fn translate(pattern: &str) -> Result<String, ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "pattern is empty".to_string(),
        });
    }
    let items: Vec<Item> = pattern
        .split('.')
        .map(|segment| {
            if segment == "**" {
                Ok(Item::MultiWild)
            } else {
                translate_segment(pattern, segment).map(Item::Segment)
            }
        })
        .collect::<Result<_, _>>()?;

    let mut out = String::from("^");
    // whether the next literal segment needs a separating dot
    let mut needs_dot = false;
    let last = items.len() - 1;
    for (i, item) in items.iter().enumerate() {
        match item {
            Item::Segment(segment) => {
                if needs_dot {
                    out.push_str(r"\.");
                }
                out.push_str(segment);
                needs_dot = true;
            }
            Item::MultiWild => match (needs_dot, i < last) {
                // the whole pattern is `**`
                (false, false) => out.push_str(".*"),
                // leading `**.rest`: zero or more segments, then rest
                (false, true) => out.push_str(r"(?:[^.]+\.)*"),
                // trailing `head.**`: head alone, or head plus more segments
                (true, false) => out.push_str(r"(?:\.[^.]+)*"),
                // infix `head.**.rest`: the separating dot is always there,
                // with zero or more whole segments in between
                (true, true) => {
                    out.push_str(r"\.(?:[^.]+\.)*");
                    needs_dot = false;
                }
            },
        }
    }
    out.push('$');
    Ok(out)
}

/// Translates one dot-segment: `*`, `{a,b}` alternation, literals.
fn translate_segment(pattern: &str, segment: &str) -> Result<String, ConfigError> {
    if segment == "*" {
        return Ok("[^.]+".to_string());
    }
    let mut out = String::new();
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str("[^.]*"),
            '{' => {
                let mut body = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    body.push(inner);
                }
                if !closed {
                    return Err(ConfigError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: "unclosed `{`".to_string(),
                    });
                }
                let alternatives: Vec<String> = body
                    .split(',')
                    .map(|alt| translate_segment(pattern, alt))
                    .collect::<Result<_, _>>()?;
                out.push_str("(?:");
                out.push_str(&alternatives.join("|"));
                out.push(')');
            }
            '}' => {
                return Err(ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "unbalanced `}`".to_string(),
                });
            }
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }
    Ok(out)
}
