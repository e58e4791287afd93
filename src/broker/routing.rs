// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Topic pattern matching for exchange bindings.
//!
//! Routing keys are `.`-separated segments. A binding pattern may use `*` to
//! match exactly one segment and `#` to match any run of segments. Patterns are
//! compiled once, at bind time, into the cheapest matcher that can answer them:
//!
//! * no wildcard at all: plain string equality
//! * a trailing `#` and no `*`: prefix test against the pattern with `#` removed
//! * anything else: an anchored regular expression
//!
//! # Examples
//!
//! ```
//! use activity_engine::broker::RoutingPattern;
//!
//! let run = RoutingPattern::compile("run.#");
//! assert!(run.matches("run.enter"));
//! assert!(run.matches("run.outbound.take"));
//! assert!(!run.matches("execute.start"));
//!
//! let api = RoutingPattern::compile("activity.*.exec_1");
//! assert!(api.matches("activity.stop.exec_1"));
//! assert!(!api.matches("activity.stop.exec_2"));
//! ```

use regex::Regex;
use std::fmt;

/// A compiled topic pattern.
#[derive(Clone)]
pub struct RoutingPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Clone)]
enum Matcher {
    Exact,
    Prefix(String),
    Pattern(Option<Regex>),
}

impl RoutingPattern {
    /// Compile a binding pattern.
    pub fn compile(pattern: &str) -> Self {
        let hash_idx = pattern.find('#');
        let has_star = pattern.contains('*');

        let matcher = match hash_idx {
            None if !has_star => Matcher::Exact,
            Some(idx) if idx == pattern.len() - 1 && !has_star => {
                Matcher::Prefix(pattern.replacen('#', "", 1))
            }
            _ => {
                let expression = pattern
                    .replace('.', "\\.")
                    .replace('*', "[^.]+?")
                    .replace('#', ".*?");
                // An invalid expression can only come from user supplied metacharacters;
                // such a binding simply never matches.
                Matcher::Pattern(Regex::new(&format!("^{}$", expression)).ok())
            }
        };

        Self {
            source: pattern.to_string(),
            matcher,
        }
    }

    /// Test a concrete routing key against the pattern.
    pub fn matches(&self, routing_key: &str) -> bool {
        match &self.matcher {
            Matcher::Exact => routing_key == self.source,
            Matcher::Prefix(prefix) => routing_key.starts_with(prefix.as_str()),
            Matcher::Pattern(Some(regex)) => regex.is_match(routing_key),
            Matcher::Pattern(None) => false,
        }
    }

    /// The pattern as it was bound.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for RoutingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RoutingPattern").field(&self.source).finish()
    }
}

impl PartialEq for RoutingPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
