//! Test name filtering
//!
//! One case-insensitive pattern tested against full test names.

use regex::{Regex, RegexBuilder};

/// Compiled name filter; no pattern means no filtering.
pub struct NamePattern {
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: RegexBuilder::new(pattern).case_insensitive(true).build()?,
        })
    }

    pub fn matches(&self, full_name: &str) -> bool {
        self.regex.is_match(full_name)
    }
}

/// Ancestor names and title joined by single spaces, root excluded.
pub fn full_name(ancestors: &[String], title: &str) -> String {
    let mut name = ancestors.join(" ");
    if !name.is_empty() {
        name.push(' ');
    }
    name.push_str(title);
    name
}
