use regex::Regex;

use crate::errors::ScanError;

/// Compiled token-name filter. Built once per cycle and shared by all workers.
///
/// Matching uses search semantics: `svc` matches `ci-svc-token`. Anchor the
/// pattern (`^svc-`) to restrict it to prefixes.
#[derive(Debug, Clone)]
pub struct TokenPattern {
    regex: Regex,
}

impl TokenPattern {
    pub fn compile(pattern: &str) -> Result<Self, ScanError> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn is_match(&self, token_name: &str) -> bool {
        self.regex.is_match(token_name)
    }
}
