//! Test-runner summary parsing.
//!
//! A track's verdict pattern locates the trailer line in the runner's output
//! and exposes its clause list through a `summary` capture group. Clauses are
//! `<n> <label>` pairs; `failed`, `passed`, `skipped` and `error(s)` are
//! counted, anything else (`warnings`, `deselected`, `total`, ...) is ignored.

use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::error::{Error, Result};

/// pytest's closing line: `===== 2 failed, 3 passed in 1.05s =====`
pub const PYTEST_TRAILER: &str =
    r"(?m)^=+ (?P<summary>.+?) in (?P<duration>\d+(?:\.\d+)?s)(?: \([0-9:.]+\))? =+\s*$";

/// jest's summary line: `Tests:       1 failed, 4 passed, 5 total`
pub const JEST_SUMMARY: &str = r"(?m)^Tests:\s+(?P<summary>.+?)\s*$";

const CLAUSE: &str = r"\b(\d+) ([a-z]+)\b";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub failed: Option<u32>,
    pub passed: Option<u32>,
    pub skipped: Option<u32>,
    pub errors: Option<u32>,
    pub duration: Option<String>,
}

impl Verdict {
    /// Nothing failed, errored or was skipped.
    pub fn is_success(&self) -> bool {
        let present = |n: Option<u32>| n.unwrap_or(0) > 0;
        !present(self.failed) && !present(self.skipped) && !present(self.errors)
    }

    /// `Ok(self)` when successful, `Error::TestsFailed` otherwise.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::TestsFailed(self))
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = [
            (self.failed, "failed"),
            (self.passed, "passed"),
            (self.skipped, "skipped"),
            (self.errors, "errors"),
        ]
        .iter()
        .filter_map(|(count, label)| count.map(|n| format!("{} {}", n, label)))
        .collect();

        if clauses.is_empty() {
            write!(f, "no tests ran")?;
        } else {
            write!(f, "{}", clauses.join(", "))?;
        }
        if let Some(duration) = &self.duration {
            write!(f, " in {}", duration)?;
        }
        Ok(())
    }
}

/// Compiled trailer pattern for one track.
#[derive(Debug, Clone)]
pub struct VerdictPattern {
    trailer: Regex,
    clause: Regex,
}

impl VerdictPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let trailer = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid verdict pattern: {}", e)))?;
        if !trailer.capture_names().flatten().any(|n| n == "summary") {
            return Err(Error::Config(
                "verdict pattern must define a `summary` capture group".to_string(),
            ));
        }
        let clause = Regex::new(CLAUSE)
            .map_err(|e| Error::Config(format!("invalid clause pattern: {}", e)))?;
        Ok(Self { trailer, clause })
    }

    /// Parse the last trailer line in `output`.
    ///
    /// Output without any trailer is an `Error::Verdict`, never a pass.
    pub fn parse(&self, output: &str) -> Result<Verdict> {
        let caps = self.trailer.captures_iter(output).last().ok_or_else(|| {
            Error::Verdict(format!(
                "no summary line found in {} bytes of test output",
                output.len()
            ))
        })?;

        let mut verdict = Verdict {
            duration: caps.name("duration").map(|m| m.as_str().to_string()),
            ..Verdict::default()
        };

        let summary = caps.name("summary").map(|m| m.as_str()).unwrap_or("");
        for clause in self.clause.captures_iter(summary) {
            let count: u32 = clause[1]
                .parse()
                .map_err(|e| Error::Verdict(format!("bad count in '{}': {}", summary, e)))?;
            let slot = match &clause[2] {
                "failed" => &mut verdict.failed,
                "passed" => &mut verdict.passed,
                "skipped" => &mut verdict.skipped,
                "error" | "errors" => &mut verdict.errors,
                _ => continue,
            };
            let total = slot.unwrap_or(0).checked_add(count).ok_or_else(|| {
                Error::Verdict(format!("count overflow in '{}'", summary))
            })?;
            *slot = Some(total);
        }
        Ok(verdict)
    }
}
