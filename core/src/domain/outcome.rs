// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Outcome Classifier
//!
//! Maps a stress probe's `(error?, timed_out?)` observation to an
//! [`Outcome`] using a fixed rule set:
//!
//! 1. timed out — `crash_or_hang`
//! 2. no error payload — `pass`
//! 3. error message matching the validation vocabulary — `graceful_fail`
//! 4. error message matching the crash vocabulary — `crash_or_hang`
//! 5. anything else — `graceful_fail`
//!
//! Vocabulary matching is case-insensitive substring/regex matching over the
//! raw error message; the classifier never inspects result contents.

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Outcome of a single stress probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    GracefulFail,
    CrashOrHang,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::GracefulFail => "graceful_fail",
            Self::CrashOrHang => "crash_or_hang",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Self::Pass),
            "graceful_fail" => Some(Self::GracefulFail),
            "crash_or_hang" => Some(Self::CrashOrHang),
            _ => None,
        }
    }
}

const VALIDATION_PATTERNS: &[&str] = &[
    "invalid",
    "required",
    "missing",
    "type.*expected",
    "must be",
    "should be",
    "cannot be",
    "not allowed",
    "validation",
    "argument",
    "parameter",
    "property",
    "schema",
];

const CRASH_PATTERNS: &[&str] = &[
    "crash",
    "segfault",
    "exception",
    "internal.*error",
    "unexpected",
    "panic",
    "fatal",
    "killed",
];

fn validation_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(VALIDATION_PATTERNS.iter().map(|p| format!("(?i){p}")))
            .expect("validation vocabulary patterns are valid")
    })
}

fn crash_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(CRASH_PATTERNS.iter().map(|p| format!("(?i){p}")))
            .expect("crash vocabulary patterns are valid")
    })
}

/// Classify one probe observation.
pub fn classify_outcome(error_message: Option<&str>, timed_out: bool) -> Outcome {
    if timed_out {
        return Outcome::CrashOrHang;
    }
    let message = match error_message {
        Some(m) => m,
        None => return Outcome::Pass,
    };
    if validation_set().is_match(message) {
        return Outcome::GracefulFail;
    }
    if crash_set().is_match(message) {
        return Outcome::CrashOrHang;
    }
    Outcome::GracefulFail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_always_wins() {
        assert_eq!(classify_outcome(None, true), Outcome::CrashOrHang);
        assert_eq!(
            classify_outcome(Some("Invalid argument"), true),
            Outcome::CrashOrHang
        );
    }

    #[test]
    fn no_error_is_a_pass_regardless_of_contents() {
        assert_eq!(classify_outcome(None, false), Outcome::Pass);
    }

    #[test]
    fn validation_vocabulary_is_graceful() {
        for msg in [
            "Invalid argument: path must be a string",
            "required field missing",
            "Type mismatch: string expected",
            "value cannot be null",
            "Schema validation failed",
            "unknown PARAMETER",
        ] {
            assert_eq!(classify_outcome(Some(msg), false), Outcome::GracefulFail, "{msg}");
        }
    }

    #[test]
    fn crash_vocabulary_is_a_crash() {
        for msg in [
            "server crashed",
            "Segfault at 0x0",
            "Internal server error",
            "unhandled exception in worker",
            "thread panicked",
            "FATAL: out of memory",
        ] {
            assert_eq!(classify_outcome(Some(msg), false), Outcome::CrashOrHang, "{msg}");
        }
    }

    #[test]
    fn validation_match_takes_precedence_over_crash_match() {
        // Contains both "invalid" and "unexpected": rule order says graceful.
        assert_eq!(
            classify_outcome(Some("invalid input caused unexpected state"), false),
            Outcome::GracefulFail
        );
    }

    #[test]
    fn unrecognized_errors_default_to_graceful() {
        assert_eq!(
            classify_outcome(Some("something odd happened"), false),
            Outcome::GracefulFail
        );
    }
}
