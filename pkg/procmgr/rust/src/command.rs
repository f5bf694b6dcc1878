// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::path::{Path, PathBuf};

/// Program plus arguments, run from a fixed working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    tokens: Vec<String>,
    cwd: PathBuf,
}

impl Command {
    /// Returns `None` when `tokens` is empty.
    pub fn new<I, S>(tokens: I, cwd: impl Into<PathBuf>) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return None;
        }
        Some(Self {
            tokens,
            cwd: cwd.into(),
        })
    }

    /// Split a command line on whitespace. No quoting rules are applied.
    pub fn parse(line: &str, cwd: impl Into<PathBuf>) -> Option<Self> {
        Self::new(line.split_whitespace(), cwd)
    }

    pub fn program(&self) -> &str {
        // `new` rejects empty token lists.
        self.tokens.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.tokens.get(1..).unwrap_or_default()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_whitespace() {
        let cmd = Command::parse("  make   -j4 test ", "/src").unwrap();
        assert_eq!(cmd.program(), "make");
        assert_eq!(cmd.args(), &["-j4".to_string(), "test".to_string()]);
        assert_eq!(cmd.cwd(), Path::new("/src"));
        assert_eq!(cmd.to_string(), "make -j4 test");
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(Command::parse("   ", ".").is_none());
        assert!(Command::new(Vec::<String>::new(), ".").is_none());
    }

    #[test]
    fn test_program_without_args() {
        let cmd = Command::new(["true"], ".").unwrap();
        assert!(cmd.args().is_empty());
    }
}
