// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = ".irapp.json";
pub const LOG_DIR_ENV: &str = "IRAPP_LOG_DIR";
/// Application id given to a `deploy` entry that is a bare command.
pub const DEFAULT_APP_ID: &str = "default";
const DEFAULT_LOG_DIR: &str = ".irapp/log";

/// A command written either as one whitespace-separated string or as tokens.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
enum CommandSpec {
    Line(String),
    Tokens(Vec<String>),
}

impl CommandSpec {
    fn into_tokens(self) -> Vec<String> {
        match self {
            CommandSpec::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandSpec::Tokens(tokens) => tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeploySpec {
    Single(CommandSpec),
    Apps(BTreeMap<String, CommandSpec>),
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    log: Option<PathBuf>,
    parallelism: Option<usize>,
    deploy: Option<DeploySpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory of the configuration file; relative paths resolve against it.
    pub root: PathBuf,
    pub log: PathBuf,
    pub parallelism: usize,
    /// Known applications, by id.
    pub deploy: BTreeMap<String, Vec<String>>,
}

impl Config {
    /// Load `path`. A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, std::env::var_os(LOG_DIR_ENV))
    }

    fn load_with(path: &Path, log_override: Option<OsString>) -> Result<Self> {
        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let root = std::path::absolute(&root)
            .with_context(|| format!("failed to resolve {}", root.display()))?;

        let raw = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).with_context(|| {
                format!("Could not parse configuration file '{}'", path.display())
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "Could not open configuration file '{}', using default",
                    path.display()
                );
                RawConfig::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        debug!("loaded configuration from {}", path.display());
        Ok(Self::from_raw(raw, root, log_override.map(PathBuf::from)))
    }

    fn from_raw(raw: RawConfig, root: PathBuf, log_override: Option<PathBuf>) -> Self {
        let log = log_override
            .or(raw.log)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let deploy = match raw.deploy {
            None => BTreeMap::new(),
            Some(DeploySpec::Single(command)) => {
                BTreeMap::from([(DEFAULT_APP_ID.to_string(), command.into_tokens())])
            }
            Some(DeploySpec::Apps(apps)) => apps
                .into_iter()
                .map(|(id, command)| (id, command.into_tokens()))
                .collect(),
        };
        Self {
            log: root.join(log),
            parallelism: raw
                .parallelism
                .filter(|&n| n > 0)
                .unwrap_or_else(default_parallelism),
            deploy,
            root,
        }
    }

    /// Applications addressed by `id`: all of them for `None` or `"all"`.
    pub fn select_apps(&self, id: Option<&str>) -> Result<BTreeMap<String, Vec<String>>> {
        match id {
            None | Some(crate::supervisor::ALL_APPS) => Ok(self.deploy.clone()),
            Some(id) => match self.deploy.get(id) {
                Some(command) => Ok(BTreeMap::from([(id.to_string(), command.clone())])),
                None => bail!("Unknown application ID '{id}'"),
            },
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}
