//! Hook definitions and the reply shapes shared across engines.
//!
//! A [`Hook`] is pure data: it can be registered in-process or loaded from a
//! definition file. Executable behaviour for built-in hooks never lives here; it
//! is resolved from the registry's handler table at dispatch time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Caller-supplied invocation arguments.
pub type Args = HashMap<String, String>;

/// Reserved argument that turns an async invocation into a result poll.
pub const RESULT_ARG: &str = "result";

/// Wire names of the known command types.
pub const SHELL_SCRIPT_COMMAND: &str = "shell-script-command";
pub const BUILT_IN_COMMAND: &str = "built-in-command";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HookType {
    ShellScript,
    BuiltIn,
    /// Anything else found in a definition file. Kept so dispatch can report it.
    Other(String),
}

impl HookType {
    pub fn as_str(&self) -> &str {
        match self {
            HookType::ShellScript => SHELL_SCRIPT_COMMAND,
            HookType::BuiltIn => BUILT_IN_COMMAND,
            HookType::Other(kind) => kind,
        }
    }
}

impl From<String> for HookType {
    fn from(value: String) -> Self {
        match value.as_str() {
            SHELL_SCRIPT_COMMAND => HookType::ShellScript,
            BUILT_IN_COMMAND => HookType::BuiltIn,
            _ => HookType::Other(value),
        }
    }
}

impl From<HookType> for String {
    fn from(value: HookType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookData {
    /// Shell lines, in order. Empty for built-in hooks.
    #[serde(default, alias = "Execute")]
    pub execute: Vec<String>,
}

/// Where a file-backed hook came from, as observed by the last scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub file_name: PathBuf,
    pub size: u64,
    pub mod_time: SystemTime,
    /// Set when the backing file vanished; the hook is purged on the next scan.
    pub deleted: bool,
}

impl FileStamp {
    pub fn matches(&self, size: u64, mod_time: SystemTime) -> bool {
        !self.deleted && self.size == size && self.mod_time == mod_time
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    #[serde(alias = "Hook")]
    pub hook: String,
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Menu", skip_serializing_if = "Option::is_none")]
    pub menu: Option<String>,
    #[serde(rename = "type", alias = "Type")]
    pub kind: HookType,
    #[serde(default, alias = "Sync")]
    pub sync: bool,
    #[serde(default, alias = "Data")]
    pub data: HookData,
    /// Populated only for hooks loaded from disk.
    #[serde(skip)]
    pub source: Option<FileStamp>,
}

impl Hook {
    pub fn shell(path: &str, name: &str, sync: bool, execute: &[&str]) -> Self {
        Hook {
            hook: path.to_string(),
            name: name.to_string(),
            menu: None,
            kind: HookType::ShellScript,
            sync,
            data: HookData {
                execute: execute.iter().map(|line| line.to_string()).collect(),
            },
            source: None,
        }
    }

    pub fn built_in(path: &str, name: &str) -> Self {
        Hook {
            hook: path.to_string(),
            name: name.to_string(),
            menu: None,
            kind: HookType::BuiltIn,
            sync: true,
            data: HookData::default(),
            source: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.source.as_ref().is_some_and(|stamp| stamp.deleted)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Async Reply Shapes
// ═══════════════════════════════════════════════════════════════════════════════

/// Reply to a successful async start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOk {
    pub uid: String,
}

/// Uniform failure reply for every async-path error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailed {
    pub uid: String,
    #[serde(rename = "where")]
    pub stage: String,
    pub error: String,
}

/// Reply to a result poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub finished: bool,
    pub error: String,
    pub log: Vec<String>,
}
