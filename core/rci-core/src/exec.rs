//! Synchronous shell execution and reply formatting.
//!
//! The hook's command line runs through `sh` with stderr folded into stdout.
//! The caller blocks until it exits; there is no timeout.
//!
//! Replies mirror the hook path: `/rci/a/b` answering `pong` becomes
//!
//! ```json
//! {"a": {"b": {"result": ["pong"]}}}
//! ```
//!
//! with one array element per output line. A non-zero exit produces the same
//! shape tagged `"error"`, whose first line is the exit status.

use std::process::{Command, Stdio};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{RciError, Result};
use crate::jobs::engine::SHELL;
use crate::types::Hook;

/// Namespace stripped from hook paths before they become reply keys.
pub const NAMESPACE_PREFIX: &str = "/rci/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTag {
    Result,
    Error,
}

impl ReplyTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyTag::Result => "result",
            ReplyTag::Error => "error",
        }
    }
}

pub fn run_sync(hook: &Hook) -> Result<Vec<u8>> {
    let Some(line) = hook.data.execute.first() else {
        return Err(RciError::EmptyExecuteList(hook.hook.clone()));
    };
    if hook.data.execute.len() > 1 {
        debug!(
            hook = %hook.hook,
            ignored = hook.data.execute.len() - 1,
            "Sync hook runs only its first execute line"
        );
    }

    // `exec 2>&1` merges stderr into stdout for the whole script, so output
    // keeps its interleaving.
    let output = Command::new(SHELL)
        .arg("-c")
        .arg(format!("exec 2>&1\n{line}"))
        .stdin(Stdio::null())
        .output()
        .map_err(|source| RciError::ProcessSpawnFailed {
            command: line.clone(),
            source,
        })?;

    let text = String::from_utf8_lossy(&output.stdout);
    let text = text.trim();

    if output.status.success() {
        return format_reply(&hook.hook, ReplyTag::Result, text);
    }

    warn!(hook = %hook.hook, status = %output.status, output = %text, "Sync hook failed");
    let body = if text.is_empty() {
        output.status.to_string()
    } else {
        format!("{}\n{}", output.status, text)
    };
    format_reply(&hook.hook, ReplyTag::Error, &body)
}

/// Splits a hook path into nested reply keys.
pub fn reply_keys(hook_path: &str) -> Vec<&str> {
    let trimmed = hook_path
        .strip_prefix(NAMESPACE_PREFIX)
        .unwrap_or_else(|| hook_path.trim_start_matches('/'));
    trimmed.split('/').collect()
}

pub fn format_reply(hook_path: &str, tag: ReplyTag, text: &str) -> Result<Vec<u8>> {
    let lines = text
        .split('\n')
        .map(|line| Value::String(line.to_string()))
        .collect();

    let mut body = wrap(tag.as_str(), Value::Array(lines));
    for key in reply_keys(hook_path).into_iter().rev() {
        body = wrap(key, body);
    }

    serde_json::to_vec(&body).map_err(|source| RciError::Serialization {
        context: format!("reply for {hook_path}"),
        source,
    })
}

fn wrap(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}
