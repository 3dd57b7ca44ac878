//! IPC protocol types and validation for rci-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_HOOK_PATH_LEN: usize = 512;
pub const ERROR_TOO_MANY_CONNECTIONS: &str = "too_many_connections";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Run,
    Register,
    ListHooks,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Params of `run`. `token` is passed through to built-in handlers untouched.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunParams {
    pub hook: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub args: HashMap<String, String>,
}

impl RunParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        validate_hook_path(&self.hook, "hook")
    }
}

/// Params of `register`. The definition uses the hook file schema.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterParams {
    pub path: String,
    pub definition: Value,
}

impl RegisterParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        validate_hook_path(&self.path, "path")?;
        if !self.definition.is_object() {
            return Err(ErrorInfo::new(
                "invalid_params",
                "definition must be an object",
            ));
        }
        Ok(())
    }
}

pub fn parse_run(params: Value) -> Result<RunParams, ErrorInfo> {
    let parsed: RunParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("run params are invalid JSON: {}", err),
        )
    })?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_register(params: Value) -> Result<RegisterParams, ErrorInfo> {
    let parsed: RegisterParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("register params are invalid JSON: {}", err),
        )
    })?;
    parsed.validate()?;
    Ok(parsed)
}

fn validate_hook_path(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if !value.starts_with('/') {
        return Err(ErrorInfo::new(
            "invalid_hook_path",
            format!("{} must start with '/'", field),
        ));
    }
    if value.len() > MAX_HOOK_PATH_LEN {
        return Err(ErrorInfo::new(
            "invalid_hook_path",
            format!("{} must be {} characters or fewer", field, MAX_HOOK_PATH_LEN),
        ));
    }
    Ok(())
}
