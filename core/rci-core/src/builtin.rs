//! In-process handlers and the default hook catalog.
//!
//! A built-in hook in the registry is only metadata; the callable lives in the
//! registry's handler table under the same path. Definition files can describe a
//! built-in path but can never supply its behaviour.

use std::sync::Arc;

use serde_json::json;

use crate::error::{RciError, Result};
use crate::service::RciService;
use crate::types::{Args, Hook};

/// Signature of an in-process hook: `(service, token, hook, args) -> reply`.
pub type BuiltinFn = dyn Fn(&RciService, &[u8], &Hook, &Args) -> Result<Vec<u8>> + Send + Sync;

pub type BuiltinHandler = Arc<BuiltinFn>;

/// Wraps a closure as a [`BuiltinHandler`].
pub fn handler<F>(f: F) -> BuiltinHandler
where
    F: Fn(&RciService, &[u8], &Hook, &Args) -> Result<Vec<u8>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub const PING: &str = "/rci/ping";
pub const DESCRIBE_API: &str = "/rci/describe-api";
pub const HOSTNAME: &str = "/rci/hostname";
pub const ASYNC_RUNNING: &str = "/rci/async/running";

/// Registers the default catalog on a fresh service.
pub(crate) fn install_defaults(service: &RciService) -> Result<()> {
    service.register(PING, Hook::shell(PING, "RCI ping", true, &["echo pong"]))?;
    service.register_builtin(
        DESCRIBE_API,
        Hook::built_in(DESCRIBE_API, "Describe API"),
        handler(describe_api),
    )?;
    service.register_builtin(
        HOSTNAME,
        Hook::built_in(HOSTNAME, "Hostname"),
        handler(hostname),
    )?;
    service.register_builtin(
        ASYNC_RUNNING,
        Hook::built_in(ASYNC_RUNNING, "Running async scripts"),
        handler(async_running),
    )?;
    Ok(())
}

fn describe_api(service: &RciService, _: &[u8], _: &Hook, _: &Args) -> Result<Vec<u8>> {
    let hooks = service.registry().snapshot();
    serde_json::to_vec(&hooks).map_err(|source| RciError::Serialization {
        context: "hook registry".to_string(),
        source,
    })
}

fn hostname(_: &RciService, _: &[u8], _: &Hook, _: &Args) -> Result<Vec<u8>> {
    let name = sysinfo::System::host_name().ok_or_else(|| {
        RciError::fs(
            "hostname",
            std::io::Error::new(std::io::ErrorKind::NotFound, "host name unavailable"),
        )
    })?;
    serde_json::to_vec(&json!({ "hostname": name })).map_err(|source| RciError::Serialization {
        context: "hostname".to_string(),
        source,
    })
}

fn async_running(service: &RciService, _: &[u8], _: &Hook, _: &Args) -> Result<Vec<u8>> {
    let running = service.running();
    serde_json::to_vec(&running).map_err(|source| RciError::Serialization {
        context: "running hooks".to_string(),
        source,
    })
}
