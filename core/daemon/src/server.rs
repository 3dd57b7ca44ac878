//! Socket transport: one newline-delimited JSON request per connection.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rci_core::{Args, Hook, HookType, RciError, RciService};
use rci_daemon_protocol::{
    parse_register, parse_run, ErrorInfo, Method, Request, Response,
    ERROR_TOO_MANY_CONNECTIONS, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde_json::Value;
use tracing::{debug, info, warn};

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const MAX_ACTIVE_CONNECTIONS: usize = 64;

pub fn serve(listener: UnixListener, service: Arc<RciService>) {
    let active = Arc::new(AtomicUsize::new(0));

    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => {
                if active.fetch_add(1, Ordering::SeqCst) >= MAX_ACTIVE_CONNECTIONS {
                    active.fetch_sub(1, Ordering::SeqCst);
                    warn!(limit = MAX_ACTIVE_CONNECTIONS, "Rejecting connection over limit");
                    let response = Response::error(
                        None,
                        ERROR_TOO_MANY_CONNECTIONS,
                        "too many active connections",
                    );
                    let _ = write_response(&mut stream, response);
                    continue;
                }

                let service = Arc::clone(&service);
                let active = Arc::clone(&active);
                let spawned = thread::Builder::new()
                    .name("rci-conn".to_string())
                    .spawn(move || {
                        handle_connection(stream, &service);
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                if let Err(err) = spawned {
                    warn!(error = %err, "Failed to spawn connection thread");
                }
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn handle_connection(mut stream: UnixStream, service: &RciService) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, service);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    parse_request(&buffer)
}

/// Parses the first line of `buffer`; anything after the newline is ignored.
fn parse_request(buffer: &[u8]) -> Result<Request, ErrorInfo> {
    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer,
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, service: &RciService) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let running = serde_json::to_value(service.running()).unwrap_or(Value::Null);
            Response::ok(
                request.id,
                serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                    "hooks": service.registry().len(),
                    "running": running,
                }),
            )
        }
        Method::ListHooks => match serde_json::to_value(service.registry().snapshot()) {
            Ok(value) => Response::ok(request.id, value),
            Err(err) => Response::error(
                request.id,
                "serialization_error",
                format!("Failed to serialize hooks: {}", err),
            ),
        },
        Method::Run => handle_run(request, service),
        Method::Register => handle_register(request, service),
    }
}

fn handle_run(request: Request, service: &RciService) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "hook is required"),
    };
    let params = match parse_run(params) {
        Ok(params) => params,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    let token = params.token.unwrap_or_default();
    let args: Args = params.args;
    match service.run(token.as_bytes(), &params.hook, &args) {
        Ok(reply) => {
            debug!(hook = %params.hook, bytes = reply.len(), "Hook replied");
            Response::ok(request.id, reply_value(reply))
        }
        Err(err) => {
            info!(hook = %params.hook, code = err.code(), error = %err, "Hook run failed");
            core_error(request.id, &err)
        }
    }
}

fn handle_register(request: Request, service: &RciService) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "path is required"),
    };
    let params = match parse_register(params) {
        Ok(params) => params,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    let mut definition = params.definition;
    if let Some(object) = definition.as_object_mut() {
        if !object.contains_key("hook") && !object.contains_key("Hook") {
            object.insert("hook".to_string(), Value::String(params.path.clone()));
        }
    }
    let hook: Hook = match serde_json::from_value(definition) {
        Ok(hook) => hook,
        Err(err) => {
            return Response::error(
                request.id,
                "invalid_definition",
                format!("hook definition is invalid: {}", err),
            )
        }
    };
    // Built-in behaviour can only come from in-process code.
    if hook.kind != HookType::ShellScript {
        return Response::error(
            request.id,
            "unsupported_command_type",
            format!(
                "only shell-script-command hooks can be registered, got '{}'",
                hook.kind.as_str()
            ),
        );
    }

    match service.register(&params.path, hook) {
        Ok(()) => {
            info!(hook = %params.path, "Hook registered over IPC");
            Response::ok(request.id, serde_json::json!({ "registered": params.path }))
        }
        Err(err) => core_error(request.id, &err),
    }
}

/// Reply bytes as JSON when they parse, otherwise as a string.
fn reply_value(reply: Vec<u8>) -> Value {
    serde_json::from_slice(&reply)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&reply).into_owned()))
}

fn core_error(id: Option<String>, err: &RciError) -> Response {
    Response::error(id, err.code(), err.to_string())
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rci_core::RciConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> RciService {
        RciService::new(RciConfig {
            global_path: dir.path().join("global"),
            local_path: dir.path().join("local"),
            ..RciConfig::default()
        })
        .unwrap()
    }

    fn request(method: Method, params: Option<Value>) -> Request {
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some("t".to_string()),
            params,
        }
    }

    #[test]
    fn parse_request_ignores_trailing_data() {
        let request =
            parse_request(b"{\"protocol_version\":1,\"method\":\"get_health\"}\ngarbage").unwrap();
        assert!(matches!(request.method, Method::GetHealth));
    }

    #[test]
    fn parse_request_rejects_blank_and_malformed() {
        assert_eq!(parse_request(b"  \n").unwrap_err().code, "empty_request");
        assert_eq!(parse_request(b"{nope}\n").unwrap_err().code, "invalid_json");
    }

    #[test]
    fn protocol_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut req = request(Method::GetHealth, None);
        req.protocol_version = 99;
        let response = handle_request(req, &service(&dir));
        assert_eq!(response.error.unwrap().code, "protocol_mismatch");
    }

    #[test]
    fn run_returns_reply_json() {
        let dir = TempDir::new().unwrap();
        let response = handle_request(
            request(Method::Run, Some(json!({ "hook": "/rci/ping" }))),
            &service(&dir),
        );
        assert!(response.ok);
        assert_eq!(response.id.as_deref(), Some("t"));
        assert_eq!(response.data.unwrap(), json!({ "ping": { "result": ["pong"] } }));
    }

    #[test]
    fn run_unknown_hook_maps_error_code() {
        let dir = TempDir::new().unwrap();
        let response = handle_request(
            request(Method::Run, Some(json!({ "hook": "/rci/nope" }))),
            &service(&dir),
        );
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().code, "hook_not_found");
    }

    #[test]
    fn register_then_run() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let definition = json!({
            "name": "Uptime",
            "type": "shell-script-command",
            "sync": true,
            "data": { "execute": ["echo up"] }
        });

        let response = handle_request(
            request(
                Method::Register,
                Some(json!({ "path": "/rci/uptime", "definition": definition.clone() })),
            ),
            &service,
        );
        assert!(response.ok, "{:?}", response.error);

        let again = handle_request(
            request(
                Method::Register,
                Some(json!({ "path": "/rci/uptime", "definition": definition })),
            ),
            &service,
        );
        assert_eq!(again.error.unwrap().code, "already_registered");

        let run = handle_request(
            request(Method::Run, Some(json!({ "hook": "/rci/uptime" }))),
            &service,
        );
        assert_eq!(run.data.unwrap(), json!({ "uptime": { "result": ["up"] } }));
    }

    #[test]
    fn register_rejects_builtin_definitions() {
        let dir = TempDir::new().unwrap();
        let response = handle_request(
            request(
                Method::Register,
                Some(json!({
                    "path": "/rci/sneaky",
                    "definition": { "type": "built-in-command" }
                })),
            ),
            &service(&dir),
        );
        assert_eq!(response.error.unwrap().code, "unsupported_command_type");
    }

    #[test]
    fn non_json_reply_becomes_string() {
        assert_eq!(reply_value(b"plain text".to_vec()), json!("plain text"));
    }
}
