//! Client helper for talking to the rci daemon over its Unix socket.
//!
//! One request per connection; the daemon answers with a single JSON line.

use rci_core::RciConfig;
use rci_daemon_protocol::{ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES};
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const SOCKET_ENV: &str = "RCI_SOCKET";
const CONFIG_ENV: &str = "RCI_CONFIG";
const WRITE_TIMEOUT_MS: u64 = 600;

pub struct DaemonClient {
    socket: PathBuf,
    read_timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket: PathBuf, read_timeout: Duration) -> Self {
        Self {
            socket,
            read_timeout,
        }
    }

    /// `RCI_SOCKET`, else the socket of the configured instance.
    pub fn resolve_socket(explicit: Option<PathBuf>) -> Result<PathBuf, String> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        if let Some(path) = env::var_os(SOCKET_ENV) {
            return Ok(PathBuf::from(path));
        }
        let config_path = match env::var_os(CONFIG_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => RciConfig::default_path(),
        };
        let config = match config_path {
            Some(path) => RciConfig::load(&path).map_err(|err| err.to_string())?,
            None => RciConfig::default(),
        };
        Ok(config.socket_path())
    }

    /// Sends `method` and returns the response data, or the daemon's error.
    pub fn call(&self, method: Method, params: Option<Value>) -> Result<Value, String> {
        let response = self.send_request(Request::new(method, params))?;
        if response.ok {
            return Ok(response.data.unwrap_or(Value::Null));
        }
        Err(response
            .error
            .map(|err| describe_error(&err))
            .unwrap_or_else(|| "Unknown daemon error".to_string()))
    }

    fn send_request(&self, request: Request) -> Result<Response, String> {
        let mut stream = UnixStream::connect(&self.socket).map_err(|err| {
            format!(
                "Failed to connect to daemon socket {}: {}",
                self.socket.display(),
                err
            )
        })?;
        let _ = stream.set_read_timeout(Some(self.read_timeout));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        tracing::debug!(method = ?request.method, socket = %self.socket.display(), "Sending request");
        serde_json::to_writer(&mut stream, &request)
            .map_err(|err| format!("Failed to write request: {}", err))?;
        stream
            .write_all(b"\n")
            .map_err(|err| format!("Failed to flush request: {}", err))?;
        stream.flush().ok();

        read_response(&mut stream)
    }
}

fn describe_error(err: &ErrorInfo) -> String {
    format!("{}: {}", err.code, err.message)
}

fn read_response(stream: &mut impl Read) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
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
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}
