use rci_daemon_protocol::{Method, Request, Response, PROTOCOL_VERSION};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = format!(
            "global_path = \"{}\"\nlocal_path = \"{}\"\nscan_interval_secs = 1\n",
            dir.path().join("global").display(),
            dir.path().join("local").display(),
        );
        std::fs::write(dir.path().join("config.toml"), config).expect("write config");
        Sandbox { dir }
    }

    fn socket(&self) -> PathBuf {
        self.dir.path().join("rci.sock")
    }

    fn global_root(&self) -> PathBuf {
        self.dir.path().join("global")
    }

    fn spawn(&self) -> DaemonGuard {
        let child = Command::new(env!("CARGO_BIN_EXE_rci-daemon"))
            .env("RCI_CONFIG", self.dir.path().join("config.toml"))
            .env("RCI_SOCKET", self.socket())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn rci-daemon");
        DaemonGuard { child }
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, method: Method, params: Option<Value>) -> Response {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some("smoke".to_string()),
        params,
    };
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn send_raw_request(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    stream.write_all(payload).expect("Failed to write raw payload");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

#[test]
fn daemon_ipc_health_run_and_register_smoke() {
    let sandbox = Sandbox::new();
    let _guard = sandbox.spawn();
    let socket = sandbox.socket();
    wait_for_socket(&socket, Duration::from_secs(5));

    let health = send_request(&socket, Method::GetHealth, None);
    assert!(health.ok, "health response was not ok");
    let data = health.data.expect("health payload");
    assert_eq!(data["status"], "ok");
    assert_eq!(data["protocol_version"], PROTOCOL_VERSION);
    assert!(data["hooks"].as_u64().unwrap_or(0) >= 4);

    let ping = send_request(&socket, Method::Run, Some(json!({ "hook": "/rci/ping" })));
    assert!(ping.ok, "ping response was not ok");
    assert_eq!(ping.data.unwrap(), json!({ "ping": { "result": ["pong"] } }));

    let missing = send_request(&socket, Method::Run, Some(json!({ "hook": "/rci/missing" })));
    assert!(!missing.ok);
    assert_eq!(missing.error.unwrap().code, "hook_not_found");

    let registered = send_request(
        &socket,
        Method::Register,
        Some(json!({
            "path": "/rci/smoke/echo",
            "definition": {
                "name": "Echo",
                "type": "shell-script-command",
                "sync": true,
                "data": { "execute": ["echo smoke"] }
            }
        })),
    );
    assert!(registered.ok, "register failed: {:?}", registered.error);

    let echo = send_request(
        &socket,
        Method::Run,
        Some(json!({ "hook": "/rci/smoke/echo" })),
    );
    assert_eq!(
        echo.data.unwrap(),
        json!({ "smoke": { "echo": { "result": ["smoke"] } } })
    );

    let hooks = send_request(&socket, Method::ListHooks, None);
    let hooks = hooks.data.expect("hooks payload");
    assert!(hooks.get("/rci/smoke/echo").is_some());
    assert!(hooks.get("/rci/describe-api").is_some());
}

#[test]
fn daemon_picks_up_definition_files() {
    let sandbox = Sandbox::new();
    let root = sandbox.global_root();
    std::fs::create_dir_all(&root).expect("create global root");
    std::fs::write(
        root.join("uptime.json"),
        r#"{"hook": "/rci/uptime", "type": "shell-script-command", "sync": true, "data": {"execute": ["echo up"]}}"#,
    )
    .expect("write definition");

    let _guard = sandbox.spawn();
    let socket = sandbox.socket();
    wait_for_socket(&socket, Duration::from_secs(5));

    let run = send_request(&socket, Method::Run, Some(json!({ "hook": "/rci/uptime" })));
    assert!(run.ok, "run failed: {:?}", run.error);
    assert_eq!(run.data.unwrap(), json!({ "uptime": { "result": ["up"] } }));
}

#[test]
fn daemon_rejects_malformed_requests_and_stays_healthy() {
    let sandbox = Sandbox::new();
    let _guard = sandbox.spawn();
    let socket = sandbox.socket();
    wait_for_socket(&socket, Duration::from_secs(5));

    let invalid = send_raw_request(&socket, b"{not json}\n");
    assert_eq!(invalid.error.expect("error").code, "invalid_json");

    let mismatch = send_raw_request(&socket, b"{\"protocol_version\":42,\"method\":\"get_health\"}\n");
    assert_eq!(mismatch.error.expect("error").code, "protocol_mismatch");

    let health = send_request(&socket, Method::GetHealth, None);
    assert!(health.ok);
}
