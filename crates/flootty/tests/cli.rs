//! Runs the flootty binary against a scripted loopback server.

use std::io::{BufRead as _, BufReader, Write as _};
use std::net::TcpListener;
use std::process::{Command, Stdio};
use std::time::Duration;

#[test]
fn test_fatal_server_error_is_reported_once() {
    let home = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = std::thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let mut writer = sock.try_clone().unwrap();
        let mut reader = BufReader::new(sock);

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let auth: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(auth["name"], "auth");
        assert_eq!(auth["room"], "ws");

        writer
            .write_all(b"{\"name\":\"error\",\"msg\":\"workspace is locked\"}\n")
            .unwrap();
        // Hold the connection until the client hangs up.
        line.clear();
        let _ = reader.read_line(&mut line);
    });

    let output = Command::new(env!("CARGO_BIN_EXE_flootty"))
        .args(["--list", "--username", "alice", "--secret", "s3cret", "--url"])
        .arg(format!("http://127.0.0.1:{port}/bob/ws"))
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .unwrap();
    server.join().unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1), "{stderr}");
    assert_eq!(stderr.matches("workspace is locked").count(), 1, "{stderr}");
    assert!(stderr.contains("flootty: error from server: workspace is locked"));
}
