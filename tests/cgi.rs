//! The binary under a CGI environment: stdout carries only the response.

use std::process::{Command, Stdio};

const HELLO: &str = "[[route]]\npath = \"/\"\nbody = \"hello\"\n";

#[test]
fn cgi_response_is_alone_on_stdout() {
    let output = Command::new(env!("CARGO_BIN_EXE_hoist"))
        .args(["-b", HELLO])
        .env("HOIST_ENV", "deployment")
        .env("RUST_LOG", "hoist=info")
        .env("REQUEST_METHOD", "GET")
        .env("PATH_INFO", "/")
        .env("SERVER_PROTOCOL", "HTTP/1.1")
        .env_remove("CONTENT_LENGTH")
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("Status: 200 OK\r\n"), "{}", stdout);
    assert!(stdout.contains("content-length: 5\r\n"), "{}", stdout);
    assert!(!stdout.contains("transfer-encoding"), "{}", stdout);
    assert!(stdout.ends_with("\r\n\r\nhello"), "{}", stdout);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Server running"), "{}", stderr);
}
