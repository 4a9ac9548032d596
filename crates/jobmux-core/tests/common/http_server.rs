//! Minimal HTTP/1.1 server for integration tests.
//!
//! Routes:
//! - `/echo`: 200, body is `METHOD TARGET` followed by the request body on
//!   the next line (if any).
//! - `/status/N`: responds with status N and body `status N`.
//! - `/redirect`: 302 to `/echo`.
//! - `/slow/MS`: sleeps MS milliseconds, then answers like `/echo`.
//!
//! Every response closes the connection.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Start a server on an ephemeral port. Returns the base URL without a
/// trailing slash (e.g. "http://127.0.0.1:12345"). Runs until process exit.
pub fn start() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || handle(stream));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

/// A URL on a port nothing listens on.
pub fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/", port)
}

struct Request {
    method: String,
    target: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.lines();
    let mut first = lines.next()?.split_whitespace();
    let method = first.next()?.to_string();
    let target = first.next()?.to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    Some(Request {
        method,
        target,
        body,
    })
}

fn respond(stream: &mut TcpStream, status: &str, extra: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n",
        status,
        body.len(),
        extra
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

fn echo_body(req: &Request) -> Vec<u8> {
    let mut out = format!("{} {}", req.method, req.target).into_bytes();
    if !req.body.is_empty() {
        out.push(b'\n');
        out.extend_from_slice(&req.body);
    }
    out
}

fn handle(mut stream: TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(req) = read_request(&mut stream) else {
        return;
    };
    let path = req.target.split('?').next().unwrap_or("").to_string();

    if path == "/echo" {
        let body = echo_body(&req);
        respond(&mut stream, "200 OK", "Content-Type: text/plain\r\n", &body);
    } else if let Some(code) = path.strip_prefix("/status/") {
        let code: u16 = code.parse().unwrap_or(500);
        let body = format!("status {}", code);
        respond(&mut stream, &format!("{} Status", code), "", body.as_bytes());
    } else if path == "/redirect" {
        respond(&mut stream, "302 Found", "Location: /echo\r\n", b"");
    } else if let Some(ms) = path.strip_prefix("/slow/") {
        thread::sleep(Duration::from_millis(ms.parse().unwrap_or(0)));
        let body = echo_body(&req);
        respond(&mut stream, "200 OK", "", &body);
    } else {
        respond(&mut stream, "404 Not Found", "", b"not found");
    }
}
