#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, String),
    Text(u16, String),
    /// Read the request, then hang up without answering.
    HangUp,
}

impl Reply {
    pub fn ok_files(files: &[(&str, &str)]) -> Self {
        let mut map = serde_json::Map::new();
        for (k, v) in files {
            map.insert((*k).to_string(), serde_json::Value::String((*v).to_string()));
        }
        let body = serde_json::json!({ "status": "ok", "files": map });
        Reply::Json(200, body.to_string())
    }
}

/// Minimal HTTP/1.1 responder on 127.0.0.1. Replies are served in order;
/// the last one repeats once the script runs out.
pub struct TestServer {
    pub url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(replies)));

        let (hits_t, requests_t) = (hits.clone(), requests.clone());
        thread::spawn(move || {
            let mut last: Option<Reply> = None;
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                hits_t.fetch_add(1, Ordering::SeqCst);
                let reply = {
                    let mut s = script.lock().expect("script lock");
                    s.pop_front().or_else(|| last.clone())
                };
                if let Some(r) = reply.as_ref() {
                    last = Some(r.clone());
                }
                handle(stream, reply, &requests_t);
            }
        });

        Self {
            url,
            hits,
            requests,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Raw request heads, lower-cased.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

fn handle(mut stream: TcpStream, reply: Option<Reply>, requests: &Mutex<Vec<String>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    if let Ok(mut r) = requests.lock() {
        r.push(String::from_utf8_lossy(&buf).to_ascii_lowercase());
    }

    let (status, content_type, body) = match reply {
        Some(Reply::Json(status, body)) => (status, "application/json", body),
        Some(Reply::Text(status, body)) => (status, "text/plain", body),
        Some(Reply::HangUp) | None => return,
    };
    let head = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body.as_bytes());
    let _ = stream.flush();
}
