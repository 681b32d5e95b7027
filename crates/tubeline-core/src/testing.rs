//! Scripted HTTP server for driving the API clients offline in tests.
//!
//! Enabled by the `test-support` feature; stage crates turn it on for their
//! dev-dependency on this crate.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Serves scripted `(status, body)` responses in order, one per connection,
/// and records each request as `"<target> <body>"`.
pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start(responses: Vec<(u16, String)>) -> Self {
        Self::start_with(|_| responses)
    }

    /// Like [`start`](Self::start), for responses that embed the server's own URL
    pub fn start_with(script: impl FnOnce(&str) -> Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let base_url = format!("http://{addr}");
        let responses = script(&base_url);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        let handle = std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let (request, stream) = read_request(stream);
                seen.lock().expect("request log").push(request);
                respond(stream, status, &body);
            }
        });

        Self {
            base_url,
            requests,
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log").clone()
    }

    /// Wait until every scripted response has been served
    pub fn finish(mut self) -> Vec<String> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("mock server thread");
        }
        self.requests()
    }
}

fn read_request(stream: TcpStream) -> (String, TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).expect("request line");

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).expect("request header");
        if header == "\r\n" || header.is_empty() {
            break;
        }
        if let Some(v) = header.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = v.trim().parse().unwrap_or(0);
        }
    }
    let mut payload = vec![0u8; content_length];
    reader.read_exact(&mut payload).expect("request body");

    let target = request_line.split_whitespace().nth(1).unwrap_or("");
    let recorded = format!("{target} {}", String::from_utf8_lossy(&payload));
    (recorded.trim().to_string(), reader.into_inner())
}

fn respond(mut stream: TcpStream, status: u16, body: &str) {
    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).expect("write response");
    stream.flush().expect("flush response");
}
