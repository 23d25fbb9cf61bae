//! In-process HTTP ingestion endpoint for end-to-end tests

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use contracts::{Transmission, TransmissionId};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the stub answers one request
#[derive(Debug, Clone)]
pub enum StubReply {
    Status(u16),
    /// Status with a JSON body (206 responses)
    Body(u16, String),
    /// Keep the connection open and never answer
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    /// Lower-cased header names
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Decompressed payload lines
    pub fn lines(&self) -> Vec<String> {
        let payload = Transmission::new(
            TransmissionId::new(0),
            self.body.clone(),
            self.headers.get("content-type").cloned().unwrap_or_default(),
            self.headers.get("content-encoding").cloned().unwrap_or_default(),
        );
        transmission::decode_lines(&payload).unwrap()
    }
}

#[derive(Default)]
struct StubState {
    script: Mutex<VecDeque<StubReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Answers from a script, then with 200 once the script runs out
pub struct IngestionStub {
    addr: SocketAddr,
    state: Arc<StubState>,
    accept_task: JoinHandle<()>,
}

impl IngestionStub {
    pub async fn start(script: Vec<StubReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(StubState {
            script: Mutex::new(script.into()),
            requests: Mutex::default(),
        });

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, state).await;
                });
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/v2/track", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}

impl Drop for IngestionStub {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<StubState>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let len = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let reply = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StubReply::Status(200));
    state.requests.lock().unwrap().push(RecordedRequest {
        path,
        headers,
        body,
    });

    let (code, body) = match reply {
        StubReply::Hang => {
            std::future::pending::<()>().await;
            return Ok(());
        }
        StubReply::Status(code) => (code, String::new()),
        StubReply::Body(code, body) => (code, body),
    };

    let response = format!(
        "HTTP/1.1 {code} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        reason(code),
        body.len()
    );
    let stream = reader.get_mut();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        206 => "Partial Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
