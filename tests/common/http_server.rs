//! Minimal HTTP/1.1 server for transport integration tests.
//!
//! Replies are served in order, one per request, each on its own connection. Every received
//! request head and body is recorded for later assertions.

use quota_dispatch::transport::gzip;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How the body bytes are written after the head.
#[derive(Debug, Clone, Copy)]
pub enum Pacing {
    /// All at once.
    Burst,
    /// One byte, then a pause, repeated.
    Trickle(Duration),
    /// The first `n` bytes, then nothing for a long time.
    StallAfter(usize),
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
    pub gzip: bool,
    pub pacing: Pacing,
}

impl Reply {
    /// Gzip-encoded JSON, as the real API answers.
    pub fn gzip_json(status: u16, json: &str) -> Self {
        Self { status, body: json.as_bytes().to_vec(), gzip: true, pacing: Pacing::Burst }
    }

    pub fn plain_json(status: u16, json: &str) -> Self {
        Self { status, body: json.as_bytes().to_vec(), gzip: false, pacing: Pacing::Burst }
    }

    pub fn paced(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }
}

/// A request as it arrived on the socket.
#[derive(Debug, Clone)]
pub struct Received {
    pub head: String,
    pub body: Vec<u8>,
}

impl Received {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

#[derive(Debug, Clone)]
pub struct TestServer {
    pub base_url: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl TestServer {
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

/// Bind on an ephemeral port and serve `replies` in order.
pub async fn start(replies: Vec<Reply>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().unwrap().port();
    let replies = Arc::new(Mutex::new(VecDeque::from(replies)));
    let received = Arc::new(Mutex::new(Vec::new()));

    let log = received.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let replies = replies.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let _ = handle(stream, replies, log).await;
            });
        }
    });

    TestServer { base_url: format!("http://127.0.0.1:{}/", port), received }
}

async fn handle(
    mut stream: TcpStream,
    replies: Arc<Mutex<VecDeque<Reply>>>,
    log: Arc<Mutex<Vec<Received>>>,
) -> std::io::Result<()> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    log.lock().unwrap().push(request);
    let reply = replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Reply::plain_json(500, r#"{"error":{"type":"noReplyScripted"}}"#));

    let body = if reply.gzip { gzip(&reply.body) } else { reply.body.clone() };
    let encoding = if reply.gzip { "Content-Encoding: gzip\r\n" } else { "" };
    let head = format!(
        "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        reply.status,
        encoding,
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;

    match reply.pacing {
        Pacing::Burst => stream.write_all(&body).await?,
        Pacing::Trickle(pause) => {
            for byte in &body {
                stream.write_all(&[*byte]).await?;
                stream.flush().await?;
                tokio::time::sleep(pause).await;
            }
        }
        Pacing::StallAfter(n) => {
            stream.write_all(&body[..n.min(body.len())]).await?;
            stream.flush().await?;
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
    stream.flush().await
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<Received>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let parsed = Received { head, body: Vec::new() };
    let length: usize =
        parsed.header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = (head_end + length).min(buf.len());
    Ok(Some(Received { head: parsed.head, body: buf[head_end..end].to_vec() }))
}
