//! Socket client for the daemon API.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use tug_common::protocol::{Request, Response};

/// One-shot JSON-line client for `tugd`.
pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    /// Send one request and wait for its response line.
    pub async fn request(&self, request: &Request) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket).await.with_context(|| {
            format!(
                "connecting to daemon at {} (is tugd running?)",
                self.socket.display()
            )
        })?;

        let mut payload = serde_json::to_string(request)?;
        payload.push('\n');
        stream.write_all(payload.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            bail!("daemon closed the connection without responding");
        }
        serde_json::from_str(&line).context("daemon sent an unparseable response")
    }
}
