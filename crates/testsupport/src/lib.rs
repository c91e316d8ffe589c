//! Helpers for spinning up a TCP server backed by a temporary data
//! directory.
//!
//! [`TestServer`] runs the full front-end + worker-pool stack in-process so
//! integration tests can exercise the public wire protocol. Each instance
//! owns an isolated temp directory and shuts down when dropped.

use anyhow::Result;
use common::Config;
use protocol::{frame, Request, Response};
use server::Server;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::{
    io::BufReader,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    task::JoinHandle,
};

/// In-process server bound to `127.0.0.1` on a random port.
pub struct TestServer {
    address: String,
    _temp_dir: TempDir,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start with config tweaks (auth entries, worker count, timeouts).
    pub async fn start_with(tweak: impl FnOnce(&mut Config)) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let mut config = Config::builder()
            .data_dir(temp_dir.path().to_path_buf())
            .worker_count(2)
            .build();
        tweak(&mut config);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();

        let server = Arc::new(Server::new(config)?);
        let task = tokio::spawn(async move {
            if let Err(e) = server.run_with_listener(listener).await {
                eprintln!("test server error: {e}");
            }
        });

        Ok(Self {
            address,
            _temp_dir: temp_dir,
            task,
        })
    }

    /// Socket address clients should dial.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Dial a new client, consuming the welcome frame.
    pub async fn connect(&self) -> Result<TestClient> {
        TestClient::connect(&self.address).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Minimal line-protocol client for tests.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub welcome: Response,
}

impl TestClient {
    pub async fn connect(address: &str) -> Result<Self> {
        let socket = TcpStream::connect(address).await?;
        let (read_half, writer) = socket.into_split();
        let mut reader = BufReader::new(read_half);

        let welcome: Response = frame::read_frame(&mut reader)
            .await?
            .ok_or_else(|| anyhow::anyhow!("server closed before welcome"))?;

        Ok(Self {
            reader,
            writer,
            welcome,
        })
    }

    /// Send one request and await its response.
    pub async fn request(&mut self, request: Request) -> Result<Response> {
        frame::write_frame(&mut self.writer, &request).await?;
        self.read_response().await
    }

    /// Read one response without sending anything (for pipelining tests).
    pub async fn read_response(&mut self) -> Result<Response> {
        frame::read_frame(&mut self.reader)
            .await?
            .ok_or_else(|| anyhow::anyhow!("server closed the connection"))
    }

    /// Fire a request without waiting for the response.
    pub async fn send(&mut self, request: Request) -> Result<()> {
        frame::write_frame(&mut self.writer, &request).await?;
        Ok(())
    }

    /// Convenience: run one SQL statement.
    pub async fn query(&mut self, sql: &str) -> Result<Response> {
        self.request(Request::Query {
            query: sql.to_string(),
            params: None,
        })
        .await
    }
}
