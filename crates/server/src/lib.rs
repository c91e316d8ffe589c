//! TCP front-end.
//!
//! A single-threaded async accept loop multiplexes client sockets; all
//! storage work happens on the worker pool's OS threads, so the front-end
//! never blocks on I/O it doesn't own. Each connection carries its session
//! state (authentication, current database); responses go out in request
//! order because one task owns each socket.

pub mod auth;
mod worker;

pub use worker::WorkerPool;

use common::{Config, DbError, DbResult};
use engine::{DatabaseOptions, QueryOutput as EngineOutput};
use parser::ServerCommand;
use protocol::{frame, QueryOutput, Request, Response};
use serde_json::Value;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Semaphore,
};
use tracing::{info, warn};

/// Database names must stay inside the data directory.
fn valid_database_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Default)]
struct ServerStats {
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    total_queries: AtomicU64,
    total_errors: AtomicU64,
}

/// Per-connection mutable state.
struct Session {
    id: u64,
    authenticated: bool,
    database: Option<String>,
}

pub struct Server {
    config: Config,
    pool: WorkerPool,
    stats: ServerStats,
    started: Instant,
    sessions: AtomicU64,
    connections: Arc<Semaphore>,
}

impl Server {
    pub fn new(config: Config) -> DbResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let options = DatabaseOptions {
            wal: config.wal.clone(),
            buffer_pages: config.buffer_pages,
            object_pages: config.object_pages,
            audit: false,
        };
        let pool = WorkerPool::new(
            config.worker_count,
            options,
            Duration::from_millis(config.query_timeout_ms),
        );
        let connections = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            config,
            pool,
            stats: ServerStats::default(),
            started: Instant::now(),
            sessions: AtomicU64::new(1),
            connections,
        })
    }

    /// Bind the configured address and serve until the task is cancelled.
    pub async fn run(self: Arc<Self>) -> DbResult<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, workers = self.pool.worker_count(), "listening");
        self.run_with_listener(listener).await
    }

    /// Serve on an already-bound listener (used by in-process tests).
    pub async fn run_with_listener(self: Arc<Self>, listener: TcpListener) -> DbResult<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let server = Arc::clone(&self);

            let Ok(permit) = Arc::clone(&server.connections).try_acquire_owned() else {
                warn!(%peer, "connection limit reached");
                drop(socket);
                continue;
            };

            tokio::spawn(async move {
                let session_id = server.sessions.fetch_add(1, Ordering::SeqCst);
                server.stats.total_connections.fetch_add(1, Ordering::SeqCst);
                server.stats.active_connections.fetch_add(1, Ordering::SeqCst);

                if let Err(e) = server.handle_connection(socket, session_id).await {
                    warn!(%peer, error = %e, "connection error");
                }

                server.pool.end_session(session_id);
                server.stats.active_connections.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream, session_id: u64) -> std::io::Result<()> {
        let (read_half, mut writer) = socket.into_split();
        let mut reader = BufReader::new(read_half);

        let auth_required = !self.config.auth.is_empty();
        let mut session = Session {
            id: session_id,
            authenticated: !auth_required,
            database: None,
        };

        frame::write_frame(
            &mut writer,
            &Response::Welcome {
                server: "sawitdb".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                auth_required,
            },
        )
        .await?;

        let idle_limit = Duration::from_millis(self.config.query_timeout_ms);
        loop {
            // Read inactivity beyond the query timeout closes the connection.
            let request =
                match tokio::time::timeout(idle_limit, frame::read_frame::<_, Request>(&mut reader))
                    .await
                {
                    Err(_) => break,
                    Ok(Ok(None)) => break,
                    Ok(Ok(Some(request))) => request,
                    Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                        warn!(session = session.id, error = %e, "protocol violation");
                        let _ = frame::write_frame(&mut writer, &Response::error(e.to_string()))
                            .await;
                        break;
                    }
                    Ok(Err(_)) => break,
                };

            let response = self.handle_request(request, &mut session).await;
            if matches!(response, Response::Error { .. }) {
                self.stats.total_errors.fetch_add(1, Ordering::SeqCst);
            }
            frame::write_frame(&mut writer, &response).await?;
        }

        writer.shutdown().await.ok();
        Ok(())
    }

    async fn handle_request(&self, request: Request, session: &mut Session) -> Response {
        if !session.authenticated && !matches!(request, Request::Auth { .. }) {
            return Response::error("Authentication required");
        }

        match request {
            Request::Auth { username, password } => {
                match self.config.auth.get(&username) {
                    Some(stored) if auth::verify(&password, stored) => {
                        session.authenticated = true;
                        Response::AuthSuccess
                    }
                    _ => Response::error("invalid credentials"),
                }
            }
            Request::Use { database } => match self.select_database(&database) {
                Ok(()) => {
                    session.database = Some(database.clone());
                    Response::UseSuccess { database }
                }
                Err(e) => Response::error(e.to_string()),
            },
            Request::Query { query, params } => {
                self.stats.total_queries.fetch_add(1, Ordering::SeqCst);
                self.handle_query(query, params, session).await
            }
            Request::Ping => Response::Pong {
                timestamp: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
            },
            Request::ListDatabases => Response::DatabaseList {
                databases: self.list_databases(),
            },
            Request::DropDatabase { database } => match self.drop_database(&database).await {
                Ok(()) => Response::DropSuccess { database },
                Err(e) => Response::error(e.to_string()),
            },
            Request::Stats => Response::Stats {
                uptime_seconds: self.started.elapsed().as_secs(),
                active_connections: self.stats.active_connections.load(Ordering::SeqCst),
                total_connections: self.stats.total_connections.load(Ordering::SeqCst),
                total_queries: self.stats.total_queries.load(Ordering::SeqCst),
                total_errors: self.stats.total_errors.load(Ordering::SeqCst),
                workers: self.pool.worker_count() as u64,
            },
        }
    }

    async fn handle_query(
        &self,
        query: String,
        params: Option<HashMap<String, Value>>,
        session: &mut Session,
    ) -> Response {
        let start = Instant::now();

        // Server-level statements run without a current database, in either
        // keyword dialect.
        if let Some(command) = parser::parse_server_statement(&query) {
            let result = self.run_server_statement(command, session).await;
            return match result {
                Ok(output) => Response::QueryResult {
                    result: output,
                    query,
                    execution_time_ms: elapsed_ms(start),
                },
                Err(e) => Response::error(e.to_string()),
            };
        }

        let Some(database) = session.database.clone() else {
            return Response::error("no database selected; USE a database first");
        };
        let path = self.database_path(&database);

        match self.pool.dispatch(path, query.clone(), params, session.id).await {
            Ok(output) => Response::QueryResult {
                result: convert_output(output),
                query,
                execution_time_ms: elapsed_ms(start),
            },
            Err(e) => Response::error(e.to_string()),
        }
    }

    async fn run_server_statement(
        &self,
        command: ServerCommand,
        session: &mut Session,
    ) -> DbResult<QueryOutput> {
        match command {
            ServerCommand::CreateDatabase(name) => {
                let path = self.checked_path(&name)?;
                if path.exists() {
                    return Err(DbError::AlreadyExists(format!(
                        "database '{name}' already exists"
                    )));
                }
                let options = self.database_options();
                tokio::task::spawn_blocking(move || {
                    engine::Database::open(&path, options)?.close()
                })
                .await
                .map_err(|e| DbError::WorkerCrashed(e.to_string()))??;
                Ok(QueryOutput::Message(format!("database '{name}' created")))
            }
            ServerCommand::UseDatabase(name) => {
                self.select_database(&name)?;
                session.database = Some(name.clone());
                Ok(QueryOutput::Message(format!("using database '{name}'")))
            }
            ServerCommand::ShowDatabases => Ok(QueryOutput::Value(Value::Array(
                self.list_databases().into_iter().map(Value::String).collect(),
            ))),
            ServerCommand::DropDatabase(name) => {
                self.drop_database(&name).await?;
                if session.database.as_deref() == Some(&name) {
                    session.database = None;
                }
                Ok(QueryOutput::Message(format!("database '{name}' dropped")))
            }
        }
    }

    fn select_database(&self, name: &str) -> DbResult<()> {
        let path = self.checked_path(name)?;
        if !path.exists() {
            return Err(DbError::NotFound(format!("database '{name}' does not exist")));
        }
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> DbResult<()> {
        let path = self.checked_path(name)?;
        if !path.exists() {
            return Err(DbError::NotFound(format!("database '{name}' does not exist")));
        }
        // The owning worker closes its handle before the files go away.
        self.pool.close_database(path.clone()).await?;
        std::fs::remove_file(&path)?;
        for ext in ["wal", "audit"] {
            let companion = path.with_extension(ext);
            if companion.exists() {
                std::fs::remove_file(companion)?;
            }
        }
        Ok(())
    }

    fn list_databases(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.config.data_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| {
                        let path = entry.path();
                        if path.extension().and_then(|e| e.to_str()) == Some("sawit") {
                            path.file_stem()
                                .and_then(|s| s.to_str())
                                .map(str::to_string)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn database_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(format!("{name}.sawit"))
    }

    /// Path traversal prevention: names are validated before touching disk.
    fn checked_path(&self, name: &str) -> DbResult<PathBuf> {
        if !valid_database_name(name) {
            return Err(DbError::Protocol(format!("invalid database name '{name}'")));
        }
        Ok(self.database_path(name))
    }

    fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            wal: self.config.wal.clone(),
            buffer_pages: self.config.buffer_pages,
            object_pages: self.config.object_pages,
            audit: false,
        }
    }
}

fn convert_output(output: EngineOutput) -> QueryOutput {
    match output {
        EngineOutput::Rows(rows) => QueryOutput::Rows(rows),
        EngineOutput::Message(message) => QueryOutput::Message(message),
        EngineOutput::Value(value) | EngineOutput::Plan(value) => QueryOutput::Value(value),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_names_reject_path_traversal() {
        assert!(valid_database_name("kebun"));
        assert!(valid_database_name("kebun_2-b"));
        assert!(!valid_database_name("../etc/passwd"));
        assert!(!valid_database_name("a/b"));
        assert!(!valid_database_name(""));
        assert!(!valid_database_name(&"x".repeat(100)));
    }
}
