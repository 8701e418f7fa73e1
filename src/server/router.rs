use std::sync::Arc;

use log::{error, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::{DocumentStore, Error, Result};

const MAX_CONNECTIONS: usize = 100;

pub struct Router {
    store: Arc<dyn DocumentStore>,
    semaphore: Arc<Semaphore>,
}

impl Router {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    pub async fn listen(&self, port: &str) -> Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        info!("EMS store listening on port {}", port);
        self.serve(listener).await
    }

    /// Accepts connections from an already bound listener until it fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let store = self.store.clone();
            let sem = self.semaphore.clone();

            tokio::spawn(async move {
                let _permit = match sem.try_acquire() {
                    Ok(p) => p,
                    Err(_) => {
                        error!("Server busy: too many concurrent connections. Rejecting {}", peer);
                        let mut socket = socket;
                        let _ = socket.shutdown().await;
                        return;
                    }
                };

                if let Err(e) = handle_connection(socket, store).await {
                    error!("Connection error from {}: {}", peer, e);
                }
            });
        }
    }
}

fn err_line(e: &Error) -> String {
    match e {
        Error::Conflict { expected, current } => format!("CONFLICT {} {}", expected, current),
        other => format!("ERR {}", other.to_string().to_lowercase()),
    }
}

fn reply<T: serde::Serialize>(res: Result<T>) -> Result<String> {
    Ok(match res {
        Ok(v) => format!("OK {}", serde_json::to_string(&v)?),
        Err(e) => err_line(&e),
    })
}

/// Splits off the first `n` whitespace-separated tokens and returns the untouched remainder.
fn leading_tokens(line: &str, n: usize) -> (Vec<&str>, &str) {
    let mut rest = line.trim_start();
    let mut tokens = Vec::with_capacity(n);
    while tokens.len() < n && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        tokens.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (tokens, rest.trim_end())
}

/// Serves one client until it sends `QUIT` or disconnects.
///
/// One command per line; the trailing JSON argument of `REPLACE` is taken verbatim.
pub async fn handle_connection(mut socket: TcpStream, store: Arc<dyn DocumentStore>) -> Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let command = parts[0].to_uppercase();
        let response = match command.as_str() {
            "PING" => "PONG".to_string(),
            "CREATE" => {
                if parts.len() < 3 {
                    "ERR missing arguments".to_string()
                } else {
                    reply(store.create_collection(parts[1], parts[2]).await)?
                }
            }
            "LIST" => {
                if parts.len() < 2 {
                    "ERR missing arguments".to_string()
                } else {
                    reply(store.list_collections(parts[1]).await)?
                }
            }
            "FIND" => {
                if parts.len() < 4 {
                    "ERR missing arguments".to_string()
                } else {
                    reply(store.find_one(parts[1], parts[2], parts[3]).await)?
                }
            }
            "COUNT" => {
                if parts.len() < 3 {
                    "ERR missing arguments".to_string()
                } else {
                    reply(store.count(parts[1], parts[2]).await)?
                }
            }
            "DELETE_MANY" => {
                if parts.len() < 3 {
                    "ERR missing arguments".to_string()
                } else {
                    reply(store.delete_many(parts[1], parts[2]).await)?
                }
            }
            "REPLACE" => {
                let (head, val_str) = leading_tokens(&line, 5);
                if head.len() < 5 || val_str.is_empty() {
                    "ERR missing arguments".to_string()
                } else {
                    let expected = match head[4] {
                        "-" => Ok(None),
                        rev => rev.parse::<u64>().map(Some),
                    };
                    match (expected, serde_json::from_str(val_str)) {
                        (Ok(expected), Ok(body)) => reply(
                            store
                                .replace_one(head[1], head[2], head[3], body, expected)
                                .await,
                        )?,
                        (Err(_), _) => "ERR invalid revision".to_string(),
                        (_, Err(_)) => "ERR invalid json value".to_string(),
                    }
                }
            }
            "QUIT" => break,
            _ => "ERR unknown command".to_string(),
        };

        writer.write_all(format!("{}\n", response).as_bytes()).await?;
    }
    Ok(())
}
