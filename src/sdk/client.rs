use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::{CollectionAdmin, DocumentReader, DocumentWriter, Error, Result, StoredDocument};

/// Upper bound for establishing a connection to the daemon.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const ATTEMPTS: u64 = 3;

/// Remote [`crate::DocumentStore`] speaking the daemon's line protocol.
pub struct Client {
    addr: String,
    inner: Mutex<Option<ClientInner>>,
}

struct ClientInner {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    /// Connects and verifies the daemon answers `PING`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let inner = Client::connect_inner(addr).await?;
        let client = Self {
            addr: addr.to_string(),
            inner: Mutex::new(Some(inner)),
        };
        client.ping().await?;
        Ok(client)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends one command, reconnecting and resending on failure.
    ///
    /// With `resend_unanswered` false, a command that was written but got no
    /// reply is not sent again: the daemon may already have applied it.
    async fn send_and_receive(&self, cmd: String, resend_unanswered: bool) -> Result<String> {
        let mut inner_guard = self.inner.lock().await;
        let mut last_error = String::from("no attempt made");

        for i in 0..ATTEMPTS {
            if inner_guard.is_none() {
                match Client::connect_inner(&self.addr).await {
                    Ok(inner) => *inner_guard = Some(inner),
                    Err(e) => {
                        last_error = e.to_string();
                        tokio::time::sleep(Duration::from_millis((i + 1) * 200)).await;
                        continue;
                    }
                }
            }
            let Some(inner) = inner_guard.as_mut() else {
                continue;
            };

            if let Err(e) = inner.writer.write_all(format!("{}\n", cmd).as_bytes()).await {
                last_error = e.to_string();
                *inner_guard = None;
                continue;
            }

            let mut resp = String::new();
            match inner.reader.read_line(&mut resp).await {
                Ok(0) => last_error = "connection closed by server".to_string(),
                Ok(_) => return parse_status(resp.trim()),
                Err(e) => last_error = e.to_string(),
            }
            *inner_guard = None;
            if !resend_unanswered {
                return Err(Error::ConnectionUnavailable(format!(
                    "{}: no reply to a conditional write, its outcome is unknown: {}",
                    self.addr, last_error
                )));
            }
        }

        Err(Error::ConnectionUnavailable(format!(
            "{} after {} attempts: {}",
            self.addr, ATTEMPTS, last_error
        )))
    }

    async fn connect_inner(addr: &str) -> Result<ClientInner> {
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::ConnectionUnavailable(format!("{}: {}", addr, e))),
            Err(_) => {
                return Err(Error::ConnectionUnavailable(format!(
                    "{}: timed out after {:?}",
                    addr, CONNECT_TIMEOUT
                )))
            }
        };
        let (reader, writer) = stream.into_split();
        Ok(ClientInner {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn request<T: DeserializeOwned>(&self, cmd: String) -> Result<T> {
        self.request_with(cmd, true).await
    }

    async fn request_with<T: DeserializeOwned>(&self, cmd: String, resend_unanswered: bool) -> Result<T> {
        let resp = self.send_and_receive(cmd, resend_unanswered).await?;
        let json_data = resp
            .strip_prefix("OK ")
            .ok_or_else(|| Error::Internal(format!("Invalid response: {}", resp)))?;
        Ok(serde_json::from_str(json_data)?)
    }
}

fn parse_status(resp: &str) -> Result<String> {
    if let Some(msg) = resp.strip_prefix("ERR") {
        return Err(Error::Internal(msg.trim().to_string()));
    }
    if let Some(rest) = resp.strip_prefix("CONFLICT ") {
        let mut nums = rest.split_whitespace().map(str::parse::<u64>);
        return match (nums.next(), nums.next()) {
            (Some(Ok(expected)), Some(Ok(current))) => Err(Error::Conflict { expected, current }),
            _ => Err(Error::Internal(format!("Invalid response: {}", resp))),
        };
    }
    Ok(resp.to_string())
}

#[async_trait]
impl DocumentReader for Client {
    async fn find_one(&self, db: &str, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        self.request(format!("FIND {} {} {}", db, collection, key)).await
    }

    async fn count(&self, db: &str, collection: &str) -> Result<usize> {
        self.request(format!("COUNT {} {}", db, collection)).await
    }
}

#[async_trait]
impl DocumentWriter for Client {
    async fn replace_one(
        &self,
        db: &str,
        collection: &str,
        key: &str,
        body: Value,
        expected_revision: Option<u64>,
    ) -> Result<u64> {
        let rev = expected_revision.map_or_else(|| "-".to_string(), |r| r.to_string());
        let val_str = serde_json::to_string(&body)?;
        // A resent compare-and-swap would conflict with its own first delivery.
        self.request_with(
            format!("REPLACE {} {} {} {} {}", db, collection, key, rev, val_str),
            expected_revision.is_none(),
        )
        .await
    }

    async fn delete_many(&self, db: &str, collection: &str) -> Result<usize> {
        self.request(format!("DELETE_MANY {} {}", db, collection)).await
    }
}

#[async_trait]
impl CollectionAdmin for Client {
    async fn ping(&self) -> Result<()> {
        let resp = self.send_and_receive("PING".to_string(), true).await?;
        if resp == "PONG" {
            Ok(())
        } else {
            Err(Error::ConnectionUnavailable(format!("unexpected ping reply: {}", resp)))
        }
    }

    async fn create_collection(&self, db: &str, collection: &str) -> Result<bool> {
        self.request(format!("CREATE {} {}", db, collection)).await
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        self.request(format!("LIST {}", db)).await
    }
}
