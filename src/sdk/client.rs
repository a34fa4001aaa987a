use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::engine::{ObjectClient, ObjectMeta, ObjectPage};
use crate::{Error, Result};

/// Reply prefix the object server uses for a missing object.
pub const NOT_FOUND: &str = "NOT_FOUND";

/// Arguments of a `LIST` command, sent as one JSON word.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListRequest {
    pub prefix: String,
    pub continuation: Option<String>,
}

/// An [`ObjectClient`] talking to a `tuple-objectd` server over TCP.
///
/// One connection is shared by all calls; it is re-established transparently
/// when the server drops it.
pub struct TcpObjectClient {
    addr: String,
    bucket: String,
    inner: Mutex<Option<ClientInner>>,
}

struct ClientInner {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TcpObjectClient {
    pub async fn connect(addr: &str, bucket: &str) -> Result<Self> {
        let inner = TcpObjectClient::connect_inner(addr).await?;
        Ok(Self {
            addr: addr.to_string(),
            bucket: bucket.to_string(),
            inner: Mutex::new(Some(inner)),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Round-trips `PING`.
    pub async fn ping(&self) -> Result<()> {
        match self.send_and_receive("PING".to_string()).await?.as_str() {
            "PONG" => Ok(()),
            other => Err(Error::Remote(format!("unexpected reply to PING: {}", other))),
        }
    }

    async fn send_and_receive(&self, cmd: String) -> Result<String> {
        let mut inner_guard = self.inner.lock().await;

        // Retry logic
        for i in 0..3u64 {
            if inner_guard.is_none() {
                match TcpObjectClient::connect_inner(&self.addr).await {
                    Ok(inner) => *inner_guard = Some(inner),
                    Err(e) => {
                        if i == 2 {
                            return Err(e);
                        }
                        tokio::time::sleep(std::time::Duration::from_millis((i + 1) * 200)).await;
                        continue;
                    }
                }
            }

            let Some(inner) = inner_guard.as_mut() else {
                continue;
            };
            if inner.writer.write_all(format!("{}\n", cmd).as_bytes()).await.is_err() {
                *inner_guard = None;
                continue;
            }

            let mut resp = String::new();
            match inner.reader.read_line(&mut resp).await {
                Ok(0) | Err(_) => {
                    *inner_guard = None;
                    continue;
                }
                Ok(_) => return parse_reply(resp.trim()),
            }
        }

        Err(Error::Remote(format!(
            "{} unreachable after 3 attempts",
            self.addr
        )))
    }

    async fn connect_inner(addr: &str) -> Result<ClientInner> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(ClientInner {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn request_payload(&self, cmd: String) -> Result<String> {
        let resp = self.send_and_receive(cmd).await?;
        resp.strip_prefix("OK ")
            .map(str::to_string)
            .ok_or_else(|| Error::Remote(format!("invalid response: {}", resp)))
    }
}

fn parse_reply(resp: &str) -> Result<String> {
    match resp.strip_prefix("ERR") {
        Some(msg) => {
            let msg = msg.trim_start();
            match msg.strip_prefix(NOT_FOUND) {
                Some(name) => Err(Error::ObjectNotFound(name.trim().to_string())),
                None => Err(Error::Remote(msg.to_string())),
            }
        }
        None => Ok(resp.to_string()),
    }
}

#[async_trait]
impl ObjectClient for TcpObjectClient {
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>> {
        let json_data = self
            .request_payload(format!("HEAD {} {}", self.bucket, name))
            .await?;
        Ok(serde_json::from_str(&json_data)?)
    }

    async fn get_object(&self, name: &str) -> Result<Vec<u8>> {
        let resp = self
            .send_and_receive(format!("GET {} {}", self.bucket, name))
            .await?;
        let payload = match resp.as_str() {
            "OK" => "",
            other => other
                .strip_prefix("OK ")
                .ok_or_else(|| Error::Remote(format!("invalid response: {}", other)))?,
        };
        hex::decode(payload).map_err(|e| Error::Remote(format!("invalid payload for {}: {}", name, e)))
    }

    async fn put_object(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.send_and_receive(format!("PUT {} {} {}", self.bucket, name, hex::encode(data)))
            .await?;
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        self.send_and_receive(format!("DEL {} {}", self.bucket, name))
            .await?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        let request = serde_json::to_string(&ListRequest {
            prefix: prefix.to_string(),
            continuation: continuation.map(str::to_string),
        })?;
        let json_data = self
            .request_payload(format!("LIST {} {}", self.bucket, request))
            .await?;
        Ok(serde_json::from_str(&json_data)?)
    }
}
