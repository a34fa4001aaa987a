use std::sync::Arc;

use log::{debug, error, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::engine::{ObjectBuckets, ObjectClient};
use crate::sdk::client::{ListRequest, NOT_FOUND};
use crate::{Error, Result};

const MAX_CONNECTIONS: usize = 100;

/// Serves object buckets over a line-oriented TCP protocol.
pub struct Router {
    buckets: Arc<dyn ObjectBuckets>,
    semaphore: Arc<Semaphore>,
}

impl Router {
    pub fn new(buckets: Arc<dyn ObjectBuckets>) -> Self {
        Self {
            buckets,
            semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(max));
        self
    }

    pub async fn listen(&self, port: &str) -> Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        info!("Tuple object server listening on port {}", port);
        self.serve(listener).await
    }

    /// Accepts connections from an already bound listener until it fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let buckets = self.buckets.clone();
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

                debug!("accepted connection from {}", peer);
                if let Err(e) = handle_connection(socket, buckets).await {
                    error!("Connection error: {}", e);
                }
            });
        }
    }
}

pub async fn handle_connection(mut socket: TcpStream, buckets: Arc<dyn ObjectBuckets>) -> Result<()> {
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
            "QUIT" => break,
            "HEAD" | "GET" | "PUT" | "DEL" | "LIST" => {
                if parts.len() < 3 {
                    "ERR missing arguments".to_string()
                } else {
                    match buckets.bucket(parts[1]) {
                        Ok(client) => match dispatch(&command, client.as_ref(), &parts[2..]).await {
                            Ok(reply) => reply,
                            Err(e) => error_reply(e),
                        },
                        Err(e) => error_reply(e),
                    }
                }
            }
            _ => "ERR unknown command".to_string(),
        };

        writer.write_all(format!("{}\n", response).as_bytes()).await?;
    }
    Ok(())
}

/// Runs one bucket command; `args` follow the bucket name.
async fn dispatch(command: &str, client: &dyn ObjectClient, args: &[&str]) -> Result<String> {
    let name = args[0];
    match command {
        "HEAD" => {
            let meta = client.head(name).await?;
            Ok(format!("OK {}", serde_json::to_string(&meta)?))
        }
        "GET" => {
            let data = client.get_object(name).await?;
            Ok(format!("OK {}", hex::encode(data)))
        }
        "PUT" => {
            let payload = args.get(1).copied().unwrap_or("");
            let data = hex::decode(payload)
                .map_err(|e| Error::Remote(format!("invalid payload: {}", e)))?;
            client.put_object(name, data).await?;
            Ok("OK".to_string())
        }
        "DEL" => {
            client.delete_object(name).await?;
            Ok("OK".to_string())
        }
        "LIST" => {
            let request: ListRequest = serde_json::from_str(&args.join(" "))?;
            let page = client
                .list_objects(&request.prefix, request.continuation.as_deref())
                .await?;
            Ok(format!("OK {}", serde_json::to_string(&page)?))
        }
        other => Err(Error::Internal(format!("unroutable command {}", other))),
    }
}

fn error_reply(e: Error) -> String {
    match e {
        Error::ObjectNotFound(name) => format!("ERR {} {}", NOT_FOUND, name),
        other => format!("ERR {}", other.to_string().to_lowercase()),
    }
}
