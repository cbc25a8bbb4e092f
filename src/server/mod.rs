//! TCP broker: accept loop and produce/fetch dispatch
//!
//! The broker is a thin adapter over the storage core: one task per
//! connection, each looping over framed requests. Produce hands the mutable
//! batch body to [`Partition::append`] (which rewrites the base offset in
//! place) and answers with the assigned offset; Fetch parses
//! `[offset][max_bytes]` and answers with raw batch bytes.
//!
//! Error mapping follows the storage contracts: read failures become empty
//! response bodies so consumers can keep polling, while append failures and
//! malformed frames close the connection.

use std::future::Future;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, StreamlogError};
use crate::protocol::{self, Request, API_KEY_FETCH, API_KEY_PRODUCE, FETCH_BODY_SIZE};
use crate::storage::{
    CleanerConfig, Partition, RetentionCleaner, SegmentCache,
};

/// Single-node broker over one partition
pub struct Broker {
    config: ServerConfig,
    partition: Arc<Partition>,
    cache: Arc<SegmentCache>,
    cleaner: Arc<RetentionCleaner>,
}

impl Broker {
    /// Open (or recover) the partition and wire up the cache and cleaner.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let cache = Arc::new(SegmentCache::new(config.segment_cache_capacity));

        let partition = Arc::new(Partition::open(
            &config.base_dir,
            &config.topic,
            config.partition_id,
            config.partition_config(),
            Arc::clone(&cache),
        )?);

        let cleaner = RetentionCleaner::new(CleanerConfig {
            retention_check_interval_ms: config.retention.retention_check_interval_ms,
        });
        cleaner.register(Arc::clone(&partition));

        Ok(Self {
            config,
            partition,
            cache,
            cleaner,
        })
    }

    /// The partition served by this broker
    pub fn partition(&self) -> Arc<Partition> {
        Arc::clone(&self.partition)
    }

    /// Bind the configured listen address and serve until `shutdown`
    /// resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| {
                StreamlogError::Server(format!(
                    "failed to bind {}: {e}",
                    self.config.listen_addr
                ))
            })?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already-bound listener until `shutdown`
    /// resolves, then stop the cleaner and close the storage.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(
            addr = %listener.local_addr()?,
            topic = %self.partition.topic(),
            partition = self.partition.id(),
            "broker listening"
        );

        self.cleaner.start();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "connection accepted");
                            let partition = Arc::clone(&self.partition);
                            tokio::spawn(handle_connection(stream, partition));
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                () = &mut shutdown => break,
            }
        }

        info!("broker shutting down");
        self.cleaner.stop().await;
        self.partition.close()?;
        self.cache.close();
        Ok(())
    }
}

async fn handle_connection(mut stream: TcpStream, partition: Arc<Partition>) {
    loop {
        let request = match protocol::read_request(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "closing connection");
                return;
            }
        };

        let correlation_id = request.header.correlation_id;
        let body = match request.header.api_key {
            API_KEY_PRODUCE => match handle_produce(&partition, request) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "produce failed, closing connection");
                    return;
                }
            },
            API_KEY_FETCH => match handle_fetch(&partition, &request) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "malformed fetch, closing connection");
                    return;
                }
            },
            other => {
                warn!(api_key = other, "unknown api key, closing connection");
                return;
            }
        };

        if let Err(e) = protocol::write_response(&mut stream, correlation_id, &body).await {
            debug!(error = %e, "failed to write response");
            return;
        }
    }
}

fn handle_produce(partition: &Partition, mut request: Request) -> Result<Bytes> {
    let offset = partition.append(&mut request.body)?;
    Ok(Bytes::copy_from_slice(&(offset as u64).to_be_bytes()))
}

fn handle_fetch(partition: &Partition, request: &Request) -> Result<Bytes> {
    if request.body.len() < FETCH_BODY_SIZE {
        return Err(StreamlogError::Protocol(format!(
            "fetch body too short: {} bytes",
            request.body.len()
        )));
    }

    let mut cursor = &request.body[..];
    let offset = cursor.get_u64() as i64;
    let max_bytes = cursor.get_i32();

    // Read errors surface to the client as an empty body, keeping the
    // connection alive for further polls.
    match partition.read(offset, max_bytes) {
        Ok(data) => Ok(data),
        Err(e) => {
            debug!(offset, error = %e, "fetch returned no data");
            Ok(Bytes::new())
        }
    }
}
