//! Remote tree access over iroh QUIC.
//!
//! [`TreeTransport`] wraps an iroh [`Endpoint`] with connection pooling and
//! length-prefixed postcard framing. [`RemoteMap`] and [`RemoteLog`]
//! implement the client traits against a remote [`TreeService`], which hosts
//! any [`MapClient`]/[`LogClient`] pair (typically the memory trees) behind
//! an accept loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use iroh::endpoint::{Connection, RecvStream, SendStream};
use iroh::{Endpoint, EndpointAddr, SecretKey};
use sequin_types::{
    LogLeaf, MapIndex, MapLeaf, MapLeafInclusion, MapRootMetadata, SignedLogRoot, SignedMapRoot,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::TreeError;
use crate::message::{TreeRequest, TreeResponse};
use crate::{LogClient, MapClient};

/// ALPN protocol identifier for the tree service.
pub const TREE_ALPN: &[u8] = b"sequin-trees/0";

/// Maximum wire message size: 16 MB. A batch of map leaves dominates; entry
/// values are small, but a full page of mutations can reference many.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// QUIC transport to tree services.
///
/// Manages an iroh endpoint and a connection pool keyed by remote endpoint
/// ID. Every request opens a fresh bidirectional stream on a pooled
/// connection.
pub struct TreeTransport {
    endpoint: Endpoint,
    connections: Arc<RwLock<HashMap<iroh::EndpointId, Connection>>>,
}

impl TreeTransport {
    /// Bind a new endpoint speaking [`TREE_ALPN`].
    ///
    /// Use [`iroh::RelayMode::Disabled`] for local setups that don't need
    /// relay servers.
    pub async fn bind(
        secret_key: SecretKey,
        relay_mode: iroh::RelayMode,
    ) -> Result<Self, TreeError> {
        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![TREE_ALPN.to_vec()])
            .relay_mode(relay_mode)
            .bind()
            .await
            .map_err(|e| TreeError::Unavailable(format!("endpoint bind: {e}")))?;

        Ok(Self::from_endpoint(endpoint))
    }

    /// Wrap an existing iroh endpoint.
    pub fn from_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The [`EndpointAddr`] of this transport (ID + addresses).
    pub fn addr(&self) -> EndpointAddr {
        self.endpoint.addr()
    }

    /// This endpoint's public identity.
    pub fn endpoint_id(&self) -> iroh::EndpointId {
        self.endpoint.id()
    }

    /// Get or establish a connection to a remote service.
    async fn get_connection(&self, addr: EndpointAddr) -> Result<Connection, TreeError> {
        let remote_id = addr.id;

        {
            let cache = self.connections.read().await;
            if let Some(conn) = cache.get(&remote_id)
                && conn.close_reason().is_none()
            {
                return Ok(conn.clone());
            }
        }

        debug!(remote = %remote_id.fmt_short(), "connecting to tree service");
        let conn = self
            .endpoint
            .connect(addr, TREE_ALPN)
            .await
            .map_err(|e| TreeError::Unavailable(format!("connect: {e}")))?;

        {
            let mut cache = self.connections.write().await;
            cache.insert(remote_id, conn.clone());
        }

        Ok(conn)
    }

    /// Send one request and wait for its response.
    pub async fn request(
        &self,
        addr: EndpointAddr,
        request: &TreeRequest,
    ) -> Result<TreeResponse, TreeError> {
        let conn = self.get_connection(addr).await?;

        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| TreeError::Unavailable(format!("stream open: {e}")))?;

        Self::send_frame(&mut send, request).await?;
        Self::recv_frame(&mut recv).await
    }

    /// Write a length-prefixed postcard frame.
    async fn send_frame<T: serde::Serialize>(
        send: &mut SendStream,
        message: &T,
    ) -> Result<(), TreeError> {
        let payload =
            postcard::to_allocvec(message).map_err(|e| TreeError::Serialization(e.to_string()))?;

        send.write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .map_err(|e| TreeError::Unavailable(format!("stream write: {e}")))?;
        send.write_all(&payload)
            .await
            .map_err(|e| TreeError::Unavailable(format!("stream write: {e}")))?;
        send.finish()
            .map_err(|e| TreeError::Unavailable(format!("stream finish: {e}")))?;
        Ok(())
    }

    /// Read a length-prefixed postcard frame.
    async fn recv_frame<T: serde::de::DeserializeOwned>(
        recv: &mut RecvStream,
    ) -> Result<T, TreeError> {
        let mut len_buf = [0u8; 4];
        recv.read_exact(&mut len_buf)
            .await
            .map_err(|e| TreeError::Unavailable(format!("stream read: {e}")))?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(TreeError::Serialization(format!(
                "message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
            )));
        }

        let payload = recv
            .read_to_end(len)
            .await
            .map_err(|e| TreeError::Unavailable(format!("stream read: {e}")))?;
        postcard::from_bytes(&payload).map_err(|e| TreeError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Remote clients
// ---------------------------------------------------------------------------

/// [`MapClient`] speaking to a remote [`TreeService`].
pub struct RemoteMap {
    transport: Arc<TreeTransport>,
    addr: EndpointAddr,
}

impl RemoteMap {
    /// Create a client for the map hosted at `addr`.
    pub fn new(transport: Arc<TreeTransport>, addr: EndpointAddr) -> Self {
        Self { transport, addr }
    }
}

#[async_trait]
impl MapClient for RemoteMap {
    async fn get_signed_map_root(&self) -> Result<SignedMapRoot, TreeError> {
        match self
            .transport
            .request(self.addr.clone(), &TreeRequest::MapRoot)
            .await?
        {
            TreeResponse::MapRoot(smr) => Ok(smr),
            TreeResponse::Error(e) => Err(TreeError::Remote(e)),
            other => Err(TreeError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn get_leaves(
        &self,
        indexes: &[MapIndex],
        revision: i64,
    ) -> Result<Vec<MapLeafInclusion>, TreeError> {
        let request = TreeRequest::MapLeaves {
            indexes: indexes.to_vec(),
            revision,
        };
        match self.transport.request(self.addr.clone(), &request).await? {
            TreeResponse::MapLeaves(leaves) => Ok(leaves),
            TreeResponse::Error(e) => Err(TreeError::Remote(e)),
            other => Err(TreeError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn set_leaves(
        &self,
        leaves: Vec<MapLeaf>,
        metadata: MapRootMetadata,
    ) -> Result<SignedMapRoot, TreeError> {
        let request = TreeRequest::MapSetLeaves { leaves, metadata };
        match self.transport.request(self.addr.clone(), &request).await? {
            TreeResponse::MapRoot(smr) => Ok(smr),
            TreeResponse::Error(e) => Err(TreeError::Remote(e)),
            other => Err(TreeError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

/// [`LogClient`] speaking to a remote [`TreeService`].
pub struct RemoteLog {
    transport: Arc<TreeTransport>,
    addr: EndpointAddr,
}

impl RemoteLog {
    /// Create a client for the log hosted at `addr`.
    pub fn new(transport: Arc<TreeTransport>, addr: EndpointAddr) -> Self {
        Self { transport, addr }
    }
}

#[async_trait]
impl LogClient for RemoteLog {
    async fn get_latest_signed_log_root(&self) -> Result<SignedLogRoot, TreeError> {
        match self
            .transport
            .request(self.addr.clone(), &TreeRequest::LogRoot)
            .await?
        {
            TreeResponse::LogRoot(root) => Ok(root),
            TreeResponse::Error(e) => Err(TreeError::Remote(e)),
            other => Err(TreeError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn queue_leaf(&self, leaf: LogLeaf) -> Result<(), TreeError> {
        let request = TreeRequest::LogQueueLeaf { leaf };
        match self.transport.request(self.addr.clone(), &request).await? {
            TreeResponse::Ack => Ok(()),
            TreeResponse::Error(e) => Err(TreeError::Remote(e)),
            other => Err(TreeError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn get_consistency_proof(
        &self,
        first_tree_size: i64,
        second_tree_size: i64,
    ) -> Result<Vec<[u8; 32]>, TreeError> {
        let request = TreeRequest::LogConsistency {
            first_tree_size,
            second_tree_size,
        };
        match self.transport.request(self.addr.clone(), &request).await? {
            TreeResponse::Proof(hashes) => Ok(hashes),
            TreeResponse::Error(e) => Err(TreeError::Remote(e)),
            other => Err(TreeError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn get_inclusion_proof(
        &self,
        leaf_index: i64,
        tree_size: i64,
    ) -> Result<Vec<[u8; 32]>, TreeError> {
        let request = TreeRequest::LogInclusion {
            leaf_index,
            tree_size,
        };
        match self.transport.request(self.addr.clone(), &request).await? {
            TreeResponse::Proof(hashes) => Ok(hashes),
            TreeResponse::Error(e) => Err(TreeError::Remote(e)),
            other => Err(TreeError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// TreeService
// ---------------------------------------------------------------------------

/// Hosts a map and a log behind the wire protocol.
///
/// Intended for development clusters: `sequind trees` wraps the memory
/// trees in a `TreeService` so a sequencer in another process can reach
/// them through [`RemoteMap`]/[`RemoteLog`].
pub struct TreeService {
    map: Arc<dyn MapClient>,
    log: Arc<dyn LogClient>,
}

impl TreeService {
    /// Create a service over any map/log pair.
    pub fn new(map: Arc<dyn MapClient>, log: Arc<dyn LogClient>) -> Self {
        Self { map, log }
    }

    /// Accept connections on `transport` and answer requests until the
    /// endpoint shuts down.
    pub async fn serve(self: Arc<Self>, transport: Arc<TreeTransport>) {
        info!(endpoint = %transport.endpoint_id().fmt_short(), "tree service listening");

        loop {
            let Some(incoming) = transport.endpoint.accept().await else {
                info!("tree service endpoint closed");
                return;
            };

            let conn = match incoming.await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            };

            let service = self.clone();
            tokio::spawn(async move {
                service.handle_connection(conn).await;
            });
        }
    }

    /// Answer request/response streams on one connection until it closes.
    async fn handle_connection(&self, conn: Connection) {
        loop {
            match conn.accept_bi().await {
                Ok((mut send, mut recv)) => {
                    let response = match TreeTransport::recv_frame::<TreeRequest>(&mut recv).await {
                        Ok(request) => self.handle(request).await,
                        Err(e) => {
                            warn!("failed to decode tree request: {e}");
                            continue;
                        }
                    };

                    if let Err(e) = TreeTransport::send_frame(&mut send, &response).await {
                        warn!("failed to send tree response: {e}");
                    }
                }
                Err(e) => {
                    debug!("tree service connection closed: {e}");
                    return;
                }
            }
        }
    }

    /// Dispatch one request to the backing trees.
    async fn handle(&self, request: TreeRequest) -> TreeResponse {
        let result = match request {
            TreeRequest::MapRoot => self
                .map
                .get_signed_map_root()
                .await
                .map(TreeResponse::MapRoot),
            TreeRequest::MapLeaves { indexes, revision } => self
                .map
                .get_leaves(&indexes, revision)
                .await
                .map(TreeResponse::MapLeaves),
            TreeRequest::MapSetLeaves { leaves, metadata } => self
                .map
                .set_leaves(leaves, metadata)
                .await
                .map(TreeResponse::MapRoot),
            TreeRequest::LogRoot => self
                .log
                .get_latest_signed_log_root()
                .await
                .map(TreeResponse::LogRoot),
            TreeRequest::LogQueueLeaf { leaf } => {
                self.log.queue_leaf(leaf).await.map(|()| TreeResponse::Ack)
            }
            TreeRequest::LogConsistency {
                first_tree_size,
                second_tree_size,
            } => self
                .log
                .get_consistency_proof(first_tree_size, second_tree_size)
                .await
                .map(TreeResponse::Proof),
            TreeRequest::LogInclusion {
                leaf_index,
                tree_size,
            } => self
                .log
                .get_inclusion_proof(leaf_index, tree_size)
                .await
                .map(TreeResponse::Proof),
        };

        result.unwrap_or_else(|e| TreeResponse::Error(e.to_string()))
    }
}
