//! The collection admin dispatcher.
//!
//! A thin ingress for cluster-level collection commands.  Create, delete,
//! and reload are validated, composed into `{operation, ...args}` records,
//! and enqueued on the coordinator queue, where a cluster overseer picks
//! them up; the dispatcher waits a bounded time for the response record.
//! Sync-shard is different: it resolves the shard leader from cluster state
//! and calls that node directly.  None of this touches the on-disk segment
//! manifests — those belong to the commit manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vellum_error::{ErrorCodes, VellumError};

/////////////////////////////////////////////// Error //////////////////////////////////////////////

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("server error: {0}")]
    ServerError(String),
}

impl VellumError for AdminError {
    fn code(&self) -> ErrorCodes {
        match self {
            AdminError::BadRequest(_) => ErrorCodes::InvalidArgument,
            AdminError::ServerError(_) => ErrorCodes::Internal,
        }
    }
}

/////////////////////////////////////////// AdminAction ////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdminAction {
    Create,
    Delete,
    Reload,
    SyncShard,
}

impl AdminAction {
    /// The operation string recorded in queue payloads.
    pub fn operation(&self) -> &'static str {
        match self {
            AdminAction::Create => "create",
            AdminAction::Delete => "delete",
            AdminAction::Reload => "reload",
            AdminAction::SyncShard => "syncshard",
        }
    }

    /// Parse the action parameter of an incoming request.
    pub fn parse(action: &str) -> Option<AdminAction> {
        match action.to_ascii_uppercase().as_str() {
            "CREATE" => Some(AdminAction::Create),
            "DELETE" => Some(AdminAction::Delete),
            "RELOAD" => Some(AdminAction::Reload),
            "SYNCSHARD" => Some(AdminAction::SyncShard),
            _ => None,
        }
    }
}

/////////////////////////////////////////// AdminRequest ///////////////////////////////////////////

#[derive(Clone, Debug)]
pub struct AdminRequest {
    pub action: AdminAction,
    pub params: HashMap<String, String>,
}

impl AdminRequest {
    pub fn new(action: AdminAction) -> Self {
        AdminRequest {
            action,
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    fn required(&self, key: &str) -> Result<&str, AdminError> {
        self.params
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| AdminError::BadRequest(format!("missing required parameter: {}", key)))
    }
}

///////////////////////////////////////////// seams ////////////////////////////////////////////////

/// What the coordinator queue hands back for an enqueued operation.
#[derive(Clone, Debug)]
pub enum QueueEvent {
    /// The overseer processed the operation and left a response record.
    Response(Value),
    /// The watch fired but no response record was present.
    WatchFired(String),
}

/// The coordinator queue the overseer consumes.  `offer` enqueues the record
/// and resolves when the overseer responds (or the watch fires); the
/// dispatcher bounds the wait.
#[async_trait]
pub trait CoordinatorQueue: Send + Sync {
    async fn offer(&self, record: Value) -> Result<QueueEvent, AdminError>;
}

/// A node that currently leads a shard.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRef {
    pub node_name: String,
    pub base_url: String,
}

/// Read-only oracle over the cluster state.
#[async_trait]
pub trait ClusterState: Send + Sync {
    async fn shard_leader(&self, collection: &str, shard: &str) -> Result<NodeRef, AdminError>;
}

/// Direct RPC to a shard leader.
#[async_trait]
pub trait LeaderClient: Send + Sync {
    async fn request_sync(
        &self,
        leader: &NodeRef,
        collection: &str,
        shard: &str,
    ) -> Result<Value, AdminError>;
}

/////////////////////////////////////////// AdminConfig ////////////////////////////////////////////

/// AdminConfig controls the dispatcher's bounded waits.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct AdminConfig {
    /// How long to wait for the overseer to respond to an enqueued
    /// operation.  Defaults to 60 seconds.
    #[serde(default = "AdminConfig::default_queue_timeout")]
    pub queue_timeout: Duration,
}

impl AdminConfig {
    fn default_queue_timeout() -> Duration {
        Duration::from_secs(60)
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            queue_timeout: Self::default_queue_timeout(),
        }
    }
}

////////////////////////////////////////// AdminDispatcher /////////////////////////////////////////

pub struct AdminDispatcher {
    queue: Arc<dyn CoordinatorQueue>,
    cluster: Arc<dyn ClusterState>,
    leaders: Arc<dyn LeaderClient>,
    config: AdminConfig,
}

impl AdminDispatcher {
    pub fn new(
        queue: Arc<dyn CoordinatorQueue>,
        cluster: Arc<dyn ClusterState>,
        leaders: Arc<dyn LeaderClient>,
        config: AdminConfig,
    ) -> Self {
        AdminDispatcher {
            queue,
            cluster,
            leaders,
            config,
        }
    }

    pub async fn dispatch(&self, request: AdminRequest) -> Result<Value, AdminError> {
        match request.action {
            AdminAction::Create => self.enqueue(&request, &["name"]).await,
            AdminAction::Delete => self.enqueue(&request, &["name"]).await,
            AdminAction::Reload => self.enqueue(&request, &["name"]).await,
            AdminAction::SyncShard => self.sync_shard(&request).await,
        }
    }

    async fn enqueue(
        &self,
        request: &AdminRequest,
        required: &[&str],
    ) -> Result<Value, AdminError> {
        for key in required {
            request.required(key)?;
        }
        let mut record = serde_json::Map::new();
        record.insert(
            "operation".to_string(),
            Value::String(request.action.operation().to_string()),
        );
        for (key, value) in &request.params {
            record.insert(key.clone(), Value::String(value.clone()));
        }
        tracing::debug!(operation = request.action.operation(), "enqueueing operation");
        let offered = tokio::time::timeout(
            self.config.queue_timeout,
            self.queue.offer(Value::Object(record)),
        )
        .await;
        match offered {
            Err(_) => Err(AdminError::ServerError(format!(
                "{} timed out after {:?} waiting for the overseer",
                request.action.operation(),
                self.config.queue_timeout
            ))),
            Ok(Err(err)) => Err(err),
            Ok(Ok(QueueEvent::Response(value))) => Ok(value),
            Ok(Ok(QueueEvent::WatchFired(details))) => Err(AdminError::ServerError(format!(
                "watch fired without a response: {}",
                details
            ))),
        }
    }

    async fn sync_shard(&self, request: &AdminRequest) -> Result<Value, AdminError> {
        let collection = request.required("collection")?.to_string();
        let shard = request.required("shard")?.to_string();
        let leader = self.cluster.shard_leader(&collection, &shard).await?;
        tracing::debug!(%collection, %shard, leader = %leader.node_name, "syncing shard");
        self.leaders
            .request_sync(&leader, &collection, &shard)
            .await
    }
}
