// ============================================================================
// Gateway Client
// ============================================================================
//
// The dataset-scoped RPC surface of the remote store. Implementations are
// thin pass-throughs; the model layer never retries a failed call.
//
// ============================================================================

pub mod config;
pub mod http;
pub mod memory;

use crate::core::GatewayError;
use crate::wire::{
    AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest, BeginTransactionResponse,
    CommitRequest, CommitResponse, LookupRequest, LookupResponse, RollbackRequest,
    RollbackResponse, RunQueryRequest, RunQueryResponse,
};
use async_trait::async_trait;

pub use config::{Credentials, GatewayConfig};
pub use http::HttpGateway;
pub use memory::{GatewayCall, InMemoryGateway};

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// RPCs against one configured dataset.
///
/// Shared across operations behind an `Arc`; each call is independent of the
/// previous one apart from the transaction tokens it is handed.
#[async_trait]
pub trait DatastoreGateway: Send + Sync {
    async fn allocate_ids(&self, request: AllocateIdsRequest) -> GatewayResult<AllocateIdsResponse>;

    async fn begin_transaction(
        &self,
        request: BeginTransactionRequest,
    ) -> GatewayResult<BeginTransactionResponse>;

    async fn commit(&self, request: CommitRequest) -> GatewayResult<CommitResponse>;

    async fn lookup(&self, request: LookupRequest) -> GatewayResult<LookupResponse>;

    async fn rollback(&self, request: RollbackRequest) -> GatewayResult<RollbackResponse>;

    async fn run_query(&self, request: RunQueryRequest) -> GatewayResult<RunQueryResponse>;
}
