//! JSON-over-HTTP gateway.
//!
//! Posts each RPC to `{api_base_url}/datastore/v1beta2/datasets/{dataset_id}/{method}`
//! with a bearer token. Minting the token from service-account material
//! happens outside this crate; hand the result to [`HttpGateway::set_access_token`].

use super::config::{Credentials, GatewayConfig};
use super::{DatastoreGateway, GatewayResult};
use crate::core::{GatewayError, ModelError, Result};
use crate::wire::{
    AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest, BeginTransactionResponse,
    CommitRequest, CommitResponse, LookupRequest, LookupResponse, RollbackRequest,
    RollbackResponse, RunQueryRequest, RunQueryResponse,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct HttpGateway {
    config: GatewayConfig,
    client: Client,
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpGateway {
    /// Validates `config` up front; a gateway is never built from an
    /// incomplete configuration.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.application_id.clone())
            .build()
            .map_err(|e| ModelError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        let access_token = match &config.credentials {
            Credentials::AccessToken(token) => Some(token.clone()),
            Credentials::ServiceAccount { .. } => None,
        };

        Ok(Self {
            config,
            client,
            access_token: Arc::new(RwLock::new(access_token)),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Installs (or replaces) the bearer token used for every call.
    pub async fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().await = Some(token.into());
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/datastore/v1beta2/datasets/{}/{}",
            self.config.api_base_url, self.config.dataset_id, method
        )
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> GatewayResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or(GatewayError::Unauthenticated)?;

        debug!(method, dataset = %self.config.dataset_id, "datastore rpc");
        let response = self
            .client
            .post(self.endpoint(method))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

fn status_error(status: StatusCode, message: String) -> GatewayError {
    match status {
        StatusCode::CONFLICT => GatewayError::Contention(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthenticated,
        StatusCode::BAD_REQUEST => GatewayError::InvalidArgument(message),
        StatusCode::SERVICE_UNAVAILABLE => GatewayError::Unavailable(message),
        other => GatewayError::Status {
            code: other.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl DatastoreGateway for HttpGateway {
    async fn allocate_ids(&self, request: AllocateIdsRequest) -> GatewayResult<AllocateIdsResponse> {
        self.call("allocateIds", &request).await
    }

    async fn begin_transaction(
        &self,
        request: BeginTransactionRequest,
    ) -> GatewayResult<BeginTransactionResponse> {
        self.call("beginTransaction", &request).await
    }

    async fn commit(&self, request: CommitRequest) -> GatewayResult<CommitResponse> {
        self.call("commit", &request).await
    }

    async fn lookup(&self, request: LookupRequest) -> GatewayResult<LookupResponse> {
        self.call("lookup", &request).await
    }

    async fn rollback(&self, request: RollbackRequest) -> GatewayResult<RollbackResponse> {
        self.call("rollback", &request).await
    }

    async fn run_query(&self, request: RunQueryRequest) -> GatewayResult<RunQueryResponse> {
        self.call("runQuery", &request).await
    }
}
