//! HTTP gateway implementation
//!
//! reqwest-backed clients for the agent and upload services.

use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};

use super::{AgentGateway, AgentRequest, AgentResponse, FileBlob, GatewayError, UploadGateway, UploadResponse};

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub agent_url: String,
    pub upload_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            agent_url: "http://localhost:8787/api/agent".to_string(),
            upload_url: "http://localhost:8787/api/upload".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    fn build_client(&self) -> Result<ReqwestClient, GatewayError> {
        Ok(ReqwestClient::builder().timeout(self.timeout).build()?)
    }

    /// An empty endpoint switches the service off
    fn endpoint<'a>(url: &'a str, service: &str) -> Result<&'a str, GatewayError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(GatewayError::Unavailable(format!("no {} endpoint configured", service)));
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// Turns a non-2xx response into a [`GatewayError::Status`]
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Agent gateway talking JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpAgentGateway {
    http_client: Arc<ReqwestClient>,
    config: GatewayConfig,
}

impl HttpAgentGateway {
    /// Create a new gateway with custom configuration
    pub fn with_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            http_client: Arc::new(config.build_client()?),
            config,
        })
    }
}

#[async_trait::async_trait]
impl AgentGateway for HttpAgentGateway {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, GatewayError> {
        tracing::debug!(agent = %request.agent_id, "invoking agent");
        let url = GatewayConfig::endpoint(&self.config.agent_url, "agent")?;
        let builder = self.http_client.post(url).json(&request);
        let response = self.config.authorize(builder).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

/// Upload gateway sending files as multipart form data
#[derive(Debug, Clone)]
pub struct HttpUploadGateway {
    http_client: Arc<ReqwestClient>,
    config: GatewayConfig,
}

impl HttpUploadGateway {
    /// Create a new gateway with custom configuration
    pub fn with_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            http_client: Arc::new(config.build_client()?),
            config,
        })
    }
}

#[async_trait::async_trait]
impl UploadGateway for HttpUploadGateway {
    async fn upload(&self, files: Vec<FileBlob>) -> Result<UploadResponse, GatewayError> {
        let url = GatewayConfig::endpoint(&self.config.upload_url, "upload")?;
        tracing::debug!(files = files.len(), "uploading files");
        let form = files.into_iter().fold(Form::new(), |form, file| {
            form.part("files", Part::bytes(file.bytes).file_name(file.name))
        });

        let builder = self.http_client.post(url).multipart(form);
        let response = self.config.authorize(builder).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}
