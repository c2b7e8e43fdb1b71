//! Gateway module
//!
//! This module defines the interfaces to the external agent and upload
//! services. The pipeline only ever sees these traits; the reqwest-backed
//! implementations live in [`http`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod http;

pub use http::{GatewayConfig, HttpAgentGateway, HttpUploadGateway};

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The service is switched off or otherwise cannot be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Reasons an agent reply cannot be used
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("Agent call was not successful")]
    Failed,

    #[error("Agent reported status '{0}'")]
    Status(String),

    #[error("Malformed agent result: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Asset references attached to an agent call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachments {
    pub assets: Vec<String>,
}

/// Request sent to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub message: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Attachments>,
}

impl AgentRequest {
    pub fn new(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            agent_id: agent_id.into(),
            attachments: None,
        }
    }

    /// Attaches uploaded asset references
    pub fn with_assets(mut self, assets: Vec<String>) -> Self {
        self.attachments = Some(Attachments { assets });
        self
    }
}

/// Inner reply of an agent
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Value,
}

/// Envelope returned by the agent service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub response: AgentReply,
}

impl AgentResponse {
    /// Builds a successful envelope around `result`
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            response: AgentReply {
                status: "success".to_string(),
                result,
            },
        }
    }

    /// Builds an envelope for a call the service could not complete
    pub fn failure(status: impl Into<String>) -> Self {
        Self {
            success: false,
            response: AgentReply {
                status: status.into(),
                result: Value::Null,
            },
        }
    }

    /// Decodes the agent-specific result.
    ///
    /// The call must have succeeded with a `success` status. A result that
    /// arrives as a JSON-encoded string is parsed before decoding.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ReplyError> {
        if !self.success {
            return Err(ReplyError::Failed);
        }
        if self.response.status != "success" {
            return Err(ReplyError::Status(self.response.status));
        }

        match self.response.result {
            Value::String(encoded) => Ok(serde_json::from_str(&encoded)?),
            result => Ok(serde_json::from_value(result)?),
        }
    }
}

/// A raw file handed to the upload service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Reads a file from disk, naming the blob after the file
    pub async fn read(path: &std::path::Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { name, bytes })
    }
}

/// Reply of the upload service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub asset_ids: Vec<String>,
}

impl UploadResponse {
    /// Returns the asset references when the upload produced any
    pub fn into_assets(self) -> Option<Vec<String>> {
        if self.success && !self.asset_ids.is_empty() {
            Some(self.asset_ids)
        } else {
            None
        }
    }
}

/// Trait defining the interface to the external agents
#[async_trait::async_trait]
pub trait AgentGateway: Send + Sync {
    /// Invokes the agent named in the request
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, GatewayError>;
}

/// Trait defining the interface to the upload service
#[async_trait::async_trait]
pub trait UploadGateway: Send + Sync {
    /// Uploads a set of files and returns opaque asset references
    async fn upload(&self, files: Vec<FileBlob>) -> Result<UploadResponse, GatewayError>;
}
