//! Outbound agent transport.
//!
//! Builds the request body for the agent backend, sends it, and resolves the
//! response into a single text at the boundary. Two response shapes are
//! accepted (the structured envelope and the flat legacy one); HTTP 413 is a
//! soft outcome, not an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use palaver_core::config::{AgentPreferences, TransportConfig};
use palaver_core::types::{Attachment, ConversationId, SessionId};

use crate::error::ChatError;

// =============================================================================
// Request body
// =============================================================================

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub context: RequestContext,
    pub message: OutboundMessage,
    pub options: RequestOptions,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub agent_id: String,
    pub user_id: String,
    pub conversation_id: ConversationId,
    pub session_id: SessionId,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutboundMessage {
    pub role: String,
    pub content: OutboundContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OutboundMetadata>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutboundContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMetadata {
    pub attached_documents: Vec<String>,
    pub document_names: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestOptions {
    pub context: ContextOptions,
    pub reasoning: ReasoningOptions,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOptions {
    pub max_messages: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReasoningOptions {
    pub enabled: bool,
    pub threshold: f64,
}

impl AgentRequest {
    /// Assemble the outbound body for one user turn.
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: ConversationId,
        session_id: SessionId,
        text: impl Into<String>,
        attachments: &[Attachment],
        preferences: &AgentPreferences,
        max_messages: usize,
    ) -> Self {
        let metadata = if attachments.is_empty() {
            None
        } else {
            Some(OutboundMetadata {
                attached_documents: attachments.iter().map(|a| a.document_id.clone()).collect(),
                document_names: attachments.iter().map(|a| a.name.clone()).collect(),
            })
        };
        Self {
            context: RequestContext {
                agent_id: agent_id.into(),
                user_id: user_id.into(),
                conversation_id,
                session_id,
            },
            message: OutboundMessage {
                role: "user".to_string(),
                content: OutboundContent {
                    kind: "text".to_string(),
                    text: text.into(),
                },
                metadata,
            },
            options: RequestOptions {
                context: ContextOptions {
                    max_messages,
                },
                reasoning: ReasoningOptions {
                    enabled: preferences.reasoning_enabled,
                    threshold: preferences.reasoning_threshold,
                },
            },
        }
    }
}

// =============================================================================
// Response parsing
// =============================================================================

/// The agent's answer, resolved once at the HTTP boundary so the rest of the
/// engine sees one text.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentReply {
    /// `{ data: { message: { content: { text } } }, processing_details? }`
    Structured {
        text: String,
        processing_details: Option<serde_json::Value>,
    },
    /// Flat `{ message }`.
    Legacy { text: String },
}

impl AgentReply {
    pub fn text(&self) -> &str {
        match self {
            AgentReply::Structured { text, .. } => text,
            AgentReply::Legacy { text } => text,
        }
    }

    /// Parse a success body, trying the structured envelope first.
    pub fn parse(body: &str) -> Result<Self, ChatError> {
        #[derive(Deserialize)]
        struct Structured {
            data: StructuredData,
            #[serde(default)]
            processing_details: Option<serde_json::Value>,
        }
        #[derive(Deserialize)]
        struct StructuredData {
            message: StructuredMessage,
        }
        #[derive(Deserialize)]
        struct StructuredMessage {
            content: StructuredContent,
        }
        #[derive(Deserialize)]
        struct StructuredContent {
            text: String,
        }
        #[derive(Deserialize)]
        struct Legacy {
            message: String,
        }

        if let Ok(parsed) = serde_json::from_str::<Structured>(body) {
            return Ok(AgentReply::Structured {
                text: parsed.data.message.content.text,
                processing_details: parsed.processing_details,
            });
        }
        if let Ok(parsed) = serde_json::from_str::<Legacy>(body) {
            return Ok(AgentReply::Legacy {
                text: parsed.message,
            });
        }
        Err(ChatError::Transport(
            "unrecognized agent response shape".to_string(),
        ))
    }
}

/// Outcome of one outbound request.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnResponse {
    Answer(AgentReply),
    /// HTTP 413: the request exceeded the backend's context window. A soft,
    /// user-facing outcome.
    ContextOverflow { message: String },
}

/// Parse the body of a 413 response.
pub fn parse_overflow(body: &str) -> String {
    #[derive(Deserialize)]
    struct Overflow {
        message: String,
    }
    match serde_json::from_str::<Overflow>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => "The request was too large for the agent's context window.".to_string(),
    }
}

// =============================================================================
// Transport
// =============================================================================

/// The request/response contract with the agent backend.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(&self, request: AgentRequest) -> Result<TurnResponse, ChatError>;
}

/// HTTP transport over reqwest.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAgentTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn send(&self, request: AgentRequest) -> Result<TurnResponse, ChatError> {
        let mut req = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        if status.is_success() {
            return Ok(TurnResponse::Answer(AgentReply::parse(&body)?));
        }
        if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
            tracing::debug!("Agent backend reported context overflow");
            return Ok(TurnResponse::ContextOverflow {
                message: parse_overflow(&body),
            });
        }
        Err(ChatError::Transport(format!(
            "agent endpoint error {}: {}",
            status, body
        )))
    }
}

// =============================================================================
// Tests
// =============================================================================
