//! Delivery of signed documents to a fixed recipient.
//!
//! The orchestrator only knows the [`DeliveryAgent`] trait. Two agents ship
//! with the crate:
//!
//! * [`HttpRelayDelivery`] posts the message as `multipart/form-data` to a
//!   mail relay endpoint (any transactional mail API that accepts
//!   `from`/`to`/`subject`/`text`/`attachment` form fields).
//! * [`OutboxDelivery`] drops the attachment and a JSON envelope into a local
//!   directory for a separate mailer to pick up.

use crate::config::DeliveryConfig;
use crate::document::SignedDocument;
use crate::error::DeliveryError;
use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Body text sent with every signed document.
pub const MESSAGE_BODY: &str = "The attached document has been signed.";

/// One outgoing message with the signed document attached.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryMessage {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment_media_type: String,
    #[serde(skip)]
    pub attachment: Vec<u8>,
}

impl DeliveryMessage {
    /// Message announcing `doc`, addressed per `config`.
    pub fn for_signed(doc: &SignedDocument, config: &DeliveryConfig) -> Self {
        Self {
            sender: config.sender.clone(),
            recipient: config.effective_recipient().to_string(),
            subject: format!("Document signed: {}", doc.id),
            body: MESSAGE_BODY.to_string(),
            attachment_name: doc.id.to_string(),
            attachment_media_type: doc.kind.media_type().to_string(),
            attachment: doc.bytes.clone(),
        }
    }
}

/// Sends a [`DeliveryMessage`]. Must be shareable across requests.
pub trait DeliveryAgent: Send + Sync {
    fn name(&self) -> &'static str;

    fn deliver<'a>(&'a self, message: &'a DeliveryMessage) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

// ── HTTP relay ───────────────────────────────────────────────────────────

/// Posts messages to a mail relay over HTTP.
pub struct HttpRelayDelivery {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpRelayDelivery {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport {
                detail: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    async fn send(&self, message: &DeliveryMessage) -> Result<(), DeliveryError> {
        let transport = |e: reqwest::Error| DeliveryError::Transport {
            detail: e.to_string(),
        };

        let attachment = Part::bytes(message.attachment.clone())
            .file_name(message.attachment_name.clone())
            .mime_str(&message.attachment_media_type)
            .map_err(transport)?;
        let form = Form::new()
            .text("from", message.sender.clone())
            .text("to", message.recipient.clone())
            .text("subject", message.subject.clone())
            .text("text", message.body.clone())
            .part("attachment", attachment);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        debug!("Posting {} to {}", message.attachment_name, self.endpoint);
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            info!("Delivered {} to {}", message.attachment_name, message.recipient);
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        let detail = detail.trim().chars().take(500).collect::<String>();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DeliveryError::Auth {
                detail: if detail.is_empty() {
                    status.to_string()
                } else {
                    detail
                },
            }),
            _ => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                detail,
            }),
        }
    }
}

impl DeliveryAgent for HttpRelayDelivery {
    fn name(&self) -> &'static str {
        "http-relay"
    }

    fn deliver<'a>(&'a self, message: &'a DeliveryMessage) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(self.send(message))
    }
}

// ── Outbox ───────────────────────────────────────────────────────────────

/// Writes each message as `<attachment>` plus `<attachment>.json` into a
/// directory.
pub struct OutboxDelivery {
    dir: PathBuf,
}

impl OutboxDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write(&self, message: &DeliveryMessage) -> Result<(), DeliveryError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let attachment = self.dir.join(&message.attachment_name);
        let envelope = self.dir.join(format!("{}.json", message.attachment_name));

        let json = serde_json::to_vec_pretty(message)
            .map_err(|e| DeliveryError::Io(std::io::Error::other(e)))?;
        tokio::fs::write(&attachment, &message.attachment).await?;
        tokio::fs::write(&envelope, json).await?;

        info!(
            "Queued {} for {} in {}",
            message.attachment_name,
            message.recipient,
            self.dir.display()
        );
        Ok(())
    }
}

impl DeliveryAgent for OutboxDelivery {
    fn name(&self) -> &'static str {
        "outbox"
    }

    fn deliver<'a>(&'a self, message: &'a DeliveryMessage) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(self.write(message))
    }
}
