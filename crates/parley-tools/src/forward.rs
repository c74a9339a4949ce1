//! Document forwarding tool and the outbound mail seam.
//!
//! Email delivery itself is an external collaborator: the tool only
//! assembles the message and hands it to a [`Mailer`]. The default
//! implementation posts to an HTTP email API.

use crate::registry::{ToolHandler, ToolSpec};
use parley_types::ToolOutcome;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a mail delivery backend.
#[derive(Debug, Error)]
pub enum MailerError {
    #[error("mail delivery is not configured: {0}")]
    NotConfigured(String),

    #[error("mail request failed: {0}")]
    Request(String),

    #[error("mail provider rejected the message: status {0}")]
    Rejected(u16),
}

/// Outbound email delivery contract.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError>;
}

/// [`Mailer`] that posts messages to an HTTP email API.
pub struct HttpMailer {
    endpoint: String,
    api_key: Option<String>,
    from: String,
    client: reqwest::Client,
}

impl HttpMailer {
    pub fn new(endpoint: String, api_key: Option<String>, from: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            endpoint,
            api_key,
            from,
            client,
        }
    }
}

#[async_trait::async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(MailerError::NotConfigured("missing email API key".into()));
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .map_err(|e| MailerError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(MailerError::Rejected(response.status().as_u16()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForwardArgs {
    to: String,
    #[serde(default)]
    subject: Option<String>,
    document_name: String,
    content: String,
}

/// Forwards a document from the conversation to an email recipient.
pub struct ForwardDocumentTool {
    mailer: Arc<dyn Mailer>,
}

impl ForwardDocumentTool {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait::async_trait]
impl ToolHandler for ForwardDocumentTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "forward_document",
            "Emails a named document from the conversation to a recipient",
            json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "Recipient email address" },
                    "subject": { "type": "string" },
                    "document_name": { "type": "string" },
                    "content": { "type": "string", "description": "Document body text" }
                },
                "required": ["to", "document_name", "content"]
            }),
        )
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let args: ForwardArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {e}")),
        };

        // Minimal shape check; the provider performs real validation.
        let to = args.to.trim();
        if !to.contains('@') || to.len() < 3 {
            return ToolOutcome::err(format!("invalid recipient address: {to}"));
        }

        let subject = args
            .subject
            .unwrap_or_else(|| format!("Document: {}", args.document_name));

        match self.mailer.send(to, &subject, &args.content).await {
            Ok(()) => ToolOutcome::ok(json!({
                "delivered": true,
                "to": to,
                "document_name": args.document_name,
            })),
            Err(e) => ToolOutcome::err(format!("forwarding failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct CapturingMailer {
        sent: Mutex<Vec<(String, String, String)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Mailer for CapturingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError> {
            if self.fail {
                return Err(MailerError::Rejected(502));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn tool(fail: bool) -> (ForwardDocumentTool, Arc<CapturingMailer>) {
        let mailer = Arc::new(CapturingMailer {
            sent: Mutex::new(Vec::new()),
            fail,
        });
        (ForwardDocumentTool::new(mailer.clone()), mailer)
    }

    #[tokio::test]
    async fn forwards_document_with_default_subject() {
        let (tool, mailer) = tool(false);
        let outcome = tool
            .call(json!({
                "to": "ops@example.com",
                "document_name": "manifest.pdf",
                "content": "line one"
            }))
            .await;

        assert!(outcome.success);
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ops@example.com");
        assert_eq!(sent[0].1, "Document: manifest.pdf");
    }

    #[tokio::test]
    async fn rejects_bad_recipient_without_sending() {
        let (tool, mailer) = tool(false);
        let outcome = tool
            .call(json!({
                "to": "not-an-address",
                "document_name": "doc",
                "content": "x"
            }))
            .await;

        assert!(!outcome.success);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mailer_failure_becomes_structured_error() {
        let (tool, _mailer) = tool(true);
        let outcome = tool
            .call(json!({
                "to": "ops@example.com",
                "document_name": "doc",
                "content": "x"
            }))
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("status 502"));
    }
}
