use async_trait::async_trait;
use jetset_core::documents::{
    DeliveryReceipt, DocumentGenerator, DocumentRequest, Notifier, RenderedDocument,
};
use jetset_core::{ClientContact, CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

fn http_client(timeout: Duration) -> CoreResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CoreError::InternalError(format!("http client: {}", e)))
}

fn external(service: &str, e: reqwest::Error) -> CoreError {
    CoreError::ExternalServiceError(format!("{}: {}", service, e))
}

#[derive(Deserialize)]
struct RenderResponse {
    url: String,
}

/// Client for the PDF rendering service (`POST {base}/documents`).
pub struct HttpDocumentGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentGenerator {
    pub fn new(base_url: &str, timeout: Duration) -> CoreResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DocumentGenerator for HttpDocumentGenerator {
    async fn render(&self, request: &DocumentRequest) -> CoreResult<RenderedDocument> {
        let response: RenderResponse = self
            .client
            .post(format!("{}/documents", self.base_url))
            .json(request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| external("document generator", e))?
            .json()
            .await
            .map_err(|e| external("document generator", e))?;

        debug!(
            quote = %request.reference_number,
            kind = request.kind.as_str(),
            "Document rendered"
        );
        Ok(RenderedDocument {
            kind: request.kind,
            url: response.url,
        })
    }
}

/// Channels a document goes out on, derived from the contact.
pub fn delivery_channels(contact: &ClientContact) -> Vec<&'static str> {
    let mut channels = Vec::new();
    if contact.email.as_ref().is_some_and(|e| !e.expose().trim().is_empty()) {
        channels.push("email");
    }
    if contact.phone.as_ref().is_some_and(|p| !p.expose().trim().is_empty()) {
        channels.push("whatsapp");
    }
    channels
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotifyRequest<'a> {
    channels: Vec<&'static str>,
    contact: &'a ClientContact,
    document: &'a RenderedDocument,
    reference_number: &'a str,
    kind: &'static str,
}

#[derive(Deserialize)]
struct NotifyResponse {
    #[serde(default)]
    receipts: Vec<DeliveryReceipt>,
}

/// Client for the messaging service (`POST {base}/notifications`).
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: &str, timeout: Duration) -> CoreResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn deliver(
        &self,
        contact: &ClientContact,
        document: &RenderedDocument,
        request: &DocumentRequest,
    ) -> CoreResult<Vec<DeliveryReceipt>> {
        let channels = delivery_channels(contact);
        if channels.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "quote {} has no reachable contact channel",
                request.reference_number
            )));
        }

        let body = NotifyRequest {
            channels,
            contact,
            document,
            reference_number: &request.reference_number,
            kind: request.kind.as_str(),
        };

        let response: NotifyResponse = self
            .client
            .post(format!("{}/notifications", self.base_url))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| external("notifier", e))?
            .json()
            .await
            .map_err(|e| external("notifier", e))?;

        Ok(response.receipts)
    }
}
