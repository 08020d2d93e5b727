use super::MailchimpService;
use crate::models::{
    FileUploadRequest, FileUploadResponse, MailchimpErrorBody, TemplateRequest, TemplateResponse,
};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub struct MailchimpClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl MailchimpClient {
    pub fn new(api_key: String, server_prefix: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new_with_client(api_key, server_prefix, client))
    }

    pub fn new_with_client(api_key: String, server_prefix: &str, client: Client) -> Self {
        Self {
            client,
            api_key,
            base_url: format!("https://{}.api.mailchimp.com/3.0", server_prefix),
        }
    }

    /// Points the client at another API root, e.g. a local mock server.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("apikey {}", self.api_key))
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send request to Mailchimp: {}", e);
                e
            })?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let error_text = response.text().await?;
            return Err(api_error(status, &error_text));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse Mailchimp response: {}\nBody: {}", e, body);
            Error::InvalidResponse(format!("Failed to parse Mailchimp response: {}", e))
        })
    }
}

/// Builds an upload error from a non-success response, preferring the
/// problem document's `detail` over the raw body.
fn api_error(status: StatusCode, body: &str) -> Error {
    let parsed: MailchimpErrorBody = serde_json::from_str(body).unwrap_or_default();
    if let Some(errors) = &parsed.errors {
        tracing::error!("Mailchimp field errors: {}", errors);
    }
    let detail = parsed
        .detail
        .or(parsed.title)
        .unwrap_or_else(|| body.to_string());
    tracing::error!("Mailchimp API error (status {}): {}", status, detail);
    Error::Upload(format!(
        "Mailchimp API error ({}): {}",
        status.as_u16(),
        detail
    ))
}

#[async_trait]
impl MailchimpService for MailchimpClient {
    async fn upload_image(&self, name: &str, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Err(Error::Upload(format!("Image file is empty: {}", name)));
        }

        let request = FileUploadRequest {
            name,
            file_data: base64::engine::general_purpose::STANDARD.encode(data),
            file_type: "image",
        };

        let response: FileUploadResponse = self.post("/file-manager/files", &request).await?;
        Ok(response.full_size_url)
    }

    async fn upload_template(&self, name: &str, html: &str) -> Result<String> {
        let request = TemplateRequest { name, html };
        let response: TemplateResponse = self.post("/templates", &request).await?;

        match response.id {
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id),
            _ => Err(Error::InvalidResponse(
                "No template ID returned from Mailchimp".to_string(),
            )),
        }
    }
}
