use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use sitesmith_contracts::page::PageDocument;
use sitesmith_contracts::request::GenerationRequest;

use crate::collaborators::{ContentGenerator, ImageGenerator};
use crate::config::{non_empty_env, value_as_f64};
use crate::context::CallContext;
use crate::error::EngineError;
use crate::truncate_text;

const DEFAULT_TIMEOUT_S: f64 = 90.0;

#[derive(Debug, Clone)]
struct Endpoint {
    base: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl Endpoint {
    fn from_env(endpoint_var: &str) -> Option<Self> {
        let base = non_empty_env(endpoint_var)?
            .trim_end_matches('/')
            .to_string();
        let timeout_s = value_as_f64(
            non_empty_env("SITESMITH_REQUEST_TIMEOUT")
                .map(Value::String)
                .as_ref(),
            DEFAULT_TIMEOUT_S,
            5.0,
            300.0,
        );
        Some(Self {
            base,
            api_key: non_empty_env("SITESMITH_API_KEY"),
            timeout: Duration::from_secs_f64(timeout_s),
        })
    }

    fn post(&self, http: &HttpClient, provider: &str, path: &str, payload: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.base, path.trim_start_matches('/'));
        let mut request = http.post(&url).timeout(self.timeout).json(payload);
        if let Some(api_key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {api_key}"));
        }
        let response = request.send().map_err(|err| {
            let timed_out = err.is_timeout();
            let err = anyhow::Error::new(err).context(format!("{provider} request failed ({url})"));
            if timed_out {
                err.context(EngineError::Timeout {
                    operation: format!("{provider} {path}"),
                })
            } else {
                err
            }
        })?;
        response_json_or_error(provider, response)
    }
}

/// Content generation over HTTP. `POST {base}/structure` with the request
/// returns a page document; `POST {base}/section` returns one record, either
/// bare or under `section`.
pub struct HttpContentGenerator {
    endpoint: Endpoint,
    http: HttpClient,
}

impl HttpContentGenerator {
    /// Reads `SITESMITH_CONTENT_ENDPOINT`; `None` when unset.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            endpoint: Endpoint::from_env("SITESMITH_CONTENT_ENDPOINT")?,
            http: HttpClient::new(),
        })
    }
}

impl ContentGenerator for HttpContentGenerator {
    fn name(&self) -> &str {
        "http"
    }

    fn generate_structure(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> Result<PageDocument> {
        ctx.ensure_active()?;
        let payload = serde_json::to_value(request)?;
        let body = self
            .endpoint
            .post(&self.http, "content", "structure", &payload)?;
        let document = body.get("document").cloned().unwrap_or(body);
        serde_json::from_value::<PageDocument>(document)
            .context("content service returned a malformed page document")
    }

    fn generate_section(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
        section_key: &str,
    ) -> Result<Value> {
        ctx.ensure_active()?;
        let payload = json!({
            "brief": request.brief,
            "tone": request.tone,
            "palette": request.palette,
            "industry": request.industry,
            "sectionKey": section_key,
            "mediaLibrary": request.media_library,
        });
        let body = self
            .endpoint
            .post(&self.http, "content", "section", &payload)?;
        let section = body.get("section").cloned().unwrap_or(body);
        if !section.is_object() {
            bail!("content service returned a non-object section for '{section_key}'");
        }
        Ok(section)
    }
}

/// Image generation over HTTP. `POST {base}/images` with
/// `{prompt, aspectRatio}` returns `{url}` or `{b64_json, mime_type}`.
pub struct HttpImageGenerator {
    endpoint: Endpoint,
    http: HttpClient,
}

impl HttpImageGenerator {
    /// Reads `SITESMITH_IMAGE_ENDPOINT`; `None` when unset.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            endpoint: Endpoint::from_env("SITESMITH_IMAGE_ENDPOINT")?,
            http: HttpClient::new(),
        })
    }
}

impl ImageGenerator for HttpImageGenerator {
    fn name(&self) -> &str {
        "http"
    }

    fn generate_image(&self, ctx: &CallContext, prompt: &str, aspect_ratio: &str) -> Result<String> {
        ctx.ensure_active()?;
        let body = self.endpoint.post(
            &self.http,
            "image",
            "images",
            &json!({"prompt": prompt, "aspectRatio": aspect_ratio}),
        )?;
        image_src_from_response(&body)
    }
}

fn image_src_from_response(body: &Value) -> Result<String> {
    let item = body
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .unwrap_or(body);
    if let Some(url) = item.get("url").and_then(Value::as_str) {
        return Ok(url.to_string());
    }
    if let Some(b64) = item.get("b64_json").and_then(Value::as_str) {
        let mime = item
            .get("mime_type")
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        return Ok(format!("data:{mime};base64,{b64}"));
    }
    bail!(
        "image service response carried no image: {}",
        truncate_text(&body.to_string(), 256)
    )
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
