//! 🏷️ Enrichment: turning a bare product code into a scannable QR link.
//!
//! 🎬 *[a warehouse worker points a phone at a shelf label. nothing happens.]*
//! *[the label has no QR code. the product was synced before this module existed.]*
//!
//! For every product that does not have a barcode yet, the [`QrEnricher`]:
//! 1. renders the product code as an SVG QR code (medium error correction, 256px)
//! 2. uploads it as multipart field `file` to the platform's file endpoint
//! 3. expects `201 Created` with `{"data": {"link": "..."}}`
//! 4. returns `cdn_prefix + link`
//!
//! Nothing touches the disk. Nothing retries. A failure here costs one row, never the run. 🦆

use std::time::Duration;

use async_trait::async_trait;
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

/// 💀 One code, one failed enrichment. Recorded against the row, then life goes on.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("could not render QR code: {0}")]
    Render(String),
    #[error("upload request failed: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },
    #[error("upload answered {status} instead of 201: {body}")]
    Status { status: u16, body: String },
    #[error("upload response is not JSON we understand: {source}")]
    Unmarshal {
        #[source]
        source: serde_json::Error,
    },
    #[error("upload response has no data.link")]
    MissingLink,
}

/// 🏷️ Something that can turn a natural key into a URL.
///
/// Shared across every worker behind an `Arc`, so `&self` only.
#[async_trait]
pub(crate) trait Enricher: std::fmt::Debug + Send + Sync {
    async fn enrich(&self, key: &str) -> Result<String, EnrichmentError>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    /// 📤 multipart upload endpoint
    pub upload_url: String,
    /// 🔒 sent as `X-API-KEY`
    pub app_id: String,
    /// 🌐 prepended to the returned link
    #[serde(default = "default_cdn_prefix")]
    pub cdn_prefix: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_cdn_prefix() -> String {
    "https://cdn.u-code.io/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    data: Option<UploadedFile>,
}

#[derive(Deserialize)]
struct UploadedFile {
    #[serde(default)]
    link: String,
}

/// 📱 Renders QR codes and ships them to the file service.
#[derive(Debug)]
pub(crate) struct QrEnricher {
    client: reqwest::Client,
    config: EnrichmentConfig,
}

impl QrEnricher {
    pub(crate) fn new(config: EnrichmentConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The upload client could not be built. No QR codes today.")?;
        Ok(Self { client, config })
    }
}

/// 🎨 The QR code for `key`, as an SVG document.
pub(crate) fn render_qr_svg(key: &str) -> Result<String, EnrichmentError> {
    let code = QrCode::with_error_correction_level(key.as_bytes(), EcLevel::M)
        .map_err(|err| EnrichmentError::Render(err.to_string()))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .build())
}

// -- 🧼 product codes contain slashes and spaces; file names should not
fn file_name_for(key: &str) -> String {
    let stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "qr.svg".to_string()
    } else {
        format!("{stem}.svg")
    }
}

#[async_trait]
impl Enricher for QrEnricher {
    async fn enrich(&self, key: &str) -> Result<String, EnrichmentError> {
        let svg = render_qr_svg(key)?;
        let part = Part::bytes(svg.into_bytes())
            .file_name(file_name_for(key))
            .mime_str("image/svg+xml")
            .map_err(|source| EnrichmentError::Transport { source })?;

        trace!("📤 uploading QR code for '{}'", key);
        let response = self
            .client
            .post(&self.config.upload_url)
            .header("authorization", "API-KEY")
            .header("X-API-KEY", &self.config.app_id)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(|source| EnrichmentError::Transport { source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| EnrichmentError::Transport { source })?;
        // -- 201 or bust
        if status != reqwest::StatusCode::CREATED {
            return Err(EnrichmentError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let uploaded: UploadResponse =
            serde_json::from_str(&body).map_err(|source| EnrichmentError::Unmarshal { source })?;
        match uploaded.data {
            Some(UploadedFile { link }) if !link.is_empty() => {
                Ok(format!("{}{}", self.config.cdn_prefix, link))
            }
            _ => Err(EnrichmentError::MissingLink),
        }
    }
}
