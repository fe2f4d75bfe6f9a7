//! Google Cloud Vision image analysis adapter

use super::error::check_status;
use super::{http_client, AdapterError, ImageAnalysisAdapter};
use crate::error::{IntegrationError, Result};
use crate::types::{AnalysisOptions, ImageAnalysis, Label};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://vision.googleapis.com";

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleVisionConfig {
    /// Falls back to `GOOGLE_VISION_API_KEY`
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub struct GoogleVisionAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    safe_search_annotation: Option<SafeSearch>,
    face_annotations: Option<Vec<serde_json::Value>>,
    full_text_annotation: Option<FullText>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct LabelAnnotation {
    description: String,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Default, Deserialize)]
struct SafeSearch {
    #[serde(default)]
    adult: String,
    #[serde(default)]
    racy: String,
}

#[derive(Debug, Deserialize)]
struct FullText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Vision likelihoods at or above this count as explicit
fn is_likely(likelihood: &str) -> bool {
    matches!(likelihood, "LIKELY" | "VERY_LIKELY")
}

impl GoogleVisionAdapter {
    pub fn new(api_key: SecretString, base_url: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &GoogleVisionConfig, timeout: Duration) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            IntegrationError::Config("google_vision.api_key is not set".to_string())
        })?;
        Self::new(api_key, config.base_url.clone(), timeout)
    }
}

#[async_trait]
impl ImageAnalysisAdapter for GoogleVisionAdapter {
    fn provider(&self) -> &str {
        "google_vision"
    }

    async fn analyze(
        &self,
        image: &[u8],
        options: &AnalysisOptions,
    ) -> std::result::Result<ImageAnalysis, AdapterError> {
        let mut features = vec![
            json!({ "type": "LABEL_DETECTION", "maxResults": options.max_labels }),
            json!({ "type": "SAFE_SEARCH_DETECTION" }),
        ];
        if options.detect_faces {
            features.push(json!({ "type": "FACE_DETECTION" }));
        }
        if options.detect_text {
            features.push(json!({ "type": "TEXT_DETECTION" }));
        }

        let body = json!({
            "requests": [{
                "image": { "content": STANDARD.encode(image) },
                "features": features,
            }]
        });

        let response = self
            .client
            .post(format!("{}/v1/images:annotate", self.base_url))
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: AnnotateResponse = response.json().await?;

        let result = parsed
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Protocol("empty annotate response".to_string()))?;

        // Per-image errors arrive inside a 200 response
        if let Some(status) = result.error {
            return Err(AdapterError::Protocol(format!(
                "vision error {}: {}",
                status.code, status.message
            )));
        }

        let safe = result.safe_search_annotation.unwrap_or_default();
        Ok(ImageAnalysis {
            labels: result
                .label_annotations
                .into_iter()
                .map(|l| Label {
                    description: l.description,
                    score: l.score,
                })
                .collect(),
            explicit_content: is_likely(&safe.adult) || is_likely(&safe.racy),
            faces: options
                .detect_faces
                .then(|| result.face_annotations.map_or(0, |f| f.len() as u32)),
            text: if options.detect_text {
                result.full_text_annotation.map(|t| t.text)
            } else {
                None
            },
            fingerprint: None,
        })
    }

    async fn ping(&self) -> std::result::Result<(), AdapterError> {
        let response = self
            .client
            .get(format!("{}/$discovery/rest", self.base_url))
            .query(&[("version", "v1")])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
