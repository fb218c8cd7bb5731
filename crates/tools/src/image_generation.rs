//! Image generation tool: OpenAI-compatible `/images/generations`.
//!
//! URL results are returned as is. Base64 results are decoded and written
//! as PNG files under the configured output directory.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cortex_core::error::ToolError;
use cortex_core::tool::{Tool, ToolCall, ToolKind, ToolResult};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};

pub struct ImageGenerationTool {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    size: String,
    output_dir: PathBuf,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

impl ImageGenerationTool {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        size: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            size: size.into(),
            output_dir: output_dir.into(),
        }
    }

    fn failed(reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "generate_image".into(),
            reason,
        }
    }

    async fn save_png(&self, b64: &str) -> Result<PathBuf, ToolError> {
        let bytes = STANDARD
            .decode(b64.trim())
            .map_err(|e| Self::failed(format!("invalid image data: {e}")))?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| Self::failed(format!("failed to create image directory: {e}")))?;

        let path = self
            .output_dir
            .join(format!("image-{}.png", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Self::failed(format!("failed to write image: {e}")))?;
        Ok(path)
    }
}

#[async_trait]
impl Tool for ImageGenerationTool {
    fn kind(&self) -> ToolKind {
        ToolKind::GenerateImage
    }

    fn description(&self) -> &str {
        "Generate an image from a text description. Returns a link or file path to the image."
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let ToolCall::GenerateImage { prompt } = call else {
            return Err(ToolError::InvalidArguments(format!(
                "generate_image cannot handle {}",
                call.kind()
            )));
        };

        let url = format!("{}/images/generations", self.base_url);
        let body = serde_json::json!({
            "prompt": prompt,
            "n": 1,
            "size": self.size,
        });

        debug!(prompt = %prompt, "Requesting image generation");
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::failed(format!("image request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::failed(format!("image API returned {status}: {text}")));
        }

        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|e| Self::failed(format!("invalid image response: {e}")))?;

        let Some(image) = parsed.data.into_iter().next() else {
            return Err(Self::failed("image API returned no images".into()));
        };

        let location = match (image.url, image.b64_json) {
            (Some(url), _) => url,
            (None, Some(b64)) => {
                let path = self.save_png(&b64).await?;
                info!(path = %path.display(), "Generated image saved");
                path.display().to_string()
            }
            (None, None) => return Err(Self::failed("image API returned an empty image".into())),
        };

        Ok(ToolResult::ok(format!("Image generated for '{prompt}': {location}"))
            .with_data(serde_json::json!({ "location": location })))
    }
}
