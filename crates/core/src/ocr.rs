use crate::error::IngestError;
use crate::models::PageText;
use crate::traits::OcrEngine;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub pdftoppm_bin: String,
    pub tesseract_bin: String,
    pub dpi: u32,
    pub language: Option<String>,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            pdftoppm_bin: "pdftoppm".to_string(),
            tesseract_bin: "tesseract".to_string(),
            dpi: 200,
            language: None,
        }
    }
}

impl TesseractOcr {
    async fn rasterize(&self, path: &Path, workdir: &Path) -> Result<Vec<(u32, PathBuf)>, IngestError> {
        let output = Command::new(&self.pdftoppm_bin)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(path)
            .arg(workdir.join("page"))
            .output()
            .await?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "{} exited with {}: {}",
                self.pdftoppm_bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut images = Vec::new();
        let mut entries = tokio::fs::read_dir(workdir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let image = entry.path();
            if let Some(number) = rasterized_page_number(&image) {
                images.push((number, image));
            }
        }
        images.sort_by_key(|(number, _)| *number);
        Ok(images)
    }

    async fn recognize_image(&self, image: &Path) -> Result<String, IngestError> {
        let mut command = Command::new(&self.tesseract_bin);
        command.arg(image).arg("stdout");
        if let Some(language) = &self.language {
            command.arg("-l").arg(language);
        }

        let output = command.output().await?;
        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "{} exited with {} on {}: {}",
                self.tesseract_bin,
                output.status,
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let workdir = std::env::temp_dir().join(format!("pdf-rag-ocr-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&workdir).await?;

        let result = async {
            let images = self.rasterize(path, &workdir).await?;
            debug!(pages = images.len(), path = %path.display(), "rasterized pdf for OCR");

            let mut pages = Vec::with_capacity(images.len());
            for (number, image) in images {
                let text = self.recognize_image(&image).await?;
                pages.push(PageText { number, text });
            }
            Ok::<_, IngestError>(pages)
        }
        .await;

        if let Err(error) = tokio::fs::remove_dir_all(&workdir).await {
            warn!(dir = %workdir.display(), error = %error, "failed to remove OCR scratch dir");
        }

        result
    }
}

/// `pdftoppm` writes `page-1.png` or zero padded `page-01.png` depending on page count.
fn rasterized_page_number(image: &Path) -> Option<u32> {
    if image.extension().and_then(|ext| ext.to_str()) != Some("png") {
        return None;
    }
    let stem = image.file_stem()?.to_str()?;
    stem.rsplit_once('-')?.1.parse().ok()
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// Reads `LLM_OCR_ENDPOINT` and `LLM_OCR_API_KEY`; `None` when no endpoint is set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("LLM_OCR_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("LLM_OCR_API_KEY").ok().and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Some(Self { endpoint, api_key })
    }
}

pub struct HttpOcr {
    config: OcrEndpointConfig,
    client: Client,
}

impl HttpOcr {
    pub fn new(config: OcrEndpointConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn recognize(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let pdf = tokio::fs::read(path).await?;
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: path.to_string_lossy().to_string(),
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json().await?;
        payload_to_pages(&payload, path)
    }
}

fn payload_to_pages(payload: &LlmOcrResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .enumerate()
            .filter_map(|(index, page)| {
                let text = page.text.as_ref().map(|value| value.trim().to_string())?;
                if text.is_empty() {
                    return None;
                }
                Some(PageText {
                    number: page.page.unwrap_or(index as u32 + 1),
                    text,
                })
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "multimodal OCR response was empty for {}",
        path.display()
    )))
}
