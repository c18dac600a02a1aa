use async_trait::async_trait;
use editstream_proto::FrameBuffer;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::editor::{EditJob, EditorError, Evaluation, ImageEditor, PlanChunk, PlanStream};
use crate::config::GeminiConfig;
use crate::utils::DataUrl;

#[derive(Clone)]
pub struct GeminiEditor {
    client: Client,
    config: GeminiConfig,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
    include_thoughts: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationPayload {
    satisfied: bool,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    revised_prompt: Option<String>,
}

impl GenerateResponse {
    fn parts(self) -> impl Iterator<Item = Part> {
        self.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
    }
}

fn text_part(text: impl Into<String>) -> Part {
    Part {
        text: Some(text.into()),
        ..Default::default()
    }
}

fn image_part(data_url: &str) -> Result<Part, EditorError> {
    let url = DataUrl::parse(data_url)
        .ok_or_else(|| EditorError::InvalidImage("expected a data: URL".to_string()))?;
    Ok(Part {
        inline_data: Some(InlineData {
            mime_type: url.mime_type.to_string(),
            data: url.data.to_string(),
        }),
        ..Default::default()
    })
}

fn user_content(parts: Vec<Part>) -> Vec<Content> {
    vec![Content {
        role: Some("user".to_string()),
        parts,
    }]
}

/// Pull the model chunks out of one `alt=sse` frame.
fn sse_chunks(frame: &[u8]) -> Result<Vec<PlanChunk>, EditorError> {
    let text = std::str::from_utf8(frame).map_err(|e| EditorError::InvalidResponse(e.to_string()))?;
    let mut chunks = Vec::new();

    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }

        let response: GenerateResponse =
            serde_json::from_str(payload).map_err(|e| EditorError::InvalidResponse(e.to_string()))?;
        for part in response.parts() {
            match (part.text, part.thought.unwrap_or(false)) {
                (Some(text), true) => chunks.push(PlanChunk::Thinking(text)),
                (Some(text), false) => chunks.push(PlanChunk::Text(text)),
                (None, _) => {}
            }
        }
    }

    Ok(chunks)
}

impl GeminiEditor {
    pub fn new(config: GeminiConfig) -> Result<Self, EditorError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EditorError::NotConfigured("gemini.api_key is not set".to_string()))?;

        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            api_key,
        })
    }

    async fn call(&self, model: &str, method: &str, request: &GenerateRequest) -> Result<reqwest::Response, EditorError> {
        let url = format!("{}/models/{}:{}", self.config.base_url.trim_end_matches('/'), model, method);
        debug!("Gemini request {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| EditorError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EditorError::Api { status, body });
        }

        Ok(response)
    }

    async fn generate_content(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse, EditorError> {
        self.call(model, "generateContent", request)
            .await?
            .json()
            .await
            .map_err(|e| EditorError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ImageEditor for GeminiEditor {
    async fn plan(&self, job: &EditJob) -> Result<PlanStream, EditorError> {
        let mut instruction = format!(
            "Rewrite this image edit request as one precise instruction for an image model. \
             Reply with the instruction only.\nRequest: {}",
            job.user_prompt
        );
        for point in &job.reference_points {
            instruction.push_str(&format!("\nPoint {} is at ({:.0}, {:.0}).", point.label, point.x, point.y));
        }
        if job.mask_image.is_some() {
            instruction.push_str("\nOnly the masked area may change.");
        }

        let mut parts = vec![text_part(instruction), image_part(&job.source_image)?];
        if let Some(mask) = &job.mask_image {
            parts.push(image_part(mask)?);
        }

        let request = GenerateRequest {
            contents: user_content(parts),
            generation_config: Some(GenerationConfig {
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: self.config.thinking_budget,
                    include_thoughts: true,
                }),
                ..Default::default()
            }),
        };

        let response = self
            .call(&self.config.planning_model, "streamGenerateContent?alt=sse", &request)
            .await?;

        Ok(Box::pin(async_stream::stream! {
            let mut body = Box::pin(response.bytes_stream());
            let mut buffer = FrameBuffer::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Gemini planning stream aborted: {}", e);
                        yield Err(EditorError::Request(e.to_string()));
                        return;
                    }
                };
                for frame in buffer.push(&chunk) {
                    match sse_chunks(&frame) {
                        Ok(chunks) => {
                            for c in chunks {
                                yield Ok(c);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if let Some(rest) = buffer.finish() {
                match sse_chunks(&rest) {
                    Ok(chunks) => {
                        for c in chunks {
                            yield Ok(c);
                        }
                    }
                    Err(e) => yield Err(e),
                }
            }
        }))
    }

    async fn generate(&self, prompt: &str, source_image: &str, mask_image: Option<&str>) -> Result<String, EditorError> {
        let mut parts = vec![text_part(prompt), image_part(source_image)?];
        if let Some(mask) = mask_image {
            parts.push(text_part("Edit only where this mask is white:"));
            parts.push(image_part(mask)?);
        }

        let request = GenerateRequest {
            contents: user_content(parts),
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
                ..Default::default()
            }),
        };

        let response = self.generate_content(&self.config.image_model, &request).await?;
        response
            .parts()
            .find_map(|p| p.inline_data)
            .map(|img| DataUrl::encode(&img.mime_type, &img.data))
            .ok_or(EditorError::NoImage)
    }

    async fn evaluate(
        &self,
        user_prompt: &str,
        edit_prompt: &str,
        source_image: &str,
        result_image: &str,
    ) -> Result<Evaluation, EditorError> {
        let instruction = format!(
            "The first image is the original, the second is the edit. User request: {}\n\
             Instruction used: {}\n\
             Answer as JSON {{\"satisfied\": bool, \"reasoning\": string, \"revisedPrompt\": string}}.",
            user_prompt, edit_prompt
        );

        let request = GenerateRequest {
            contents: user_content(vec![
                text_part(instruction),
                image_part(source_image)?,
                image_part(result_image)?,
            ]),
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                ..Default::default()
            }),
        };

        let response = self.generate_content(&self.config.planning_model, &request).await?;
        let text: String = response
            .parts()
            .filter(|p| !p.thought.unwrap_or(false))
            .filter_map(|p| p.text)
            .collect();

        let payload: EvaluationPayload =
            serde_json::from_str(text.trim()).map_err(|e| EditorError::InvalidResponse(e.to_string()))?;

        Ok(Evaluation {
            satisfied: payload.satisfied,
            reasoning: payload.reasoning,
            revised_prompt: payload.revised_prompt,
        })
    }
}
