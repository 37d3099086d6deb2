use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatImage {
    pub data_url: String,
    pub detail: String,
}

impl ChatImage {
    pub fn high_detail(data_url: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
            detail: "high".to_string(),
        }
    }
}

/// One chat completion: a system instruction and a user turn made of the
/// prompt text plus an optional image.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub agent_name: String,
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub image: Option<ChatImage>,
    pub max_tokens: u32,
}

pub trait ChatEndpoint: Send + Sync {
    fn name(&self) -> &str;
    /// Returns the reply text of a single best-effort call.
    fn complete(&self, request: &ChatRequest) -> Result<String>;
}

pub struct OpenAiChatEndpoint {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl OpenAiChatEndpoint {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = HttpClient::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    pub fn endpoint_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

impl ChatEndpoint for OpenAiChatEndpoint {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let payload = chat_completion_payload(request);
        let response = self
            .http
            .post(self.endpoint_url())
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request for {} failed", request.agent_name))?;
        let parsed = response_json_or_error("OpenAI", response)?;
        extract_chat_content(&parsed)
    }
}

pub fn chat_completion_payload(request: &ChatRequest) -> Value {
    let user_content = match &request.image {
        Some(image) => json!([
            {"type": "text", "text": request.prompt},
            {
                "type": "image_url",
                "image_url": {
                    "url": image.data_url,
                    "detail": image.detail,
                }
            }
        ]),
        None => Value::String(request.prompt.clone()),
    };
    json!({
        "model": request.model,
        "messages": [
            {"role": "system", "content": request.system},
            {"role": "user", "content": user_content},
        ],
        "max_tokens": request.max_tokens,
    })
}

/// Text of `choices[0].message.content`.
pub fn extract_chat_content(response: &Value) -> Result<String> {
    let message = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"));
    let Some(message) = message else {
        bail!("chat completion response has no choices");
    };
    match message.get("content") {
        Some(Value::String(text)) => Ok(text.clone()),
        _ => {
            let refusal = message
                .get("refusal")
                .and_then(Value::as_str)
                .unwrap_or("message content is empty");
            bail!("chat completion returned no text: {refusal}")
        }
    }
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

/// Flattens an error chain into one line, dropping repeated causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().is_some_and(|last| last == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Offline endpoint answering every agent with a canned report.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunEndpoint;

impl ChatEndpoint for DryrunEndpoint {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let body = match request.agent_name.as_str() {
            "Plant Pathology Specialist" => json!({
                "agent_name": "Plant Pathology Specialist",
                "diseases_identified": ["Early Blight (Alternaria solani) (72%)"],
                "pathogen_type": "fungal",
                "disease_stage": "early",
                "severity_score": "4",
                "key_symptoms": ["Brown lesions with concentric rings on older leaves"],
                "differential_diagnosis": ["Target Spot", "Septoria Leaf Spot"],
                "prognosis": "Spreads upward through the canopy if untreated",
            }),
            "Entomology Specialist" => json!({
                "agent_name": "Entomology Specialist",
                "pest_damage_detected": [],
                "damage_pattern": "No feeding damage visible",
                "pest_lifecycle_stage": "none observed",
                "infestation_level": "light",
                "secondary_issues": [],
                "beneficial_insects": ["Lady beetles", "Lacewings"],
            }),
            "Plant Nutrition Specialist" => json!({
                "agent_name": "Plant Nutrition Specialist",
                "nutrient_deficiencies": ["Magnesium (Mg) (30%)"],
                "physiological_disorders": [],
                "soil_ph_indication": "neutral",
                "fertilizer_recommendations": ["Epsom salt foliar spray"],
                "environmental_factors": ["Leaching after heavy irrigation"],
            }),
            "Environmental Stress Specialist" => json!({
                "agent_name": "Environmental Stress Specialist",
                "stress_factors": [],
                "climate_conditions": ["Warm and humid"],
                "soil_conditions": ["Adequate drainage"],
                "water_management": ["Water at the base in the morning"],
                "microclimate_factors": ["Dense canopy limits airflow"],
            }),
            "Treatment Coordinator" => json!({
                "agent_name": "Treatment Coordinator",
                "priority_treatments": ["Remove and destroy affected lower leaves"],
                "organic_treatments": ["Copper-based fungicide every 7-10 days"],
                "chemical_treatments": ["Chlorothalonil if lesions keep spreading"],
                "cultural_practices": ["Mulch to stop soil splash"],
                "prevention_strategies": ["Rotate crops on a three year cycle"],
                "monitoring_schedule": ["Inspect lower leaves twice a week"],
                "treatment_timeline": ["Day 0: prune", "Day 1: first spray"],
                "resistance_management": ["Alternate fungicide groups"],
                "integrated_approach": ["Combine sanitation, nutrition and spraying"],
            }),
            other => bail!("dryrun has no canned reply for agent '{other}'"),
        };
        Ok(format!(
            "Dryrun analysis:\n{}",
            serde_json::to_string_pretty(&body)?
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        chat_completion_payload, error_chain_text, extract_chat_content, ChatEndpoint, ChatImage,
        ChatRequest, DryrunEndpoint, OpenAiChatEndpoint,
    };
    use crate::parser::parse_json_response;

    fn request(image: Option<ChatImage>) -> ChatRequest {
        ChatRequest {
            agent_name: "Plant Pathology Specialist".to_string(),
            model: "gpt-4o".to_string(),
            system: "You are a plant pathology expert. Always respond with valid JSON.".to_string(),
            prompt: "Analyze this tomato leaf".to_string(),
            image,
            max_tokens: 1200,
        }
    }

    #[test]
    fn payload_with_image_uses_content_parts() {
        let payload = chat_completion_payload(&request(Some(ChatImage::high_detail(
            "data:image/jpeg;base64,QUJD",
        ))));
        assert_eq!(payload["model"], json!("gpt-4o"));
        assert_eq!(payload["max_tokens"], json!(1200));
        assert_eq!(payload["messages"][0]["role"], json!("system"));
        let parts = &payload["messages"][1]["content"];
        assert_eq!(parts[0], json!({"type": "text", "text": "Analyze this tomato leaf"}));
        assert_eq!(parts[1]["type"], json!("image_url"));
        assert_eq!(parts[1]["image_url"]["url"], json!("data:image/jpeg;base64,QUJD"));
        assert_eq!(parts[1]["image_url"]["detail"], json!("high"));
    }

    #[test]
    fn text_only_payload_sends_plain_string() {
        let payload = chat_completion_payload(&request(None));
        assert_eq!(
            payload["messages"][1],
            json!({"role": "user", "content": "Analyze this tomato leaf"})
        );
    }

    #[test]
    fn extracts_first_choice_text() -> anyhow::Result<()> {
        let response = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "{\"ok\": true}"}},
                {"message": {"role": "assistant", "content": "ignored"}}
            ]
        });
        assert_eq!(extract_chat_content(&response)?, "{\"ok\": true}");
        Ok(())
    }

    #[test]
    fn missing_content_is_an_error() {
        let empty = json!({"choices": []});
        assert!(extract_chat_content(&empty).is_err());

        let refused = json!({"choices": [{"message": {"content": null, "refusal": "cannot help"}}]});
        let err = extract_chat_content(&refused).unwrap_err();
        assert!(err.to_string().contains("cannot help"));
    }

    #[test]
    fn endpoint_url_trims_trailing_slash() -> anyhow::Result<()> {
        let endpoint = OpenAiChatEndpoint::new("sk-test", "https://example.test/v1/", None)?;
        assert_eq!(endpoint.endpoint_url(), "https://example.test/v1/chat/completions");
        assert_eq!(endpoint.name(), "openai");
        Ok(())
    }

    #[test]
    fn error_chain_text_joins_distinct_causes() {
        let err = anyhow::anyhow!("connection refused")
            .context("OpenAI request for Entomology Specialist failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "OpenAI request for Entomology Specialist failed | caused by: connection refused"
        );
        assert_eq!(error_chain_text(&err, 6), "OpenAI…");
    }

    #[test]
    fn dryrun_replies_parse_for_every_agent() -> anyhow::Result<()> {
        for agent in [
            "Plant Pathology Specialist",
            "Entomology Specialist",
            "Plant Nutrition Specialist",
            "Environmental Stress Specialist",
            "Treatment Coordinator",
        ] {
            let mut req = request(None);
            req.agent_name = agent.to_string();
            let parsed = parse_json_response(&DryrunEndpoint.complete(&req)?);
            assert_eq!(parsed["agent_name"], json!(agent));
        }
        Ok(())
    }

    #[test]
    fn dryrun_rejects_unknown_agent() {
        let mut req = request(None);
        req.agent_name = "Soil Chemist".to_string();
        assert!(DryrunEndpoint.complete(&req).is_err());
    }
}
