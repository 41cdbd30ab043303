use crate::error::{AppError, AppResult};
use crate::models::{AiProvider, AiSettings};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Create an HTTP client with appropriate timeout
fn create_client() -> AppResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Build the prompt asking for a single category name for `title`.
///
/// `recent` holds `(title, category)` pairs of the user's latest expenses.
pub fn build_prompt(title: &str, categories: &[String], recent: &[(String, String)]) -> String {
    let category_list = if categories.is_empty() {
        "No categories yet".to_string()
    } else {
        categories.join(", ")
    };

    let recent_context = if recent.is_empty() {
        "No recent expenses".to_string()
    } else {
        recent
            .iter()
            .map(|(t, c)| format!("\"{}\" -> {}", t, c))
            .collect::<Vec<_>>()
            .join("; ")
    };

    format!(
        r#"You are a finance tracking assistant. Based on the transaction title "{}", suggest the most appropriate category from the user's existing categories: {}.

Recent spending patterns: {}

Respond with ONLY the category name (exact match from the list), or null if no good match exists. Do not explain or provide any other text."#,
        title, category_list, recent_context
    )
}

/// Accept the model's answer only if it names one of `categories` exactly.
pub fn validate_suggestion(content: &str, categories: &[String]) -> Option<String> {
    let answer = content.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("null") {
        return None;
    }
    categories.iter().find(|c| c.as_str() == answer).cloned()
}

/// Ask the configured provider for a category. Every failure is logged and
/// reported as "no suggestion".
pub async fn suggest_category(
    settings: &AiSettings,
    title: &str,
    categories: &[String],
    recent: &[(String, String)],
) -> Option<String> {
    if categories.is_empty() {
        return None;
    }
    if !settings.is_configured() {
        warn!(provider = settings.provider.as_str(), "AI provider not configured");
        return None;
    }

    let prompt = build_prompt(title, categories, recent);
    let result = match settings.provider {
        AiProvider::OpenAi => complete_with_openai_compatible(settings, prompt).await,
        AiProvider::Ollama => complete_with_ollama(settings, prompt).await,
    };

    match result {
        Ok(content) => {
            let suggestion = validate_suggestion(&content, categories);
            debug!(
                raw = %content.trim(),
                accepted = suggestion.is_some(),
                "Category suggestion received"
            );
            suggestion
        }
        Err(e) => {
            warn!(error = %e, "Category suggestion failed");
            None
        }
    }
}

async fn complete_with_ollama(settings: &AiSettings, prompt: String) -> AppResult<String> {
    let client = create_client()?;
    let url = format!("{}/api/generate", settings.base_url.trim_end_matches('/'));

    #[derive(Serialize)]
    struct OllamaRequest {
        model: String,
        prompt: String,
        stream: bool,
    }

    #[derive(Deserialize)]
    struct OllamaResponse {
        response: String,
    }

    let request = OllamaRequest {
        model: settings.model.clone(),
        prompt,
        stream: false,
    };

    debug!(model = %settings.model, "Sending suggestion request to Ollama");

    let response = client
        .post(&url)
        .json(&request)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("Ollama request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Upstream(format!(
            "Ollama returned {}: {}",
            status, body
        )));
    }

    let ollama_response: OllamaResponse = response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("Failed to parse Ollama response: {}", e)))?;

    Ok(ollama_response.response)
}

async fn complete_with_openai_compatible(
    settings: &AiSettings,
    prompt: String,
) -> AppResult<String> {
    let client = create_client()?;
    let url = format!(
        "{}/chat/completions",
        settings.base_url.trim_end_matches('/')
    );

    #[derive(Serialize)]
    struct Message {
        role: String,
        content: String,
    }

    #[derive(Serialize)]
    struct OpenAiRequest {
        model: String,
        messages: Vec<Message>,
        temperature: f64,
    }

    #[derive(Deserialize)]
    struct OpenAiResponse {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: ChoiceMessage,
    }

    #[derive(Deserialize)]
    struct ChoiceMessage {
        content: Option<String>,
    }

    let request = OpenAiRequest {
        model: settings.model.clone(),
        messages: vec![Message {
            role: "user".to_string(),
            content: prompt,
        }],
        temperature: 0.2,
    };

    debug!(model = %settings.model, "Sending suggestion request to OpenAI-compatible API");

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", settings.api_key))
        .json(&request)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("OpenAI request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Upstream(format!(
            "OpenAI API returned {}: {}",
            status, body
        )));
    }

    let openai_response: OpenAiResponse = response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("Failed to parse OpenAI response: {}", e)))?;

    Ok(openai_response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}
