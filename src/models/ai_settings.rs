use std::str::FromStr;

/// LLM backend used for category suggestions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AiProvider {
    /// Any endpoint speaking the OpenAI chat-completions protocol.
    #[default]
    OpenAi,
    Ollama,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Ollama => "llama3.2",
        }
    }
}

impl FromStr for AiProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AiSettings {
    pub provider: AiProvider,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl AiSettings {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
            && !self.model.is_empty()
            && (self.provider == AiProvider::Ollama || !self.api_key.is_empty())
    }
}
