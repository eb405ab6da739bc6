use crate::error::{LecternError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Openai,
    Gemini,
}

/// OpenAI-compatible endpoints and models of one provider.
pub struct ProviderConfig {
    pub base_url: &'static str,
    pub chat_model: &'static str,
    pub embedding_model: &'static str,
    pub env_var: &'static str,
}

impl Provider {
    pub fn config(&self) -> ProviderConfig {
        match self {
            Provider::Openai => ProviderConfig {
                base_url: "https://api.openai.com/v1",
                chat_model: "gpt-4o",
                embedding_model: "text-embedding-3-small",
                env_var: "OPENAI_API_KEY",
            },
            Provider::Gemini => ProviderConfig {
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
                chat_model: "gemini-2.5-flash",
                embedding_model: "gemini-embedding-001",
                env_var: "GEMINI_API_KEY",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Openai => "OpenAI",
            Provider::Gemini => "Gemini",
        }
    }

    /// Validate that the API key is set for this provider
    pub fn validate_api_key(&self) -> Result<String> {
        let config = self.config();
        std::env::var(config.env_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LecternError::MissingApiKey {
                env_var: config.env_var.to_string(),
            })
    }
}
