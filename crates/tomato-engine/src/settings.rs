use std::env;
use std::time::Duration;

use reqwest::Url;

use crate::endpoint::{
    ChatEndpoint, DryrunEndpoint, OpenAiChatEndpoint, DEFAULT_CHAT_MODEL, DEFAULT_OPENAI_API_BASE,
};
use crate::error::AnalysisError;
use crate::parser::{BalancedObjectParser, BraceSpanParser, ReplyParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Dryrun,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Result<Self, AnalysisError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "dryrun" => Ok(Self::Dryrun),
            other => Err(AnalysisError::Configuration(format!(
                "unknown provider '{other}' (expected openai or dryrun)"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Dryrun => "dryrun",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserKind {
    #[default]
    BraceSpan,
    Balanced,
}

impl ParserKind {
    pub fn parse(raw: &str) -> Result<Self, AnalysisError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "brace-span" | "brace_span" => Ok(Self::BraceSpan),
            "balanced" => Ok(Self::Balanced),
            other => Err(AnalysisError::Configuration(format!(
                "unknown reply parser '{other}' (expected brace-span or balanced)"
            ))),
        }
    }

    pub fn build(self) -> Box<dyn ReplyParser> {
        match self {
            Self::BraceSpan => Box::new(BraceSpanParser),
            Self::Balanced => Box::new(BalancedObjectParser),
        }
    }
}

/// How the four specialists are scheduled. The treatment coordinator always
/// runs after all four have returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub parser: ParserKind,
    pub mode: ExecutionMode,
    pub http_timeout: Option<Duration>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            api_key: None,
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            parser: ParserKind::default(),
            mode: ExecutionMode::default(),
            http_timeout: None,
        }
    }
}

impl AnalyzerSettings {
    pub fn from_env() -> Result<Self, AnalysisError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves settings from a key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AnalysisError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        };

        let mut settings = Self {
            api_key: first(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]),
            ..Self::default()
        };
        if let Some(base) = first(&["OPENAI_API_BASE", "OPENAI_BASE_URL"]) {
            settings.api_base = normalize_api_base(&base);
        }
        if let Some(model) = first(&["TOMATO_MODEL"]) {
            settings.model = model;
        }
        if let Some(provider) = first(&["TOMATO_PROVIDER"]) {
            settings.provider = ProviderKind::parse(&provider)?;
        }
        if let Some(parser) = first(&["TOMATO_PARSER"]) {
            settings.parser = ParserKind::parse(&parser)?;
        }
        if let Some(raw) = first(&["TOMATO_HTTP_TIMEOUT_SECS"]) {
            settings.http_timeout = Some(parse_timeout(&raw)?);
        }
        Ok(settings)
    }

    pub fn require_api_key(&self) -> Result<&str, AnalysisError> {
        self.api_key
            .as_deref()
            .ok_or(AnalysisError::MissingCredential)
    }

    /// Key with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> Option<String> {
        let key = self.api_key.as_deref()?;
        let chars: Vec<char> = key.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        Some(format!("{}{tail}", "*".repeat(20)))
    }

    pub fn build_endpoint(&self) -> Result<Box<dyn ChatEndpoint>, AnalysisError> {
        match self.provider {
            ProviderKind::Dryrun => Ok(Box::new(DryrunEndpoint)),
            ProviderKind::OpenAi => {
                let api_key = self.require_api_key()?;
                let endpoint = OpenAiChatEndpoint::new(api_key, &self.api_base, self.http_timeout)
                    .map_err(|err| AnalysisError::Configuration(format!("{err:#}")))?;
                Ok(Box::new(endpoint))
            }
        }
    }
}

fn normalize_api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}

fn parse_timeout(raw: &str) -> Result<Duration, AnalysisError> {
    raw.parse::<f64>()
        .ok()
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| {
            AnalysisError::Configuration(format!(
                "TOMATO_HTTP_TIMEOUT_SECS must be a positive number of seconds, got '{raw}'"
            ))
        })
}
