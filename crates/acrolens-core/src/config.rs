//! Host configuration.
//!
//! Read from extension storage by the browser crate and handed to the
//! content controller, both at start-up and whenever storage changes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smol_str::SmolStr;
use tracing::warn;

use crate::error::ConfigError;
use crate::lookup::LookupBackend;
use crate::matcher::{MatchRule, TokenMatcher};
use crate::model::ModelBackend;

/// Model identifier used when the hosted provider is picked without one.
pub const DEFAULT_HOSTED_MODEL: &str = "openai/gpt-4o-mini";

/// Configuration value naming the browser's built-in model.
pub const ON_DEVICE_MODEL: &str = "on-device";

/// Which model answers explanations by default.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelChoice {
    #[default]
    OnDevice,
    /// A hosted model, by provider identifier (`vendor/model`).
    Hosted(SmolStr),
}

impl ModelChoice {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | ON_DEVICE_MODEL => ModelChoice::OnDevice,
            id => ModelChoice::Hosted(id.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ModelChoice::OnDevice => ON_DEVICE_MODEL,
            ModelChoice::Hosted(id) => id,
        }
    }
}

impl From<String> for ModelChoice {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ModelChoice> for String {
    fn from(value: ModelChoice) -> Self {
        value.as_str().to_string()
    }
}

/// What happens to a highlight once its overlay closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseMode {
    /// The highlight stays.
    #[default]
    Keep,
    /// The container is replaced by its plain text.
    RevertToText,
}

/// Whether the configured model can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    NotRequired,
    Present,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    pub highlight_enabled: bool,
    pub model: ModelChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub match_rule: MatchRule,
    pub close_mode: CloseMode,
    pub stop_words: Vec<SmolStr>,
    pub min_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            highlight_enabled: true,
            model: ModelChoice::OnDevice,
            api_key: None,
            match_rule: MatchRule::default(),
            close_mode: CloseMode::Keep,
            stop_words: Vec::new(),
            min_len: 2,
            max_len: None,
        }
    }
}

impl HostConfig {
    /// Strict decode; any malformed field is an error.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decode field by field, keeping the default for anything malformed.
    pub fn from_value_lenient(value: &Value) -> Self {
        let mut config = Self::default();
        let Some(map) = value.as_object() else {
            if !value.is_null() {
                warn!("configuration is not an object, using defaults");
            }
            return config;
        };
        read_field(map, "highlightEnabled", &mut config.highlight_enabled);
        read_field(map, "model", &mut config.model);
        read_field(map, "apiKey", &mut config.api_key);
        read_field(map, "matchRule", &mut config.match_rule);
        read_field(map, "closeMode", &mut config.close_mode);
        read_field(map, "stopWords", &mut config.stop_words);
        read_field(map, "minLen", &mut config.min_len);
        read_field(map, "maxLen", &mut config.max_len);
        config
    }

    /// Token matcher for the configured rule and bounds.
    pub fn matcher(&self) -> TokenMatcher {
        let matcher = TokenMatcher::new(self.match_rule)
            .with_min_len(self.min_len)
            .with_stop_words(self.stop_words.iter().cloned());
        match self.max_len {
            Some(max_len) => matcher.with_max_len(max_len),
            None => matcher,
        }
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            choice: self.model.clone(),
            api_key: self.api_key.clone(),
        }
    }

    pub fn credential_state(&self) -> CredentialState {
        self.model_settings().credential_state()
    }
}

fn read_field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str, slot: &mut T) {
    let Some(value) = map.get(key) else {
        return;
    };
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => *slot = decoded,
        Err(e) => warn!(field = key, error = %e, "ignoring malformed configuration value"),
    }
}

/// The part of the configuration the overlays need to pick a model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelSettings {
    pub choice: ModelChoice,
    pub api_key: Option<String>,
}

impl ModelSettings {
    /// Backend an overlay starts on.
    pub fn default_backend(&self) -> LookupBackend {
        match self.choice {
            ModelChoice::OnDevice => LookupBackend::OnDeviceModel,
            ModelChoice::Hosted(_) => LookupBackend::HostedModel,
        }
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn credential_state(&self) -> CredentialState {
        match (&self.choice, self.api_key()) {
            (ModelChoice::OnDevice, _) => CredentialState::NotRequired,
            (ModelChoice::Hosted(_), Some(_)) => CredentialState::Present,
            (ModelChoice::Hosted(_), None) => CredentialState::Missing,
        }
    }

    /// Provider for `backend`, or `None` when the hosted provider is chosen
    /// without a credential. The encyclopedia maps to the configured model.
    pub fn resolve(&self, backend: LookupBackend) -> Option<ModelBackend> {
        let backend = match backend {
            LookupBackend::Encyclopedia => self.default_backend(),
            other => other,
        };
        match backend {
            LookupBackend::HostedModel => {
                let model = match &self.choice {
                    ModelChoice::Hosted(id) => id.clone(),
                    ModelChoice::OnDevice => SmolStr::new_static(DEFAULT_HOSTED_MODEL),
                };
                Some(ModelBackend::Hosted {
                    model,
                    api_key: self.api_key()?.to_string(),
                })
            }
            _ => Some(ModelBackend::OnDevice),
        }
    }
}
