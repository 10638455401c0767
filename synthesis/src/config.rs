//! Session configuration.
//!
//! A [`SessionConfig`] can be built in code with [`SessionConfig::builder`],
//! loaded from a YAML file, or read from the environment:
//!
//! ```yaml
//! region: westus
//! credential:
//!   type: subscription_key
//!   value: "0123456789abcdef"
//! voice_name: en-GB-HazelRUS
//! language: en-GB
//! output_format: audio-16khz-32kbitrate-mono-mp3
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::OutputFormat;

/// Environment variable holding the subscription key.
pub const ENV_SPEECH_KEY: &str = "SPEECH_KEY";
/// Environment variable holding the service region.
pub const ENV_SPEECH_REGION: &str = "SPEECH_REGION";

/// Default synthesis language.
pub const DEFAULT_LANGUAGE: &str = "en-US";
/// Default limit on input length, in characters.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 64 * 1024;

/// Backend credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Credential {
    /// Long-lived subscription key.
    SubscriptionKey(String),
    /// Short-lived bearer token, refreshed by the caller.
    AuthorizationToken(String),
}

impl Credential {
    /// Returns the secret value.
    pub fn secret(&self) -> &str {
        match self {
            Credential::SubscriptionKey(s) | Credential::AuthorizationToken(s) => s,
        }
    }

    fn is_empty(&self) -> bool {
        self.secret().trim().is_empty()
    }
}

// Secrets never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::SubscriptionKey(_) => f.write_str("SubscriptionKey(***)"),
            Credential::AuthorizationToken(_) => f.write_str("AuthorizationToken(***)"),
        }
    }
}

/// Shared, hot-swappable credential slot.
///
/// Clones share the same slot. Every [`set`](Self::set) bumps a version
/// number; the session compares it before each request and reconnects when
/// the credential changed since its connection was opened.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    inner: Arc<RwLock<Versioned>>,
}

#[derive(Debug)]
struct Versioned {
    credential: Credential,
    version: u64,
}

impl CredentialStore {
    pub fn new(credential: Credential) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Versioned {
                credential,
                version: 0,
            })),
        }
    }

    /// Returns a copy of the current credential.
    pub fn current(&self) -> Credential {
        self.inner.read().credential.clone()
    }

    /// Number of times the credential has been replaced.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Returns the current credential together with its version.
    pub fn snapshot(&self) -> (Credential, u64) {
        let inner = self.inner.read();
        (inner.credential.clone(), inner.version)
    }

    /// Replaces the credential.
    pub fn set(&self, credential: Credential) {
        let mut inner = self.inner.write();
        inner.credential = credential;
        inner.version += 1;
    }
}

/// Configuration of a [`SynthesisSession`](crate::SynthesisSession).
///
/// Everything except the credential is fixed once the session is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Service region (e.g. "westus").
    pub region: String,

    /// Custom endpoint, overriding the region default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Initial credential.
    pub credential: Credential,

    /// Voice name; empty selects the backend default for `language`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub voice_name: String,

    /// BCP-47 language tag.
    #[serde(default = "default_language")]
    pub language: String,

    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Longest accepted input, in characters.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}

impl SessionConfig {
    /// Creates a new configuration builder.
    pub fn builder(region: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(region)
    }

    /// Parses a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Builds a configuration from `SPEECH_KEY` and `SPEECH_REGION`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(ENV_SPEECH_KEY)
            .map_err(|_| Error::Config(format!("{ENV_SPEECH_KEY} is not set")))?;
        let region = std::env::var(ENV_SPEECH_REGION)
            .map_err(|_| Error::Config(format!("{ENV_SPEECH_REGION} is not set")))?;
        SessionConfig::builder(region).subscription_key(key).build()
    }

    /// Checks the configuration for obvious mistakes.
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() && self.endpoint.is_none() {
            return Err(Error::Config("region or endpoint must be non-empty".to_string()));
        }
        if self.credential.is_empty() {
            return Err(Error::Config("credential must be non-empty".to_string()));
        }
        if self.language.trim().is_empty() {
            return Err(Error::Config("language must be non-empty".to_string()));
        }
        if self.max_input_chars == 0 {
            return Err(Error::Config("max_input_chars must be positive".to_string()));
        }
        Ok(())
    }

    /// Serializes the configuration as YAML.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Builder for [`SessionConfig`].
pub struct SessionConfigBuilder {
    region: String,
    endpoint: Option<String>,
    credential: Option<Credential>,
    voice_name: String,
    language: String,
    output_format: std::result::Result<OutputFormat, String>,
    max_input_chars: usize,
}

impl SessionConfigBuilder {
    /// Creates a new builder.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            credential: None,
            voice_name: String::new(),
            language: default_language(),
            output_format: Ok(OutputFormat::default()),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    /// Authenticates with a subscription key.
    pub fn subscription_key(mut self, key: impl Into<String>) -> Self {
        self.credential = Some(Credential::SubscriptionKey(key.into()));
        self
    }

    /// Authenticates with a bearer token.
    pub fn authorization_token(mut self, token: impl Into<String>) -> Self {
        self.credential = Some(Credential::AuthorizationToken(token.into()));
        self
    }

    /// Sets a custom endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the voice name.
    pub fn voice_name(mut self, voice: impl Into<String>) -> Self {
        self.voice_name = voice.into();
        self
    }

    /// Sets the language tag.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Sets the output format by identifier, e.g. "audio-16khz-32kbitrate-mono-mp3".
    ///
    /// Unknown identifiers are reported by [`build`](Self::build).
    pub fn output_format(mut self, id: &str) -> Self {
        self.output_format = OutputFormat::parse(id).map_err(|_| id.to_string());
        self
    }

    /// Sets the input length limit in characters.
    pub fn max_input_chars(mut self, n: usize) -> Self {
        self.max_input_chars = n;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<SessionConfig> {
        let credential = self.credential.ok_or_else(|| {
            Error::Config("a subscription key or authorization token must be provided".to_string())
        })?;
        let output_format = self
            .output_format
            .map_err(|id| Error::Config(format!("unknown output format: {id:?}")))?;

        let config = SessionConfig {
            region: self.region,
            endpoint: self.endpoint,
            credential,
            voice_name: self.voice_name,
            language: self.language,
            output_format,
            max_input_chars: self.max_input_chars,
        };
        config.validate()?;
        Ok(config)
    }
}
