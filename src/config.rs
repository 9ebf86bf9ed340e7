//! Strongly-typed configuration for the sidebar runtime.
//!
//! Values can be constructed from defaults, loaded from environment variables
//! (with optional `.env` support), or merged with explicit overrides. The
//! defaults target the Google AI Studio chat page.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

use crate::tree::{Selector, SelectorError};

/// Verbosity level for sidebar logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Minimal,
    #[default]
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Selectors describing where the host page keeps the things we watch.
#[derive(Debug, Clone, PartialEq, Eq, DeriveSerialize, DeriveDeserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostSelectors {
    /// The run/stop control whose state proxies "agent is generating".
    pub control: String,
    pub control_label: String,
    pub stop_icon: String,
    pub spinner_icon: String,
    /// Subtrees to observe for mutations, most specific first. The whole
    /// document is used when none match.
    pub watch_scopes: Vec<String>,
    pub turn: String,
    /// Presence of this element marks a turn as holding agent output.
    pub output_marker: String,
    /// Every node shape that may carry code output.
    pub candidates: String,
    /// Host-specific code block element, read with its own strategy.
    pub code_block: String,
    /// Inner nodes preferred as the text source of a host code block.
    pub code_block_text: Vec<String>,
}

impl Default for HostSelectors {
    fn default() -> Self {
        Self {
            control: "run-button button".to_string(),
            control_label: "span.label".to_string(),
            stop_icon: "svg rect.stoppable-stop".to_string(),
            spinner_icon: "svg circle.stoppable-spinner".to_string(),
            watch_scopes: vec![
                "div.button-wrapper run-button".to_string(),
                "ms-composer-send-controls".to_string(),
            ],
            turn: "ms-chat-turn".to_string(),
            output_marker: "ms-code-block".to_string(),
            candidates: "ms-code-block, pre code, .code-block code, pre, code".to_string(),
            code_block: "ms-code-block".to_string(),
            code_block_text: vec!["pre".to_string(), "code".to_string()],
        }
    }
}

/// Parsed form of [`HostSelectors`].
#[derive(Debug, Clone)]
pub struct CompiledSelectors {
    pub control: Selector,
    pub control_label: Selector,
    pub stop_icon: Selector,
    pub spinner_icon: Selector,
    pub watch_scopes: Vec<Selector>,
    pub turn: Selector,
    pub output_marker: Selector,
    pub candidates: Selector,
    pub code_block: Selector,
    pub code_block_text: Vec<Selector>,
}

impl HostSelectors {
    pub fn compile(&self) -> Result<CompiledSelectors, SidebarConfigError> {
        let parse = |field: &'static str, value: &str| {
            Selector::parse(value).map_err(|source| SidebarConfigError::InvalidSelector {
                field,
                value: value.to_string(),
                source,
            })
        };

        Ok(CompiledSelectors {
            control: parse("control", &self.control)?,
            control_label: parse("controlLabel", &self.control_label)?,
            stop_icon: parse("stopIcon", &self.stop_icon)?,
            spinner_icon: parse("spinnerIcon", &self.spinner_icon)?,
            watch_scopes: self
                .watch_scopes
                .iter()
                .map(|value| parse("watchScopes", value))
                .collect::<Result<_, _>>()?,
            turn: parse("turn", &self.turn)?,
            output_marker: parse("outputMarker", &self.output_marker)?,
            candidates: parse("candidates", &self.candidates)?,
            code_block: parse("codeBlock", &self.code_block)?,
            code_block_text: self
                .code_block_text
                .iter()
                .map(|value| parse("codeBlockText", value))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Labels the control shows when it is ready to start a new run.
pub fn default_run_labels() -> Vec<String> {
    ["run", "senden", "regenerate", "ausführen", "submit", "neu generieren"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Configuration values for the sidebar runtime.
#[derive(DeriveSerialize, DeriveDeserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SidebarConfig {
    pub verbose: Verbosity,
    #[serde(alias = "inspectDebounceMs")]
    pub inspect_debounce_ms: u64,
    #[serde(alias = "settleDelayMs")]
    pub settle_delay_ms: u64,
    #[serde(alias = "startupGraceMs")]
    pub startup_grace_ms: u64,
    #[serde(alias = "previewLines")]
    pub preview_lines: usize,
    #[serde(alias = "minItemChars")]
    pub min_item_chars: usize,
    #[serde(alias = "copyFeedbackMs")]
    pub copy_feedback_ms: u64,
    #[serde(alias = "pollIntervalMs")]
    pub poll_interval_ms: u64,
    #[serde(alias = "runLabels")]
    pub run_labels: Vec<String>,
    #[serde(alias = "clipboardCommand")]
    pub clipboard_command: Option<String>,
    pub selectors: HostSelectors,
}

impl Default for SidebarConfig {
    fn default() -> Self {
        SidebarConfig {
            verbose: Verbosity::default(),
            inspect_debounce_ms: 150,
            settle_delay_ms: 350,
            startup_grace_ms: 2_500,
            preview_lines: 5,
            min_item_chars: 10,
            copy_feedback_ms: 1_500,
            poll_interval_ms: 100,
            run_labels: default_run_labels(),
            clipboard_command: None,
            selectors: HostSelectors::default(),
        }
    }
}

impl SidebarConfig {
    /// Construct a configuration by reading `CODE_SIDEBAR_*` environment
    /// variables, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, SidebarConfigError> {
        let _ = dotenv();
        let mut config = SidebarConfig::default();

        if let Some(value) = env_var("CODE_SIDEBAR_VERBOSE") {
            let parsed = parse_u64("CODE_SIDEBAR_VERBOSE", &value)?;
            config.verbose = u8::try_from(parsed)
                .ok()
                .and_then(Verbosity::from_u8)
                .ok_or_else(|| SidebarConfigError::InvalidVerbosity(value.clone()))?;
        }

        if let Some(value) = env_var("CODE_SIDEBAR_INSPECT_DEBOUNCE_MS") {
            config.inspect_debounce_ms = parse_u64("CODE_SIDEBAR_INSPECT_DEBOUNCE_MS", &value)?;
        }

        if let Some(value) = env_var("CODE_SIDEBAR_SETTLE_DELAY_MS") {
            config.settle_delay_ms = parse_u64("CODE_SIDEBAR_SETTLE_DELAY_MS", &value)?;
        }

        if let Some(value) = env_var("CODE_SIDEBAR_STARTUP_GRACE_MS") {
            config.startup_grace_ms = parse_u64("CODE_SIDEBAR_STARTUP_GRACE_MS", &value)?;
        }

        if let Some(value) = env_var("CODE_SIDEBAR_PREVIEW_LINES") {
            config.preview_lines = parse_u64("CODE_SIDEBAR_PREVIEW_LINES", &value)? as usize;
        }

        if let Some(value) = env_var("CODE_SIDEBAR_MIN_ITEM_CHARS") {
            config.min_item_chars = parse_u64("CODE_SIDEBAR_MIN_ITEM_CHARS", &value)? as usize;
        }

        if let Some(value) = env_var("CODE_SIDEBAR_COPY_FEEDBACK_MS") {
            config.copy_feedback_ms = parse_u64("CODE_SIDEBAR_COPY_FEEDBACK_MS", &value)?;
        }

        if let Some(value) = env_var("CODE_SIDEBAR_POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse_u64("CODE_SIDEBAR_POLL_INTERVAL_MS", &value)?;
        }

        if let Some(value) = env_var("CODE_SIDEBAR_RUN_LABELS") {
            config.run_labels = value
                .split(',')
                .map(|label| label.trim().to_lowercase())
                .filter(|label| !label.is_empty())
                .collect();
        }

        if let Some(value) = env_var("CODE_SIDEBAR_CLIPBOARD_COMMAND") {
            config.clipboard_command = Some(value);
        }

        if let Some(value) = env_var("CODE_SIDEBAR_SELECTORS") {
            config.selectors = merge_selectors(&config.selectors, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: SidebarConfigOverrides) -> SidebarConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }
        if let Some(value) = overrides.inspect_debounce_ms {
            next.inspect_debounce_ms = value;
        }
        if let Some(value) = overrides.settle_delay_ms {
            next.settle_delay_ms = value;
        }
        if let Some(value) = overrides.startup_grace_ms {
            next.startup_grace_ms = value;
        }
        if let Some(value) = overrides.preview_lines {
            next.preview_lines = value;
        }
        if let Some(value) = overrides.min_item_chars {
            next.min_item_chars = value;
        }
        if let Some(value) = overrides.clipboard_command {
            next.clipboard_command = value;
        }
        if let Some(value) = overrides.selectors {
            next.selectors = value;
        }

        next
    }

    pub fn validate(&self) -> Result<(), SidebarConfigError> {
        if self.preview_lines == 0 {
            return Err(SidebarConfigError::ZeroPreviewLines);
        }
        self.selectors.compile().map(|_| ())
    }

    pub fn inspect_debounce(&self) -> Duration {
        Duration::from_millis(self.inspect_debounce_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn copy_feedback(&self) -> Duration {
        Duration::from_millis(self.copy_feedback_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Field-level overrides for [`SidebarConfig::with_overrides`].
#[derive(Debug, Default, Clone)]
pub struct SidebarConfigOverrides {
    pub verbose: Option<Verbosity>,
    pub inspect_debounce_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub startup_grace_ms: Option<u64>,
    pub preview_lines: Option<usize>,
    pub min_item_chars: Option<usize>,
    pub clipboard_command: Option<Option<String>>,
    pub selectors: Option<HostSelectors>,
}

impl SidebarConfigOverrides {
    pub fn verbose(mut self, verbose: Verbosity) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn startup_grace_ms(mut self, value: u64) -> Self {
        self.startup_grace_ms = Some(value);
        self
    }

    pub fn clipboard_command<T: Into<Option<String>>>(mut self, command: T) -> Self {
        self.clipboard_command = Some(command.into());
        self
    }
}

impl fmt::Debug for SidebarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SidebarConfig")
            .field("verbose", &self.verbose)
            .field("inspect_debounce_ms", &self.inspect_debounce_ms)
            .field("settle_delay_ms", &self.settle_delay_ms)
            .field("startup_grace_ms", &self.startup_grace_ms)
            .field("preview_lines", &self.preview_lines)
            .field("min_item_chars", &self.min_item_chars)
            .field("copy_feedback_ms", &self.copy_feedback_ms)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("run_labels", &self.run_labels)
            .field("clipboard_command", &self.clipboard_command)
            .field("turn_selector", &self.selectors.turn)
            .finish()
    }
}

/// Errors that can arise while constructing a [`SidebarConfig`].
#[derive(Debug, Error)]
pub enum SidebarConfigError {
    #[error("invalid verbosity '{0}'; expected 0, 1, or 2")]
    InvalidVerbosity(String),
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{field} must be a JSON object")]
    InvalidJsonType { field: &'static str },
    #[error("invalid JSON for {field}: {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid selector '{value}' for {field}: {source}")]
    InvalidSelector {
        field: &'static str,
        value: String,
        #[source]
        source: SelectorError,
    },
    #[error("preview line count must be at least 1")]
    ZeroPreviewLines,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, SidebarConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| SidebarConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn merge_selectors(base: &HostSelectors, raw: &str) -> Result<HostSelectors, SidebarConfigError> {
    const FIELD: &str = "CODE_SIDEBAR_SELECTORS";
    let overrides: JsonValue = serde_json::from_str(raw)
        .map_err(|source| SidebarConfigError::InvalidJson { field: FIELD, source })?;
    let JsonValue::Object(overrides) = overrides else {
        return Err(SidebarConfigError::InvalidJsonType { field: FIELD });
    };

    let mut merged: JsonMap<String, JsonValue> = match serde_json::to_value(base) {
        Ok(JsonValue::Object(map)) => map,
        _ => JsonMap::new(),
    };
    merged.extend(overrides);
    serde_json::from_value(JsonValue::Object(merged))
        .map_err(|source| SidebarConfigError::InvalidJson { field: FIELD, source })
}
