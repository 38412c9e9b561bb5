//! Runtime configuration
//!
//! Loaded from JSON. Every section and field is optional; durations are
//! human strings such as `"250ms"` or `"30s"`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use loom_composite::{BreakerConfig, CompositeConfig};
use loom_core::{ComponentConfig, DispatchConfig, DEFAULT_MAX_DEPTH};

use crate::{RuntimeError, RuntimeResult};

/// Top-level runtime configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub logging: LoggingConfig,
    pub dispatch: DispatchSection,
    pub breaker: BreakerSection,
    pub component: ComponentSection,
    pub flow: FlowSection,
    pub environment: EnvironmentSection,
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> RuntimeResult<Self> {
        serde_json::from_str(json).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
            .map_err(|e| RuntimeError::Config(format!("{}: {e}", path.display())))
    }

    pub fn to_json_string(&self) -> RuntimeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_depth: self.dispatch.max_depth,
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig::default()
            .with_threshold(self.breaker.failure_threshold)
            .with_window(self.breaker.window)
            .with_cool_down(self.breaker.cool_down)
    }

    pub fn component_config(&self) -> ComponentConfig {
        ComponentConfig {
            failure_threshold: self.component.failure_threshold,
            grace_period: self.component.grace_period,
        }
    }

    pub fn composite_config(&self) -> CompositeConfig {
        CompositeConfig {
            breaker: self.breaker_config(),
            fail_fast: self.flow.fail_fast,
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `LOOM_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub max_depth: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    #[serde(with = "duration_str")]
    pub window: Duration,
    #[serde(with = "duration_str")]
    pub cool_down: Duration,
}

impl Default for BreakerSection {
    fn default() -> Self {
        let defaults = BreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            window: defaults.window,
            cool_down: defaults.cool_down,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentSection {
    pub failure_threshold: u32,
    #[serde(with = "option_duration_str")]
    pub grace_period: Option<Duration>,
}

impl Default for ComponentSection {
    fn default() -> Self {
        let defaults = ComponentConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            grace_period: defaults.grace_period,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSection {
    pub fail_fast: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSection {
    /// Environment id; the host name is used when unset
    pub id: Option<String>,
    /// Extra facts recorded in every root identity
    pub parameters: BTreeMap<String, String>,
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod option_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.collect_str(&humantime::format_duration(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
