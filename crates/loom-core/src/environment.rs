//! Environment descriptor handed to component creation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConfigSource;

/// Where a component is born: an environment id plus free-form facts.
///
/// The id participates in identity derivation. Facts are copied into the
/// context of every root identity created against this environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    id: String,
    #[serde(default)]
    facts: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            facts: BTreeMap::new(),
        }
    }

    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    /// Capture an environment from a configuration port
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        Self {
            id: source.environment_id(),
            facts: source.facts(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    pub fn facts(&self) -> &BTreeMap<String, String> {
        &self.facts
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource;

    impl ConfigSource for FixedSource {
        fn environment_id(&self) -> String {
            "staging".to_string()
        }

        fn facts(&self) -> BTreeMap<String, String> {
            BTreeMap::from([("region".to_string(), "eu-west".to_string())])
        }
    }

    #[test]
    fn test_environment_facts() {
        let env = Environment::new("prod").with_fact("zone", "a");
        assert_eq!(env.id(), "prod");
        assert_eq!(env.fact("zone"), Some("a"));
        assert_eq!(env.fact("missing"), None);
    }

    #[test]
    fn test_environment_from_source() {
        let env = Environment::from_source(&FixedSource);
        assert_eq!(env.id(), "staging");
        assert_eq!(env.fact("region"), Some("eu-west"));
    }
}
