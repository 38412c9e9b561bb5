//! Host environment capture

use std::collections::BTreeMap;

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::debug;

use loom_core::ConfigSource;

use crate::EnvironmentSection;

/// Environment id used when neither configuration nor host name supply one
pub const FALLBACK_ENVIRONMENT: &str = "local";

/// Configuration source backed by host facts and configured parameters
#[derive(Clone, Debug)]
pub struct SystemConfigSource {
    id: String,
    facts: BTreeMap<String, String>,
}

impl SystemConfigSource {
    /// Capture host facts once; configured parameters override them
    pub fn capture(section: &EnvironmentSection) -> Self {
        let mut facts = host_facts();
        facts.extend(section.parameters.clone());

        let id = section
            .id
            .clone()
            .or_else(|| facts.get("host").cloned())
            .unwrap_or_else(|| FALLBACK_ENVIRONMENT.to_string());
        debug!(environment = %id, facts = facts.len(), "environment captured");
        Self { id, facts }
    }
}

impl ConfigSource for SystemConfigSource {
    fn environment_id(&self) -> String {
        self.id.clone()
    }

    fn facts(&self) -> BTreeMap<String, String> {
        self.facts.clone()
    }
}

fn host_facts() -> BTreeMap<String, String> {
    let mut facts = BTreeMap::new();
    let optional = [
        ("host", System::host_name()),
        ("os", System::name()),
        ("os_version", System::os_version()),
        ("kernel", System::kernel_version()),
        ("arch", System::cpu_arch()),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            facts.insert(key.to_string(), value);
        }
    }

    let system = System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
    facts.insert("cpus".to_string(), system.cpus().len().to_string());
    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_id_and_parameters_win() {
        let mut section = EnvironmentSection {
            id: Some("staging".into()),
            ..Default::default()
        };
        section.parameters.insert("host".into(), "pinned".into());
        section.parameters.insert("region".into(), "eu".into());

        let source = SystemConfigSource::capture(&section);
        assert_eq!(source.environment_id(), "staging");
        let facts = source.facts();
        assert_eq!(facts.get("host").map(String::as_str), Some("pinned"));
        assert_eq!(facts.get("region").map(String::as_str), Some("eu"));
        assert!(facts.contains_key("cpus"));
    }

    #[test]
    fn test_id_never_empty() {
        let source = SystemConfigSource::capture(&EnvironmentSection::default());
        assert!(!source.environment_id().is_empty());
    }
}
