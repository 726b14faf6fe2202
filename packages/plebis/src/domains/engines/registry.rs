//! Static catalogue of the optional feature engines.

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;

/// Dependency every engine may name; always available.
pub const CORE_DEPENDENCY: &str = "User";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineInfo {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub version: &'static str,
    pub models: &'static [&'static str],
    pub dependencies: &'static [&'static str],
    #[serde(skip)]
    config: fn() -> JsonValue,
}

impl EngineInfo {
    pub fn default_config(&self) -> JsonValue {
        (self.config)()
    }
}

pub static ENGINES: [EngineInfo; 9] = [
    EngineInfo {
        key: "plebis_cms",
        name: "Content Management",
        description: "Blog posts, pages, and notifications",
        version: "1.0.0",
        models: &["Post", "Category", "Page", "Notice", "NoticeRegistrar"],
        dependencies: &[CORE_DEPENDENCY],
        config: || json!({"wordpress_api_enabled": false, "push_notifications_enabled": true}),
    },
    EngineInfo {
        key: "plebis_participation",
        name: "Participation Teams",
        description: "Citizen participation teams and working groups",
        version: "1.0.0",
        models: &["ParticipationTeam"],
        dependencies: &[CORE_DEPENDENCY],
        config: || json!({}),
    },
    EngineInfo {
        key: "plebis_proposals",
        name: "Citizen Proposals",
        description: "Citizen proposal submission and support system",
        version: "1.0.0",
        models: &["Proposal", "Support"],
        dependencies: &[CORE_DEPENDENCY],
        config: || json!({"reddit_integration_enabled": false}),
    },
    EngineInfo {
        key: "plebis_impulsa",
        name: "Impulsa Projects",
        description: "Citizen project submission and evaluation platform",
        version: "1.0.0",
        models: &[
            "ImpulsaEdition",
            "ImpulsaEditionCategory",
            "ImpulsaEditionTopic",
            "ImpulsaProject",
            "ImpulsaProjectStateTransition",
            "ImpulsaProjectTopic",
        ],
        dependencies: &[CORE_DEPENDENCY],
        config: || {
            json!({
                "max_file_size_mb": 10,
                "allowed_file_types": ["pdf", "doc", "docx"],
                "evaluation_enabled": true
            })
        },
    },
    EngineInfo {
        key: "plebis_verification",
        name: "User Verification",
        description: "Identity verification system with document and SMS validation",
        version: "1.0.0",
        models: &["UserVerification"],
        dependencies: &[CORE_DEPENDENCY],
        config: || {
            json!({
                "sms_verification_enabled": true,
                "document_verification_enabled": true,
                "require_photos": true
            })
        },
    },
    EngineInfo {
        key: "plebis_voting",
        name: "Electronic Voting",
        description: "Democratic voting system with electronic and paper ballots",
        version: "1.0.0",
        models: &[
            "Election",
            "ElectionLocation",
            "ElectionLocationQuestion",
            "Vote",
            "VoteCircle",
            "VoteCircleType",
        ],
        dependencies: &[CORE_DEPENDENCY, "plebis_verification"],
        config: || {
            json!({
                "nvotes_api_url": "",
                "allow_paper_voting": true,
                "sms_verification_required": true
            })
        },
    },
    EngineInfo {
        key: "plebis_microcredit",
        name: "Microcréditos",
        description: "Microcredit campaign management and loan tracking",
        version: "1.0.0",
        models: &["Microcredit", "MicrocreditLoan", "MicrocreditOption"],
        dependencies: &[CORE_DEPENDENCY],
        config: || json!({"allow_renewals": true, "max_loan_amount": 10000}),
    },
    EngineInfo {
        key: "plebis_collaborations",
        name: "Colaboraciones",
        description: "Economic collaboration and donation management",
        version: "1.0.0",
        models: &["Collaboration", "Order"],
        dependencies: &[CORE_DEPENDENCY],
        config: || json!({"payment_gateway": "redsys", "sepa_enabled": true, "min_amount": 3}),
    },
    EngineInfo {
        key: "plebis_militant",
        name: "Gestión de Militancia",
        description: "Militant status tracking and management",
        version: "1.0.0",
        models: &["MilitantRecord"],
        dependencies: &[CORE_DEPENDENCY, "plebis_collaborations", "plebis_verification"],
        config: || json!({"min_militant_amount": 3, "external_api_enabled": true}),
    },
];

pub fn available_engines() -> Vec<&'static str> {
    ENGINES.iter().map(|e| e.key).collect()
}

pub fn info(key: &str) -> Option<&'static EngineInfo> {
    ENGINES.iter().find(|e| e.key == key)
}

pub fn exists(key: &str) -> bool {
    info(key).is_some()
}

pub fn dependencies_for(key: &str) -> &'static [&'static str] {
    info(key).map(|e| e.dependencies).unwrap_or(&[])
}

/// Engines listing `key` among their dependencies
pub fn dependents_of(key: &str) -> Vec<&'static str> {
    ENGINES
        .iter()
        .filter(|e| e.dependencies.contains(&key))
        .map(|e| e.key)
        .collect()
}

/// `{}` for unknown engines.
pub fn default_config(key: &str) -> JsonValue {
    info(key).map_or_else(|| json!({}), EngineInfo::default_config)
}

/// Whether every dependency of `key` other than the core one is among
/// `enabled`.
pub fn dependencies_met(key: &str, enabled: &HashSet<String>) -> bool {
    dependencies_for(key)
        .iter()
        .all(|dep| *dep == CORE_DEPENDENCY || enabled.contains(*dep))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_nine_engines() {
        let engines = available_engines();
        assert_eq!(engines.len(), 9);
        assert!(engines.contains(&"plebis_voting"));
        assert!(exists("plebis_cms"));
        assert!(!exists("plebis_unknown"));
    }

    #[test]
    fn dependency_graph() {
        assert_eq!(dependencies_for("plebis_voting"), ["User", "plebis_verification"]);
        assert!(dependencies_for("missing").is_empty());
        assert_eq!(dependents_of("plebis_verification"), vec!["plebis_voting", "plebis_militant"]);
        assert_eq!(dependents_of("plebis_collaborations"), vec!["plebis_militant"]);
        assert!(dependents_of("plebis_cms").is_empty());
    }

    #[test]
    fn default_configs() {
        assert_eq!(default_config("plebis_microcredit")["max_loan_amount"], 10000);
        assert_eq!(default_config("plebis_participation"), json!({}));
        assert_eq!(default_config("missing"), json!({}));
    }

    #[test]
    fn core_dependency_is_always_met() {
        let mut enabled = HashSet::new();
        assert!(dependencies_met("plebis_cms", &enabled));
        assert!(!dependencies_met("plebis_militant", &enabled));

        enabled.insert("plebis_verification".to_string());
        assert!(dependencies_met("plebis_voting", &enabled));
        assert!(!dependencies_met("plebis_militant", &enabled));
        enabled.insert("plebis_collaborations".to_string());
        assert!(dependencies_met("plebis_militant", &enabled));
    }

    #[test]
    fn info_serializes_without_config_fn() {
        let value = serde_json::to_value(info("plebis_cms").unwrap()).unwrap();
        assert_eq!(value["name"], "Content Management");
        assert!(value.get("config").is_none());
    }
}
