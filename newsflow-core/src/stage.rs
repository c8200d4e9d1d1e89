//! ABOUTME: Stage descriptors and the static workflow-type catalog
//! ABOUTME: Routing authority for a stage lives here, never in a worker

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether a completed stage produces one downstream task or one per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanOut {
    /// One downstream task, carrying the whole `stage_output` as payload.
    Unit,
    /// One downstream task per item in `stage_output[items_key]`.
    PerItem,
}

/// One named step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub routing_key: String,
    pub fan_out: FanOut,
    /// Key into `stage_output` enumerated when `fan_out == PerItem`.
    pub items_key: Option<String>,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Stage {
    #[must_use]
    pub fn extraction() -> Self {
        Self {
            name: "extraction".to_string(),
            routing_key: "extraction".to_string(),
            fan_out: FanOut::Unit,
            items_key: None,
            max_attempts: 3,
            timeout: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn transformation() -> Self {
        Self {
            name: "transformation".to_string(),
            routing_key: "transformation".to_string(),
            fan_out: FanOut::PerItem,
            items_key: Some("article_ids".to_string()),
            max_attempts: 3,
            timeout: Duration::from_secs(120),
        }
    }

    #[must_use]
    pub fn verification() -> Self {
        Self {
            name: "verification".to_string(),
            routing_key: "verification".to_string(),
            fan_out: FanOut::Unit,
            items_key: None,
            max_attempts: 3,
            timeout: Duration::from_secs(60),
        }
    }

    /// Resolve a canonical stage name to its descriptor.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "extraction" => Some(Self::extraction()),
            "transformation" => Some(Self::transformation()),
            "verification" => Some(Self::verification()),
            _ => None,
        }
    }
}

/// The static `workflow_type -> [Stage]` table from the orchestrator contract.
///
/// This is the one place routing authority lives: workers never choose the
/// next queue, they only report `produced_by`.
#[must_use]
pub fn stages_for_workflow_type(workflow_type: &str) -> Option<Vec<Stage>> {
    match workflow_type {
        "extract" => Some(vec![Stage::extraction()]),
        "extract_transform" => Some(vec![Stage::extraction(), Stage::transformation()]),
        "transform_only" => Some(vec![Stage::transformation()]),
        "verify" => Some(vec![Stage::verification()]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_workflow_types_resolve() {
        assert_eq!(stages_for_workflow_type("extract").unwrap().len(), 1);
        assert_eq!(
            stages_for_workflow_type("extract_transform").unwrap().len(),
            2
        );
        assert_eq!(stages_for_workflow_type("transform_only").unwrap().len(), 1);
        assert_eq!(stages_for_workflow_type("verify").unwrap().len(), 1);
    }

    #[test]
    fn unknown_workflow_type_is_none() {
        assert!(stages_for_workflow_type("bogus").is_none());
    }

    #[test]
    fn transformation_is_per_item_over_article_ids() {
        let stage = Stage::transformation();
        assert_eq!(stage.fan_out, FanOut::PerItem);
        assert_eq!(stage.items_key.as_deref(), Some("article_ids"));
    }
}
