//! Policy configuration and gate decisions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::{RunId, RunTag};

/// A named set of policies evaluated together by one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBundle {
    /// Bundle name; becomes the run tag of the run that evaluates it.
    pub tag: RunTag,
    /// Policy document ids, concatenated in order to form the gate's policy text.
    pub policy_ids: Vec<String>,
}

impl PolicyBundle {
    /// Create a bundle.
    pub fn new(tag: impl Into<RunTag>, policy_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tag: tag.into(),
            policy_ids: policy_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// The policy sets for one turn: one bundle normally, several in compare mode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Bundles to evaluate, each in its own run.
    #[serde(default)]
    pub policy_bundles: Vec<PolicyBundle>,
}

impl RunConfig {
    /// A config with a single bundle.
    pub fn single(bundle: PolicyBundle) -> Self {
        Self {
            policy_bundles: vec![bundle],
        }
    }

    /// Whether this config runs more than one bundle.
    pub fn is_compare(&self) -> bool {
        self.policy_bundles.len() > 1
    }

    /// Whether no bundle is configured.
    pub fn is_empty(&self) -> bool {
        self.policy_bundles.is_empty()
    }

    /// Check bundle count, tag uniqueness and that every bundle names a policy.
    pub fn validate(&self, max_bundles: usize) -> Result<(), String> {
        if self.policy_bundles.is_empty() {
            return Err("run config has no policy bundles".into());
        }
        if self.policy_bundles.len() > max_bundles {
            return Err(format!(
                "run config has {} bundles, at most {max_bundles} allowed",
                self.policy_bundles.len()
            ));
        }
        let mut seen = HashSet::with_capacity(self.policy_bundles.len());
        for bundle in &self.policy_bundles {
            if bundle.tag.as_str().trim().is_empty() {
                return Err("bundle tag must not be empty".into());
            }
            if !seen.insert(bundle.tag.as_str()) {
                return Err(format!("duplicate bundle tag: {}", bundle.tag));
            }
            if bundle.policy_ids.is_empty() {
                return Err(format!("bundle {} has no policy ids", bundle.tag));
            }
        }
        Ok(())
    }
}

/// Terminal artifact of a gate run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the task agent may run.
    pub allow: bool,
    /// Free-text justification from the gate agent.
    pub rationale: String,
    /// The run that produced this decision.
    pub run_id: RunId,
    /// Tag of the bundle the run evaluated.
    pub run_tag: RunTag,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_inbound_shape() {
        let config: RunConfig = serde_json::from_value(json!({
            "policy_bundles": [
                {"tag": "strict", "policy_ids": ["no-violence", "no-pii"]},
                {"tag": "lenient", "policy_ids": ["no-pii"]}
            ]
        }))
        .unwrap();
        assert!(config.is_compare());
        assert_eq!(config.policy_bundles[0].policy_ids.len(), 2);
        assert_eq!(config.policy_bundles[1].tag.as_str(), "lenient");
    }

    #[test]
    fn validate_rejects_empty() {
        assert!(RunConfig::default().validate(4).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_tags() {
        let config = RunConfig {
            policy_bundles: vec![
                PolicyBundle::new("a", ["p"]),
                PolicyBundle::new("a", ["q"]),
            ],
        };
        let err = config.validate(4).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn validate_rejects_too_many() {
        let config = RunConfig {
            policy_bundles: (0..3)
                .map(|i| PolicyBundle::new(format!("b{i}"), ["p"]))
                .collect(),
        };
        assert!(config.validate(2).is_err());
        assert!(config.validate(3).is_ok());
    }

    #[test]
    fn validate_rejects_bundle_without_policies() {
        let config = RunConfig::single(PolicyBundle::new("x", Vec::<String>::new()));
        let err = config.validate(1).unwrap_err();
        assert!(err.contains("no policy ids"));
    }

    #[test]
    fn validate_rejects_blank_tag() {
        let config = RunConfig::single(PolicyBundle::new("  ", ["p"]));
        assert!(config.validate(1).is_err());
    }

    #[test]
    fn decision_serializes_camel_case() {
        let decision = Decision {
            allow: true,
            rationale: "benign request".into(),
            run_id: RunId::from_string("run_1"),
            run_tag: RunTag::default_tag(),
        };
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["runId"], "run_1");
        assert_eq!(value["runTag"], "default");
    }
}
