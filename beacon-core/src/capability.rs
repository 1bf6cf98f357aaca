//! Capability descriptor and job requirements.
//!
//! Capabilities are self-reported by each peer and never verified here.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// What a peer claims it can serve: a fixed typed core plus free-form extensions.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Model identifiers this peer can run. Matched exactly.
    #[serde(default)]
    pub models: BTreeSet<String>,
    #[serde(default)]
    pub gpu: bool,
    /// Inference provider tag (e.g. "ollama", "vllm").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Interface tag (e.g. "openai-chat").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

impl Capabilities {
    pub fn with_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.contains(model)
    }
}

/// A job to be placed. `payload_refs` are opaque references into the object store.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobRequirement {
    pub model: String,
    /// `Some(true)` requires a GPU peer; `Some(false)` and `None` accept any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<bool>,
    #[serde(default)]
    pub payload_refs: Vec<String>,
}

impl JobRequirement {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn require_gpu(mut self) -> Self {
        self.gpu = Some(true);
        self
    }

    pub fn is_satisfied_by(&self, caps: &Capabilities) -> bool {
        if !caps.supports_model(&self.model) {
            return false;
        }
        if self.gpu == Some(true) && !caps.gpu {
            return false;
        }
        true
    }
}

/// List-query predicate over capabilities. Unset fields match anything.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CapabilityFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl CapabilityFilter {
    pub fn matches(&self, caps: &Capabilities) -> bool {
        if let Some(model) = &self.model {
            if !caps.supports_model(model) {
                return false;
            }
        }
        if let Some(gpu) = self.gpu {
            if caps.gpu != gpu {
                return false;
            }
        }
        if let Some(provider) = &self.provider {
            if caps.provider.as_deref() != Some(provider.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.gpu.is_none() && self.provider.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_must_match_exactly() {
        let caps = Capabilities::with_models(["gpt-x"]);
        assert!(JobRequirement::model("gpt-x").is_satisfied_by(&caps));
        assert!(!JobRequirement::model("gpt-x2").is_satisfied_by(&caps));
        assert!(!JobRequirement::model("GPT-X").is_satisfied_by(&caps));
    }

    #[test]
    fn gpu_requirement() {
        let cpu = Capabilities::with_models(["m"]);
        let gpu = Capabilities::with_models(["m"]).gpu(true);
        let req = JobRequirement::model("m").require_gpu();
        assert!(!req.is_satisfied_by(&cpu));
        assert!(req.is_satisfied_by(&gpu));

        let any = JobRequirement {
            gpu: Some(false),
            ..JobRequirement::model("m")
        };
        assert!(any.is_satisfied_by(&cpu));
        assert!(any.is_satisfied_by(&gpu));
    }

    #[test]
    fn filter_unset_fields_match_all() {
        let caps = Capabilities::with_models(["a"]);
        assert!(CapabilityFilter::default().matches(&caps));
    }

    #[test]
    fn filter_checks_provider_and_gpu() {
        let mut caps = Capabilities::with_models(["a"]).gpu(true);
        caps.provider = Some("ollama".into());
        let f = CapabilityFilter {
            provider: Some("ollama".into()),
            gpu: Some(true),
            ..Default::default()
        };
        assert!(f.matches(&caps));
        let f = CapabilityFilter {
            gpu: Some(false),
            ..Default::default()
        };
        assert!(!f.matches(&caps));
    }

    #[test]
    fn capabilities_deserialize_with_missing_fields() {
        let caps: Capabilities = serde_json::from_str(r#"{"models":["m1"]}"#).unwrap();
        assert!(caps.supports_model("m1"));
        assert!(!caps.gpu);
        assert!(caps.extensions.is_empty());
    }
}
