//! Kubernetes object shapes shared by every resource the controller touches.
//!
//! Only the fields the controller reads or writes are modelled; everything
//! else on Tekton objects is preserved through flattened maps in
//! [`crate::tekton`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    /// Metadata with only a name and namespace set.
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// `namespace/name` key used by queues and logs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Reference from a dependent object to its owner, used for garbage
/// collection of auto-created secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// A Knative-style status condition as written by Tekton.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    /// `True`, `False` or `Unknown`.
    pub status: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// The `Succeeded` condition type used by Tekton runs.
    pub const SUCCEEDED: &'static str = "Succeeded";

    /// Builds a `Succeeded` condition.
    pub fn succeeded(status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_: Self::SUCCEEDED.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Some(Utc::now()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    pub fn is_false(&self) -> bool {
        self.status == "False"
    }

    pub fn is_unknown(&self) -> bool {
        self.status == "Unknown"
    }
}

/// Finds the `Succeeded` condition in a condition list.
pub fn succeeded_condition(conditions: &[Condition]) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == Condition::SUCCEEDED)
}

/// Core v1 Secret; values are stored decoded in `string_data` form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    #[serde(default = "Secret::api_version")]
    pub api_version: String,

    #[serde(default = "Secret::kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    /// Base64 encoded values, as returned by the API server.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,

    /// Plain values, used when creating secrets.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,

    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_: String,
}

impl Secret {
    fn api_version() -> String {
        "v1".to_string()
    }

    fn kind() -> String {
        "Secret".to_string()
    }

    /// Creates an opaque secret with plain-text values.
    pub fn new(meta: ObjectMeta, string_data: BTreeMap<String, String>) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata: meta,
            data: BTreeMap::new(),
            string_data,
            type_: "Opaque".to_string(),
        }
    }

    /// Reads a key, preferring plain values and decoding base64 data.
    pub fn value(&self, key: &str) -> Option<String> {
        use base64::Engine as _;

        if let Some(v) = self.string_data.get(key) {
            return Some(v.clone());
        }
        let encoded = self.data.get(key)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        String::from_utf8(decoded).ok()
    }
}

/// Core v1 ConfigMap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    pub metadata: ObjectMeta,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Severity of a Kubernetes event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// A Kubernetes event attached to a Repository, forming the user-visible
/// event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEvent {
    pub namespace: String,
    pub repository: String,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}
