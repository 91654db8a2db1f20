//! Core record definitions for both memory tiers.
//!
//! Defines [`FileOperation`] (the kinds of file access an agent performs),
//! [`PatternKind`] (the tag on a learned pattern), [`Payload`] (a validated
//! JSON object used for patterns, preferences and snippet context), and the
//! records stored in the persisted document.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::MemoryError;

/// A kind of file access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Read,
    Write,
    Delete,
    Clear,
    /// In-place edit replacing one fragment with another.
    Patch,
}

impl FileOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Clear => "clear",
            Self::Patch => "patch",
        }
    }

    /// Whether the operation changes or removes file content.
    pub fn is_destructive(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileOperation {
    type Err = MemoryError;

    /// Accepts the short names as well as the agent's tool names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" | "read_file" => Ok(Self::Read),
            "write" | "write_file" => Ok(Self::Write),
            "delete" | "delete_file" => Ok(Self::Delete),
            "clear" | "clear_file_content" => Ok(Self::Clear),
            "patch" | "apply_code_change" => Ok(Self::Patch),
            _ => Err(MemoryError::UnknownVariant {
                kind: "file operation",
                value: s.to_string(),
            }),
        }
    }
}

/// Tag on a [`ProjectPattern`]. Well-known shapes get their own variant;
/// anything else is carried as [`PatternKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatternKind {
    FileModification,
    FileOperation,
    ToolUsage,
    SuccessfulFix,
    Other(String),
}

impl PatternKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::FileModification => "file_modification",
            Self::FileOperation => "file_operation",
            Self::ToolUsage => "tool_usage",
            Self::SuccessfulFix => "successful_fix",
            Self::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for PatternKind {
    fn from(s: &str) -> Self {
        match s {
            "file_modification" => Self::FileModification,
            "file_operation" => Self::FileOperation,
            "tool_usage" => Self::ToolUsage,
            "successful_fix" => Self::SuccessfulFix,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for PatternKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PatternKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PatternKind::from(s.as_str()))
    }
}

/// A free-form JSON object, validated at the persistent-memory boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an arbitrary JSON value as a payload.
    ///
    /// Must be an object whose keys are non-empty.
    pub fn from_value(value: Value) -> Result<Self, MemoryError> {
        match value {
            Value::Object(map) => {
                if map.keys().any(|k| k.trim().is_empty()) {
                    return Err(MemoryError::InvalidPayload("empty key".into()));
                }
                Ok(Self(map))
            }
            other => Err(MemoryError::InvalidPayload(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Payload describing a repeated file operation on a file type.
    pub fn file_operation(operation: FileOperation, file_type: &str) -> Self {
        Self::new()
            .with("operation", operation.as_str())
            .with("file_type", file_type)
    }

    /// Payload describing a tool.
    pub fn tool_usage(tool: &str) -> Self {
        Self::new().with("tool", tool)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every key/value pair of `criteria` appears in this payload.
    pub fn matches(&self, criteria: &Payload) -> bool {
        criteria
            .0
            .iter()
            .all(|(key, expected)| self.0.get(key) == Some(expected))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Value> for Payload {
    type Error = MemoryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Extension used to group files of the same kind, e.g. `".rs"`.
pub fn file_type_of(filepath: &str) -> String {
    Path::new(filepath)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| "no_extension".to_string())
}

/// SHA-256 digest and byte length of a piece of file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentFingerprint {
    pub sha256: String,
    pub size: u64,
}

impl ContentFingerprint {
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        Self {
            sha256: hex::encode(digest),
            size: content.len() as u64,
        }
    }
}

/// One file access, appended to the durable log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAccessRecord {
    pub filepath: String,
    pub operation: FileOperation,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hex digest of the content at the time of access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate statistics for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUsageStat {
    pub invocations: u64,
    pub successes: u64,
    pub total_duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Caller-supplied context of the most recent invocation that carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_context: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl ToolUsageStat {
    /// `successes / invocations`, clamped to `[0, 1]`. Zero when never invoked.
    pub fn effectiveness(&self) -> f64 {
        if self.invocations == 0 {
            return 0.0;
        }
        (self.successes as f64 / self.invocations as f64).clamp(0.0, 1.0)
    }

    pub fn average_duration_secs(&self) -> Option<f64> {
        (self.invocations > 0).then(|| self.total_duration_secs / self.invocations as f64)
    }
}

/// A recurring shape of behaviour observed in a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPattern {
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    /// Time of the latest occurrence.
    pub timestamp: DateTime<Utc>,
    pub occurrences: u64,
}

/// Latest value for a preference category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub payload: Payload,
    pub updated_at: DateTime<Utc>,
}

/// An approach that worked, scored by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessPattern {
    pub label: String,
    pub payload: Payload,
    /// Always within `[0, 1]`.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Payload>,
    pub timestamp: DateTime<Utc>,
}

/// A stored code fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub id: u64,
    pub content: String,
    #[serde(rename = "type")]
    pub snippet_type: String,
    #[serde(default)]
    pub context: Payload,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    pub timestamp: DateTime<Utc>,
}
