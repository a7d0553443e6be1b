//! Core record types: memories, history entries, identifiers and owner scope.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::metadata::Metadata;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier of a memory record. Generated at insert, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(Uuid);

impl HistoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for HistoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Record
// ─────────────────────────────────────────────────────────────────────────────

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    /// Owner scope token; `None` is a global record.
    pub owner: Option<String>,
    pub text: String,
    /// Embedding vector, absent when no provider was available at write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Digest used for exact-match deduplication.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    /// Build a fresh record with a new id and current timestamps.
    pub fn new(owner: Option<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let now = now();
        let content_hash = content_hash(owner.as_deref(), &text);
        Self {
            id: MemoryId::new(),
            owner,
            text,
            embedding: None,
            metadata: Metadata::default(),
            content_hash,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = hash.into();
        self
    }

    /// Whether the record carries a soft-delete tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Compute the exact-match dedup digest for a text within an owner scope.
///
/// The owner and the text are separated by a unit separator so that
/// `("ab", "c")` and `("a", "bc")` never collide.
pub fn content_hash(owner: Option<&str>, text: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(owner) = owner {
        hasher.update(owner.as_bytes());
    }
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

// ─────────────────────────────────────────────────────────────────────────────
// History
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of mutation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    /// A new record was inserted.
    Add,
    /// Explicit update.
    Update,
    /// Ingest matched an existing record by embedding similarity.
    UpdateSemantic,
    /// Ingest matched an existing record by content hash.
    UpdateHash,
    /// Soft or hard delete.
    Delete,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::UpdateSemantic => "UPDATE_SEMANTIC",
            Self::UpdateHash => "UPDATE_HASH",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADD" => Some(Self::Add),
            "UPDATE" => Some(Self::Update),
            "UPDATE_SEMANTIC" => Some(Self::UpdateSemantic),
            "UPDATE_HASH" => Some(Self::UpdateHash),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryId,
    /// Subject record; may no longer exist after a hard delete.
    pub memory_id: MemoryId,
    /// Owner of the subject record when the entry was written.
    pub owner: Option<String>,
    pub action: HistoryAction,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    /// Action-specific payload (similarity score, delete mode, ...).
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    /// Set once the subject record has been hard-deleted.
    #[serde(default)]
    pub tombstoned: bool,
}

impl HistoryEntry {
    pub fn new(memory_id: MemoryId, owner: Option<String>, action: HistoryAction) -> Self {
        Self {
            id: HistoryId::new(),
            memory_id,
            owner,
            action,
            previous_value: None,
            new_value: None,
            metadata: Metadata::default(),
            created_at: now(),
            tombstoned: false,
        }
    }

    pub fn with_previous(mut self, value: impl Into<String>) -> Self {
        self.previous_value = Some(value.into());
        self
    }

    pub fn with_new(mut self, value: impl Into<String>) -> Self {
        self.new_value = Some(value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Owner Scope
// ─────────────────────────────────────────────────────────────────────────────

/// Which records a query may see or match, by owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerScope {
    /// Only global (`owner IS NULL`) records.
    Global,
    /// Only records of exactly this owner.
    Owner(String),
    /// This owner's records plus global records.
    OwnerOrGlobal(String),
    /// Every record regardless of owner.
    Any,
}

impl OwnerScope {
    /// Resolve a caller-supplied owner into a scope.
    ///
    /// Mirrors `owner IS NULL OR owner = query_owner` when
    /// `null_owner_universal` is set, and exact matching otherwise.
    pub fn resolve(owner: Option<&str>, null_owner_universal: bool) -> Self {
        match owner {
            None => Self::Global,
            Some(o) if null_owner_universal => Self::OwnerOrGlobal(o.to_string()),
            Some(o) => Self::Owner(o.to_string()),
        }
    }

    /// Scope matching exactly the given owner (global when `None`).
    pub fn exact(owner: Option<&str>) -> Self {
        match owner {
            None => Self::Global,
            Some(o) => Self::Owner(o.to_string()),
        }
    }

    /// SQL predicate over `column` with anonymous `?` placeholders, plus
    /// the parameters those placeholders bind to, in order.
    pub fn sql_clause(&self, column: &str) -> (String, Vec<String>) {
        match self {
            Self::Global => (format!("{column} IS NULL"), Vec::new()),
            Self::Owner(o) => (format!("{column} = ?"), vec![o.clone()]),
            Self::OwnerOrGlobal(o) => (
                format!("({column} IS NULL OR {column} = ?)"),
                vec![o.clone()],
            ),
            Self::Any => ("1 = 1".to_string(), Vec::new()),
        }
    }

    /// In-process equivalent of [`sql_clause`](Self::sql_clause).
    pub fn matches(&self, owner: Option<&str>) -> bool {
        match self {
            Self::Global => owner.is_none(),
            Self::Owner(o) => owner == Some(o.as_str()),
            Self::OwnerOrGlobal(o) => owner.is_none() || owner == Some(o.as_str()),
            Self::Any => true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamps
// ─────────────────────────────────────────────────────────────────────────────

/// Current time truncated to the stored precision (microseconds).
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    parse_timestamp(&format_timestamp(&now)).unwrap_or(now)
}

/// Storage form of a timestamp: fixed-width RFC 3339 so that string order
/// equals time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::InvalidData(format!("bad timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_id_roundtrip() {
        let id = MemoryId::new();
        assert_eq!(MemoryId::parse(&id.to_string()).unwrap(), id);
        assert!(matches!(
            MemoryId::parse("not-a-uuid"),
            Err(MemoryError::InvalidData(_))
        ));
    }

    #[test]
    fn test_content_hash_scoped_by_owner() {
        let global = content_hash(None, "I love TypeScript");
        let alice = content_hash(Some("alice"), "I love TypeScript");
        assert_ne!(global, alice);
        assert_eq!(alice, content_hash(Some("alice"), "I love TypeScript"));
        assert_eq!(alice.len(), 64);

        assert_ne!(content_hash(Some("ab"), "c"), content_hash(Some("a"), "bc"));
    }

    #[test]
    fn test_new_record_hash_matches_text() {
        let record = MemoryRecord::new(Some("bob".into()), "likes tea");
        assert_eq!(record.content_hash, content_hash(Some("bob"), "likes tea"));
        assert_eq!(record.created_at, record.updated_at);
        assert!(!record.is_deleted());
        assert!(!record.has_embedding());
    }

    #[test]
    fn test_history_action_strings() {
        for action in [
            HistoryAction::Add,
            HistoryAction::Update,
            HistoryAction::UpdateSemantic,
            HistoryAction::UpdateHash,
            HistoryAction::Delete,
        ] {
            assert_eq!(HistoryAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(HistoryAction::parse("MERGE"), None);
        assert_eq!(
            serde_json::to_string(&HistoryAction::UpdateSemantic).unwrap(),
            "\"UPDATE_SEMANTIC\""
        );
    }

    #[test]
    fn test_owner_scope_resolution() {
        assert_eq!(OwnerScope::resolve(None, true), OwnerScope::Global);
        assert_eq!(
            OwnerScope::resolve(Some("a"), true),
            OwnerScope::OwnerOrGlobal("a".into())
        );
        assert_eq!(
            OwnerScope::resolve(Some("a"), false),
            OwnerScope::Owner("a".into())
        );
    }

    #[test]
    fn test_owner_scope_matches() {
        let universal = OwnerScope::OwnerOrGlobal("a".into());
        assert!(universal.matches(None));
        assert!(universal.matches(Some("a")));
        assert!(!universal.matches(Some("b")));

        let strict = OwnerScope::Owner("a".into());
        assert!(!strict.matches(None));
        assert!(strict.matches(Some("a")));

        assert!(OwnerScope::Global.matches(None));
        assert!(!OwnerScope::Global.matches(Some("a")));
        assert!(OwnerScope::Any.matches(Some("z")));
    }

    #[test]
    fn test_owner_scope_sql() {
        let (clause, params) = OwnerScope::OwnerOrGlobal("a".into()).sql_clause("owner");
        assert_eq!(clause, "(owner IS NULL OR owner = ?)");
        assert_eq!(params, vec!["a".to_string()]);

        let (clause, params) = OwnerScope::Global.sql_clause("owner");
        assert_eq!(clause, "owner IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = now();
        let formatted = format_timestamp(&a);
        assert!(formatted.ends_with('Z'));
        assert_eq!(formatted.len(), "2024-01-01T00:00:00.000000Z".len());
        assert_eq!(parse_timestamp(&formatted).unwrap(), a);
    }
}
