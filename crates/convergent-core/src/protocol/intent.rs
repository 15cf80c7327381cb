//! Intent graph models: intents, interfaces, constraints, evidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of architectural record an intent is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Decision,
    Interface,
    Dependency,
    Constraint,
}

/// The kind of surface an interface describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    Class,
    Function,
    Method,
    Endpoint,
    Type,
    Model,
    Config,
}

/// A typed interface that an intent provides or requires.
///
/// `(name, kind)` is the primary match axis. Name comparison is case- and
/// whitespace-insensitive (see [`crate::matching`]); tags are unordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub name: String,
    pub kind: InterfaceKind,
    /// Parameter signature as `"field: type, field: type"`, when known.
    pub signature: Option<String>,
    pub tags: Vec<String>,
}

impl InterfaceSpec {
    pub fn new(name: &str, kind: InterfaceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            signature: None,
            tags: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    pub fn with_tags(mut self, tags: Vec<&str>) -> Self {
        self.tags = tags.into_iter().map(String::from).collect();
        self
    }
}

/// How binding a constraint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintSeverity {
    Info,
    Warn,
    /// Must not be violated by any intent merged into a parent graph.
    Hard,
}

/// A constraint one agent's decision imposes on other scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// What the constraint affects (e.g. "User model", "database schema").
    pub subject: String,
    /// The requirement itself (e.g. "must have author_id: uuid").
    pub predicate: String,
    pub severity: ConstraintSeverity,
    /// Tags selecting which intents this constraint applies to.
    pub scope: Vec<String>,
}

impl Constraint {
    pub fn new(subject: &str, predicate: &str) -> Self {
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            severity: ConstraintSeverity::Warn,
            scope: Vec::new(),
        }
    }

    pub fn with_severity(mut self, severity: ConstraintSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_scope(mut self, scope: Vec<&str>) -> Self {
        self.scope = scope.into_iter().map(String::from).collect();
        self
    }

    /// Whether this constraint applies to an intent, by tag overlap between
    /// the constraint's scope and the intent's interface tags.
    pub fn applies_to(&self, intent: &Intent) -> bool {
        intent
            .all_interfaces()
            .flat_map(|spec| spec.tags.iter())
            .any(|tag| self.scope.iter().any(|s| s == tag))
    }

    /// Whether two constraints disagree: same normalized subject, different
    /// predicate.
    pub fn conflicts_with(&self, other: &Constraint) -> bool {
        crate::matching::normalize_subject(&self.subject)
            == crate::matching::normalize_subject(&other.subject)
            && self.predicate != other.predicate
    }
}

/// Evidence kinds, ordered roughly by how much weight they carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Speculative,
    Committed,
    Tested,
    Consumed,
    Manual,
}

/// A piece of evidence supporting an intent's stability.
///
/// A weight of 0 means "use the configured base weight for the kind";
/// non-zero weights are clamped into the kind's bracket except `manual`,
/// which is operator-supplied and unclamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
    /// Who or what produced this evidence (agent id, gate name, "operator").
    pub source: String,
}

impl Evidence {
    pub fn new(kind: EvidenceKind, source: &str) -> Self {
        Self {
            kind,
            weight: 0.0,
            timestamp: Utc::now(),
            source: source.to_string(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.max(0.0);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A published, immutable record of an architectural decision.
///
/// Once stored, all fields except the evidence list are immutable; evidence
/// grows additively and stability is derived, never stored on the intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_id: String,
    pub agent_id: String,
    pub description: String,
    pub category: IntentCategory,
    /// Interfaces this intent touches without a provide/require direction.
    pub interfaces: Vec<InterfaceSpec>,
    pub provides: Vec<InterfaceSpec>,
    pub requires: Vec<InterfaceSpec>,
    pub constraints: Vec<Constraint>,
    pub files_affected: Vec<String>,
    pub evidence: Vec<Evidence>,
    /// Prior intent this one refines, if any.
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(intent_id: &str, agent_id: &str, description: &str) -> Self {
        Self {
            intent_id: intent_id.to_string(),
            agent_id: agent_id.to_string(),
            description: description.to_string(),
            category: IntentCategory::Decision,
            interfaces: Vec::new(),
            provides: Vec::new(),
            requires: Vec::new(),
            constraints: Vec::new(),
            files_affected: Vec::new(),
            evidence: Vec::new(),
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: IntentCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_interfaces(mut self, specs: Vec<InterfaceSpec>) -> Self {
        self.interfaces = specs;
        self
    }

    pub fn with_provides(mut self, specs: Vec<InterfaceSpec>) -> Self {
        self.provides = specs;
        self
    }

    pub fn with_requires(mut self, specs: Vec<InterfaceSpec>) -> Self {
        self.requires = specs;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_files(mut self, files: Vec<&str>) -> Self {
        self.files_affected = files.into_iter().map(String::from).collect();
        self
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// All interface specs of this intent: undirected, provided, required.
    pub fn all_interfaces(&self) -> impl Iterator<Item = &InterfaceSpec> {
        self.interfaces
            .iter()
            .chain(self.provides.iter())
            .chain(self.requires.iter())
    }

    /// Deterministic hash over the immutable fields (everything except the
    /// evidence list, which grows additively). Publish idempotency builds
    /// on this.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.intent_id.as_bytes());
        hasher.update(self.agent_id.as_bytes());
        hasher.update(self.description.as_bytes());
        hasher.update(canonical_json(&self.category).as_bytes());
        for spec in self.all_interfaces() {
            hasher.update(canonical_json(spec).as_bytes());
        }
        for constraint in &self.constraints {
            hasher.update(canonical_json(constraint).as_bytes());
        }
        for file in &self.files_affected {
            hasher.update(file.as_bytes());
        }
        if let Some(parent) = &self.parent_id {
            hasher.update(parent.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Validate the fields required before publishing.
    pub fn validate(&self) -> crate::ConvergentResult<()> {
        if self.intent_id.is_empty() {
            return Err(crate::ConvergentError::validation("intent_id is empty"));
        }
        if self.agent_id.is_empty() {
            return Err(crate::ConvergentError::validation("agent_id is empty"));
        }
        if self.all_interfaces().next().is_none() && self.constraints.is_empty() {
            return Err(crate::ConvergentError::validation(
                "intent declares no interfaces and no constraints",
            ));
        }
        if self.evidence.iter().any(|e| e.weight < 0.0) {
            return Err(crate::ConvergentError::validation(
                "evidence weight must be >= 0",
            ));
        }
        Ok(())
    }
}

fn canonical_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
