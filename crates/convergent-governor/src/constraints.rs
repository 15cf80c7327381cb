//! The constraint engine — typed, machine-checkable constraints evaluated
//! against intents and gate verdicts.
//!
//! Unlike the intent graph, which captures decisions, this layer enforces
//! correctness: no intent passes the governor unless every applicable
//! hard constraint is satisfied.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, instrument};

use convergent_core::matching::{normalize_type, parse_signature};
use convergent_core::protocol::{ConstraintSeverity, EvidenceKind, Intent};
use convergent_scoring::StabilityScorer;

use crate::gates::{run_gate, Gate, GateScope, GateVerdict};

/// Machine-checkable constraint categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Tests must pass in the constraint's scope (gate-backed).
    TestsPass,
    /// No import cycles in the constraint's scope (gate-backed).
    NoImportCycles,
    /// A named invariant must hold.
    Invariant,
    /// Signature fields must carry specific types.
    TypeCheck,
    /// Forbidden patterns must not appear.
    SecurityPolicy,
}

/// A constraint with validation rules the engine can check directly, plus
/// an optional gate whose verdict it consumes.
#[derive(Debug, Clone)]
pub struct TypedConstraint {
    pub id: String,
    pub kind: ConstraintKind,
    pub subject: String,
    pub predicate: String,
    pub severity: ConstraintSeverity,
    /// Tags selecting the intents this constraint applies to. Empty scope
    /// applies to every intent.
    pub scope: Vec<String>,
    /// Name of the gate whose verdict this constraint requires.
    pub gate: Option<String>,
    /// Fields that must appear in the intent's signatures, with types.
    pub required_fields: HashMap<String, String>,
    /// Regex patterns that must not appear in names or signatures.
    pub forbidden_patterns: Vec<String>,
    /// Evidence kinds the intent must already carry.
    pub required_evidence: Vec<EvidenceKind>,
    /// Minimum stability required for compliance.
    pub min_stability: f64,
}

impl TypedConstraint {
    pub fn new(kind: ConstraintKind, subject: &str, predicate: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            severity: ConstraintSeverity::Hard,
            scope: Vec::new(),
            gate: None,
            required_fields: HashMap::new(),
            forbidden_patterns: Vec::new(),
            required_evidence: Vec::new(),
            min_stability: 0.0,
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

    pub fn with_gate(mut self, gate: &str) -> Self {
        self.gate = Some(gate.to_string());
        self
    }

    pub fn with_required_fields(mut self, fields: Vec<(&str, &str)>) -> Self {
        self.required_fields = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn with_forbidden_patterns(mut self, patterns: Vec<&str>) -> Self {
        self.forbidden_patterns = patterns.into_iter().map(String::from).collect();
        self
    }

    pub fn with_required_evidence(mut self, kinds: Vec<EvidenceKind>) -> Self {
        self.required_evidence = kinds;
        self
    }

    pub fn with_min_stability(mut self, min: f64) -> Self {
        self.min_stability = min;
        self
    }

    fn applies_to(&self, intent: &Intent) -> bool {
        if self.scope.is_empty() {
            return true;
        }
        intent
            .all_interfaces()
            .flat_map(|spec| spec.tags.iter())
            .any(|tag| self.scope.iter().any(|s| s == tag))
    }
}

/// Result of checking one constraint against one intent.
#[derive(Debug, Clone)]
pub struct ConstraintCheck {
    pub constraint_id: String,
    pub kind: ConstraintKind,
    pub severity: ConstraintSeverity,
    pub satisfied: bool,
    pub violations: Vec<String>,
    pub gate_verdict: Option<GateVerdict>,
}

/// Aggregate result of gating an intent through every applicable
/// constraint. `passed` is false only when a hard constraint failed;
/// warn/info violations annotate the report without blocking.
#[derive(Debug, Clone, Default)]
pub struct ConstraintReport {
    pub intent_id: String,
    pub passed: bool,
    pub checks: Vec<ConstraintCheck>,
    pub blocking: Vec<String>,
}

/// Registers typed constraints and the gates that back them, and gates
/// intents through all applicable checks.
pub struct ConstraintEngine {
    constraints: Vec<TypedConstraint>,
    gates: HashMap<String, Arc<dyn Gate>>,
    scorer: StabilityScorer,
}

impl ConstraintEngine {
    pub fn new(scorer: StabilityScorer) -> Self {
        Self {
            constraints: Vec::new(),
            gates: HashMap::new(),
            scorer,
        }
    }

    /// Register a constraint. Returns its id.
    pub fn register(&mut self, constraint: TypedConstraint) -> String {
        let id = constraint.id.clone();
        self.constraints.push(constraint);
        id
    }

    /// Remove a constraint. Returns whether it existed.
    pub fn unregister(&mut self, constraint_id: &str) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| c.id != constraint_id);
        self.constraints.len() != before
    }

    /// Register a gate by its own name.
    pub fn register_gate(&mut self, gate: Arc<dyn Gate>) {
        self.gates.insert(gate.name().to_string(), gate);
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Gate an intent through every applicable constraint.
    #[instrument(skip(self, intent, now), fields(intent_id = %intent.intent_id))]
    pub fn evaluate(
        &self,
        intent: &Intent,
        scope: &GateScope,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ConstraintReport {
        let mut report = ConstraintReport {
            intent_id: intent.intent_id.clone(),
            passed: true,
            ..Default::default()
        };

        for constraint in self.constraints.iter().filter(|c| c.applies_to(intent)) {
            let check = self.check(constraint, intent, scope, now);
            if !check.satisfied && constraint.severity == ConstraintSeverity::Hard {
                report.passed = false;
                for violation in &check.violations {
                    report
                        .blocking
                        .push(format!("[hard] {}: {violation}", constraint.subject));
                }
            }
            report.checks.push(check);
        }

        debug!(
            checks = report.checks.len(),
            passed = report.passed,
            "constraint evaluation complete"
        );
        report
    }

    fn check(
        &self,
        constraint: &TypedConstraint,
        intent: &Intent,
        scope: &GateScope,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ConstraintCheck {
        let mut violations = Vec::new();
        let mut gate_verdict = None;

        if let Some(gate_name) = &constraint.gate {
            match self.gates.get(gate_name) {
                Some(gate) => {
                    let verdict = run_gate(gate, scope);
                    if !verdict.passed {
                        violations.push(verdict.detail.clone());
                    }
                    gate_verdict = Some(verdict);
                }
                None => violations.push(format!("gate '{gate_name}' is not registered")),
            }
        }

        if !constraint.required_fields.is_empty() {
            violations.extend(check_required_fields(constraint, intent));
        }
        if !constraint.forbidden_patterns.is_empty() {
            violations.extend(check_forbidden_patterns(constraint, intent));
        }
        if !constraint.required_evidence.is_empty() {
            let present: Vec<EvidenceKind> = intent.evidence.iter().map(|e| e.kind).collect();
            for required in &constraint.required_evidence {
                if !present.contains(required) {
                    violations.push(format!(
                        "missing required evidence: {}",
                        serde_json::to_string(required)
                            .unwrap_or_default()
                            .trim_matches('"')
                    ));
                }
            }
        }
        if constraint.min_stability > 0.0 {
            let actual = self.scorer.score_at(intent, now);
            if actual < constraint.min_stability {
                violations.push(format!(
                    "stability {actual:.2} below required {:.2}",
                    constraint.min_stability
                ));
            }
        }

        ConstraintCheck {
            constraint_id: constraint.id.clone(),
            kind: constraint.kind,
            severity: constraint.severity,
            satisfied: violations.is_empty(),
            violations,
            gate_verdict,
        }
    }
}

fn check_required_fields(constraint: &TypedConstraint, intent: &Intent) -> Vec<String> {
    let mut all_fields: HashMap<String, String> = HashMap::new();
    for spec in intent.all_interfaces() {
        if let Some(signature) = &spec.signature {
            all_fields.extend(parse_signature(signature));
        }
    }

    let mut violations = Vec::new();
    for (field, required_type) in &constraint.required_fields {
        match all_fields.get(field) {
            None => violations.push(format!("missing required field '{field}: {required_type}'")),
            Some(actual) if normalize_type(actual) != normalize_type(required_type) => {
                violations.push(format!(
                    "field '{field}' has type '{actual}', expected '{required_type}'"
                ));
            }
            Some(_) => {}
        }
    }
    violations
}

fn check_forbidden_patterns(constraint: &TypedConstraint, intent: &Intent) -> Vec<String> {
    let mut texts: Vec<&str> = Vec::new();
    for spec in intent.all_interfaces() {
        texts.push(&spec.name);
        if let Some(signature) = &spec.signature {
            texts.push(signature);
        }
    }

    let mut violations = Vec::new();
    for pattern in &constraint.forbidden_patterns {
        let compiled = match Regex::new(&format!("(?i){pattern}")) {
            Ok(re) => re,
            Err(e) => {
                violations.push(format!("invalid forbidden pattern '{pattern}': {e}"));
                continue;
            }
        };
        if let Some(text) = texts.iter().find(|t| compiled.is_match(t)) {
            violations.push(format!("forbidden pattern '{pattern}' found in '{text}'"));
        }
    }
    violations
}
