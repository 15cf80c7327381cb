//! Structural matching — deterministic, no LLM.
//!
//! Computes interface overlap from normalized name similarity (lowercase,
//! identifier-tokenized, edit-distance-based), kind equality, tag-set
//! Jaccard, and parameter-shape compatibility when both sides carry a
//! parseable signature. A semantic matcher can be plugged in behind
//! [`SemanticMatcher`] and is OR-merged with the structural verdict.

use crate::protocol::InterfaceSpec;

/// Known suffixes stripped during name normalization.
const NAME_SUFFIXES: &[&str] = &[
    "Model",
    "Service",
    "Handler",
    "Controller",
    "Spec",
    "Interface",
];

/// Relative weights of the structural score components.
const NAME_WEIGHT: f64 = 0.5;
const TAG_WEIGHT: f64 = 0.3;
const SIGNATURE_WEIGHT: f64 = 0.2;

/// Verdict from a semantic matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticVerdict {
    pub related: bool,
    pub reason: String,
}

/// Hook for an external (typically LLM-backed) relatedness oracle.
///
/// The engine never implements this; it merges the verdict with the
/// structural score using an OR rule on `related`.
pub trait SemanticMatcher: Send + Sync {
    fn relate(&self, a: &InterfaceSpec, b: &InterfaceSpec) -> SemanticVerdict;
}

/// Null-object matcher: never relates anything, so the structural path is
/// authoritative when no semantic matcher is configured.
#[derive(Debug, Default)]
pub struct NullMatcher;

impl SemanticMatcher for NullMatcher {
    fn relate(&self, _a: &InterfaceSpec, _b: &InterfaceSpec) -> SemanticVerdict {
        SemanticVerdict {
            related: false,
            reason: "no semantic matcher configured".to_string(),
        }
    }
}

/// Normalize an interface name: strip known suffixes, split CamelCase and
/// `_`/`-` separators into lowercase tokens joined by single spaces.
pub fn normalize_name(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }

    let mut stripped = name;
    for suffix in NAME_SUFFIXES {
        if stripped.ends_with(suffix) && stripped.len() > suffix.len() {
            stripped = &stripped[..stripped.len() - suffix.len()];
            break;
        }
    }

    let tokens = tokenize_identifier(stripped);
    if tokens.is_empty() {
        return stripped.to_lowercase();
    }
    tokens.join(" ")
}

/// Split an identifier into lowercase tokens on CamelCase boundaries,
/// underscores, hyphens, dots, and whitespace.
fn tokenize_identifier(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    let chars: Vec<char> = s.chars().collect();
    for i in 0..chars.len() {
        let c = chars[i];
        if c == '_' || c == '-' || c == '.' || c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(current.to_lowercase());
                current.clear();
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let next_is_lower = i + 1 < chars.len() && chars[i + 1].is_lowercase();
            let prev_is_lower = current.chars().last().is_some_and(|p| p.is_lowercase());
            if prev_is_lower || next_is_lower {
                tokens.push(current.to_lowercase());
                current.clear();
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current.to_lowercase());
    }

    tokens
}

/// Edit-distance-based similarity of two normalized names, in [0, 1].
///
/// Containment (one normalized name inside the other) short-circuits to
/// 1.0 so `User` matches `UserProfile`.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb || na.contains(&nb) || nb.contains(&na) {
        return 1.0;
    }
    let distance = levenshtein(&na, &nb);
    let max_len = na.chars().count().max(nb.chars().count());
    1.0 - distance as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}

/// Whether two names refer to the same concept: normalized names are
/// equal, or one contains the other.
pub fn names_overlap(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let na = normalize_name(a);
    let nb = normalize_name(b);
    na == nb || na.contains(&nb) || nb.contains(&na)
}

/// Jaccard overlap of two unordered tag sets, in [0, 1].
pub fn tag_jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let set_b: std::collections::HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Normalize a type string for comparison. Handles common aliases
/// (UUID↔uuid, String↔str, i64↔int, f64↔float), `Optional[X]`/`X | None`,
/// and container spellings (`Vec<X>`↔`list[X]`↔`List[X]`).
pub fn normalize_type(t: &str) -> String {
    let t = t.trim();
    if t.is_empty() {
        return String::new();
    }

    let mut t = t.to_string();

    if t.starts_with("Optional[") && t.ends_with(']') {
        t = t[9..t.len() - 1].to_string();
    }

    if t.contains(" | ") {
        let parts: Vec<&str> = t
            .split(" | ")
            .map(|p| p.trim())
            .filter(|p| *p != "None")
            .collect();
        match parts.first() {
            Some(first) => t = first.to_string(),
            None => return String::new(),
        }
    }

    if let Some(inner) = extract_container_inner(&t) {
        return format!("list[{}]", normalize_type(&inner));
    }

    match t.as_str() {
        "UUID" | "uuid" => "uuid".to_string(),
        "str" | "String" | "string" => "str".to_string(),
        "int" | "i32" | "i64" | "i128" | "u32" | "u64" => "int".to_string(),
        "float" | "f32" | "f64" => "float".to_string(),
        "bool" | "boolean" => "bool".to_string(),
        _ => t.to_lowercase(),
    }
}

fn extract_container_inner(t: &str) -> Option<String> {
    if (t.starts_with("list[") || t.starts_with("List[")) && t.ends_with(']') {
        return Some(t[5..t.len() - 1].trim().to_string());
    }
    if t.starts_with("Vec<") && t.ends_with('>') {
        return Some(t[4..t.len() - 1].trim().to_string());
    }
    None
}

/// Parse `"field: type, field: type"` into (field, type) pairs.
pub fn parse_signature(sig: &str) -> Vec<(String, String)> {
    if sig.trim().is_empty() {
        return Vec::new();
    }

    sig.split(',')
        .filter_map(|part| {
            part.trim()
                .split_once(':')
                .map(|(field, ty)| (field.trim().to_string(), ty.trim().to_string()))
        })
        .collect()
}

/// Whether signature `b` is compatible with signature `a`: every field of
/// `a` appears in `b` with a normalized-equal type. Empty `a` is compatible
/// with anything.
pub fn signatures_compatible(a: &str, b: &str) -> bool {
    let fields_a = parse_signature(a);
    let fields_b = parse_signature(b);

    if fields_a.is_empty() {
        return true;
    }

    fields_a.iter().all(|(field, type_a)| {
        fields_b
            .iter()
            .find(|(f, _)| f == field)
            .is_some_and(|(_, type_b)| normalize_type(type_a) == normalize_type(type_b))
    })
}

/// Normalize a constraint subject: lowercase, `_`/`-` to spaces, collapse
/// whitespace, strip trailing "model"/"service".
pub fn normalize_subject(subject: &str) -> String {
    if subject.is_empty() {
        return String::new();
    }

    let mut t = subject.to_lowercase().replace(['_', '-'], " ");
    t = t.split_whitespace().collect::<Vec<_>>().join(" ");

    for suffix in &["model", "service"] {
        let with_space = format!(" {suffix}");
        if t.ends_with(&with_space) {
            t.truncate(t.len() - with_space.len());
        }
    }

    t.trim().to_string()
}

/// The combined structural overlap score of two interface specs, in [0, 1].
///
/// Kind equality is required for a non-zero score. When both sides carry a
/// parseable signature the score blends name similarity, tag Jaccard, and
/// signature compatibility; otherwise the signature weight is folded into
/// the other two components.
pub fn structural_score(a: &InterfaceSpec, b: &InterfaceSpec) -> f64 {
    if a.kind != b.kind {
        return 0.0;
    }

    let name = name_similarity(&a.name, &b.name);
    let tags = tag_jaccard(&a.tags, &b.tags);

    let both_parseable = matches!(
        (&a.signature, &b.signature),
        (Some(sa), Some(sb)) if !parse_signature(sa).is_empty() && !parse_signature(sb).is_empty()
    );

    if both_parseable {
        let sig = if signatures_compatible(
            a.signature.as_deref().unwrap_or(""),
            b.signature.as_deref().unwrap_or(""),
        ) || signatures_compatible(
            b.signature.as_deref().unwrap_or(""),
            a.signature.as_deref().unwrap_or(""),
        ) {
            1.0
        } else {
            0.0
        };
        NAME_WEIGHT * name + TAG_WEIGHT * tags + SIGNATURE_WEIGHT * sig
    } else {
        // Redistribute the signature weight proportionally.
        let scale = 1.0 / (NAME_WEIGHT + TAG_WEIGHT);
        (NAME_WEIGHT * name + TAG_WEIGHT * tags) * scale
    }
}

/// Whether two specs disagree on parameter shape: both carry parseable
/// signatures and neither direction is compatible.
pub fn signatures_disagree(a: &InterfaceSpec, b: &InterfaceSpec) -> bool {
    match (&a.signature, &b.signature) {
        (Some(sa), Some(sb)) => {
            !parse_signature(sa).is_empty()
                && !parse_signature(sb).is_empty()
                && !signatures_compatible(sa, sb)
                && !signatures_compatible(sb, sa)
        }
        _ => false,
    }
}
