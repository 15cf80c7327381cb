//! In-memory intent backend — fast, per-process, used for branches and
//! replay verification.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use convergent_core::protocol::{Evidence, Intent, InterfaceSpec};
use convergent_core::{matching, ConvergentError, ConvergentResult};

#[derive(Default)]
struct Inner {
    /// Intents in publish order.
    intents: Vec<Intent>,
    /// intent_id → (index, content hash).
    index: HashMap<String, (usize, String)>,
}

/// In-memory implementation of [`crate::IntentBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> ConvergentResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| ConvergentError::backend(format!("graph lock poisoned: {e}")))
    }

    fn write(&self) -> ConvergentResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| ConvergentError::backend(format!("graph lock poisoned: {e}")))
    }
}

impl crate::IntentBackend for MemoryBackend {
    fn publish(&self, intent: &Intent) -> ConvergentResult<u64> {
        intent.validate()?;
        let mut inner = self.write()?;

        if let Some((index, stored_hash)) = inner.index.get(&intent.intent_id) {
            if *stored_hash == intent.content_hash() {
                debug!(intent_id = %intent.intent_id, "re-publish is a no-op");
                return Ok(*index as u64);
            }
            return Err(ConvergentError::DuplicateIntent {
                intent_id: intent.intent_id.clone(),
            });
        }

        if let Some(parent) = &intent.parent_id {
            if !inner.index.contains_key(parent) {
                return Err(ConvergentError::validation(format!(
                    "parent intent '{parent}' does not exist"
                )));
            }
        }

        let seq = inner.intents.len() as u64;
        inner
            .index
            .insert(intent.intent_id.clone(), (seq as usize, intent.content_hash()));
        inner.intents.push(intent.clone());
        Ok(seq)
    }

    fn add_evidence(&self, intent_id: &str, evidence: &Evidence) -> ConvergentResult<()> {
        if evidence.weight < 0.0 {
            return Err(ConvergentError::validation("evidence weight must be >= 0"));
        }
        let mut inner = self.write()?;
        let index = match inner.index.get(intent_id) {
            Some((index, _)) => *index,
            None => {
                return Err(ConvergentError::validation(format!(
                    "unknown intent '{intent_id}'"
                )))
            }
        };
        inner.intents[index].evidence.push(evidence.clone());
        Ok(())
    }

    fn get(&self, intent_id: &str) -> ConvergentResult<Option<Intent>> {
        let inner = self.read()?;
        Ok(inner
            .index
            .get(intent_id)
            .map(|(index, _)| inner.intents[*index].clone()))
    }

    fn sequence_of(&self, intent_id: &str) -> ConvergentResult<Option<u64>> {
        let inner = self.read()?;
        Ok(inner.index.get(intent_id).map(|(index, _)| *index as u64))
    }

    fn list_by_agent(&self, agent_id: &str) -> ConvergentResult<Vec<Intent>> {
        let inner = self.read()?;
        Ok(inner
            .intents
            .iter()
            .filter(|i| i.agent_id == agent_id)
            .cloned()
            .collect())
    }

    fn all(&self) -> ConvergentResult<Vec<Intent>> {
        Ok(self.read()?.intents.clone())
    }

    fn candidates(
        &self,
        specs: &[InterfaceSpec],
        exclude_agent: &str,
    ) -> ConvergentResult<Vec<Intent>> {
        let inner = self.read()?;
        Ok(inner
            .intents
            .iter()
            .filter(|other| other.agent_id != exclude_agent)
            .filter(|other| {
                other.all_interfaces().any(|theirs| {
                    specs.iter().any(|mine| {
                        mine.kind == theirs.kind
                            && (matching::names_overlap(&mine.name, &theirs.name)
                                || matching::tag_jaccard(&mine.tags, &theirs.tags) > 0.0)
                    })
                })
            })
            .cloned()
            .collect())
    }

    fn count(&self) -> ConvergentResult<u64> {
        Ok(self.read()?.intents.len() as u64)
    }
}
