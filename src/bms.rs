//! Belief Maintenance System: provenance records and inconsistency detection.
//!
//! Every stored ground fact gets a record keyed by its canonical atom string:
//! the sentence that produced it (or `SelfAssert` for direct user
//! assertions), the atom keys that contributed during the producing
//! sentence's resolve pass, and a timestamp. The records form a provenance
//! DAG walked when a new assertion contradicts a held belief.
//!
//! Inconsistencies are flagged and recorded, never reverted: the store keeps
//! the newer atom and the embedding agent decides what to do with the
//! contradiction.
//!
//! During inference a lightweight [`BmsLite`] sink accumulates derivations
//! without touching the main ledger; they are promoted when the query
//! completes.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::atom::{Assertion, Comparator};
use crate::repr::Representation;
use crate::sentence::LogSentence;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// What produced a belief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordSource {
    /// Asserted directly through `tell`.
    SelfAssert,
    /// Derived by a sentence.
    Rule { sentence_id: u64, repr: String },
}

/// Provenance record for one stored atom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeliefRecord {
    pub form: RecordSource,
    /// Contributing atom keys gathered during the producing sentence's
    /// resolve pass; `None` for direct assertions and unsupported
    /// derivations.
    pub prev: Option<Vec<String>>,
    pub date: DateTime<Utc>,
}

/// A detected value-level contradiction between a new assertion and the
/// currently held atom for the same slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inconsistency {
    /// Canonical key of the previously held atom.
    pub key: String,
    pub stored_value: f32,
    pub new_value: f32,
    /// Atom keys in the held atom's provenance chain; empty when the held
    /// atom was a direct assertion (the fact simply changed).
    pub antecedents: Vec<String>,
    pub date: DateTime<Utc>,
}

/// Sink the sentence evaluator records derived assertions through.
///
/// Implemented by the main [`BmsWrapper`] (tell-path forward propagation)
/// and by [`BmsLite`] (inference).
pub trait BeliefSink {
    fn asserted(
        &self,
        kb: &Representation,
        atom: &Assertion,
        rule: &LogSentence,
        matched: &[String],
    );
}

// ---------------------------------------------------------------------------
// Main wrapper
// ---------------------------------------------------------------------------

/// The agent's belief ledger.
#[derive(Debug, Default)]
pub struct BmsWrapper {
    records: DashMap<String, BeliefRecord>,
    inconsistencies: Mutex<Vec<Inconsistency>>,
}

impl BmsWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a direct user assertion, checking it against the held belief.
    pub fn add_self(&self, kb: &Representation, atom: &Assertion) {
        self.check(kb, atom);
        self.records.insert(
            atom.key(),
            BeliefRecord {
                form: RecordSource::SelfAssert,
                prev: None,
                date: Utc::now(),
            },
        );
    }

    /// Insert a rule-derived record. `prev` keys are filtered to those
    /// already present so every listed antecedent exists in the map.
    pub fn add_derived(
        &self,
        key: String,
        sentence_id: u64,
        repr: String,
        matched: &[String],
    ) {
        let prev: Vec<String> = matched
            .iter()
            .filter(|k| self.records.contains_key(*k))
            .cloned()
            .collect();
        self.records.insert(
            key,
            BeliefRecord {
                form: RecordSource::Rule { sentence_id, repr },
                prev: if prev.is_empty() { None } else { Some(prev) },
                date: Utc::now(),
            },
        );
    }

    /// Compare a new assertion against the currently held atom for the same
    /// slot. The stored comparator decides consistency: `=` requires
    /// equality, `>` requires stored > new, `<` requires stored < new.
    fn check(&self, kb: &Representation, atom: &Assertion) {
        let held = match atom {
            Assertion::Memb(m) => kb
                .stored_memb(&m.parent, &m.term)
                .map(|s| (s.value, s.op, Assertion::Memb(s).key())),
            Assertion::Rel(r) => kb.stored_rel(r).and_then(|s| {
                s.value().map(|v| (v, s.op(), Assertion::Rel(s.clone()).key()))
            }),
        };
        let new_value = match atom {
            Assertion::Memb(m) => m.value,
            Assertion::Rel(r) => match r.value() {
                Some(v) => v,
                None => return,
            },
        };
        let Some((stored_value, stored_op, stored_key)) = held else {
            return;
        };
        if stored_value == new_value {
            return;
        }
        if stored_op != Comparator::Equal && stored_op.holds(stored_value, new_value) {
            return;
        }
        let antecedents = self.chk_const(&stored_key);
        tracing::warn!(
            key = %stored_key,
            stored = stored_value as f64,
            new = new_value as f64,
            antecedents = antecedents.len(),
            "inconsistency between new and held belief"
        );
        self.inconsistencies.lock().push(Inconsistency {
            key: stored_key,
            stored_value,
            new_value,
            antecedents,
            date: Utc::now(),
        });
    }

    /// Walk the provenance chain of a held atom and collect the atom keys
    /// that contributed to it. A `SelfAssert` record yields an empty chain:
    /// the fact has simply changed since its direct assertion.
    pub fn chk_const(&self, key: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(key.to_string());
        seen.insert(key.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(record) = self.records.get(&current) else {
                continue;
            };
            let Some(prev) = record.prev.clone() else {
                continue;
            };
            drop(record);
            for antecedent in prev {
                if seen.insert(antecedent.clone()) {
                    chain.push(antecedent.clone());
                    queue.push_back(antecedent);
                }
            }
        }
        chain
    }

    pub fn get(&self, key: &str) -> Option<BeliefRecord> {
        self.records.get(key).map(|r| r.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every detected inconsistency, oldest first.
    pub fn inconsistencies(&self) -> Vec<Inconsistency> {
        self.inconsistencies.lock().clone()
    }
}

impl BeliefSink for BmsWrapper {
    fn asserted(
        &self,
        kb: &Representation,
        atom: &Assertion,
        rule: &LogSentence,
        matched: &[String],
    ) {
        self.check(kb, atom);
        self.add_derived(atom.key(), rule.id, rule.to_string(), matched);
    }
}

// ---------------------------------------------------------------------------
// Inference stub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LiteEntry {
    key: String,
    sentence_id: u64,
    repr: String,
    matched: Vec<String>,
}

/// Accumulates derivations during inference without mutating the main
/// ledger; promoted when the query completes.
#[derive(Debug, Default)]
pub struct BmsLite {
    entries: Mutex<Vec<LiteEntry>>,
}

impl BmsLite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accumulated derivations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Replay the accumulated derivations into the main ledger.
    pub fn promote(&self, kb: &Representation) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in entries {
            kb.bms()
                .add_derived(entry.key, entry.sentence_id, entry.repr, &entry.matched);
        }
    }
}

impl BeliefSink for BmsLite {
    fn asserted(
        &self,
        _kb: &Representation,
        atom: &Assertion,
        rule: &LogSentence,
        matched: &[String],
    ) {
        self.entries.lock().push(LiteEntry {
            key: atom.key(),
            sentence_id: rule.id,
            repr: rule.to_string(),
            matched: matched.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper_with_chain() -> BmsWrapper {
        let bms = BmsWrapper::new();
        // axiom -> a -> b, all inserted in dependency order.
        bms.records.insert(
            "axiom[$X,u=1]".into(),
            BeliefRecord {
                form: RecordSource::SelfAssert,
                prev: None,
                date: Utc::now(),
            },
        );
        bms.add_derived(
            "a[$X,u=1]".into(),
            1,
            "(axiom[x,u=1] |> a[x,u=1])".into(),
            &["axiom[$X,u=1]".to_string()],
        );
        bms.add_derived(
            "b[$X,u=1]".into(),
            2,
            "(a[x,u=1] |> b[x,u=1])".into(),
            &["a[$X,u=1]".to_string()],
        );
        bms
    }

    #[test]
    fn derived_records_filter_unknown_prev_keys() {
        let bms = wrapper_with_chain();
        bms.add_derived(
            "c[$X,u=1]".into(),
            3,
            "rule".into(),
            &["a[$X,u=1]".to_string(), "ghost[$X,u=1]".to_string()],
        );
        let rec = bms.get("c[$X,u=1]").unwrap();
        assert_eq!(rec.prev, Some(vec!["a[$X,u=1]".to_string()]));
    }

    #[test]
    fn prev_keys_always_exist() {
        let bms = wrapper_with_chain();
        for entry in bms.records.iter() {
            if let Some(prev) = &entry.prev {
                for key in prev {
                    assert!(bms.contains(key), "dangling prev key {key}");
                }
            }
        }
    }

    #[test]
    fn chk_const_walks_transitive_chain() {
        let bms = wrapper_with_chain();
        let chain = bms.chk_const("b[$X,u=1]");
        assert_eq!(
            chain,
            vec!["a[$X,u=1]".to_string(), "axiom[$X,u=1]".to_string()]
        );
    }

    #[test]
    fn chk_const_on_self_assertion_is_empty() {
        let bms = wrapper_with_chain();
        assert!(bms.chk_const("axiom[$X,u=1]").is_empty());
    }

    #[test]
    fn chk_const_handles_cycles() {
        let bms = BmsWrapper::new();
        bms.records.insert(
            "a".into(),
            BeliefRecord {
                form: RecordSource::Rule {
                    sentence_id: 1,
                    repr: "r1".into(),
                },
                prev: Some(vec!["b".into()]),
                date: Utc::now(),
            },
        );
        bms.records.insert(
            "b".into(),
            BeliefRecord {
                form: RecordSource::Rule {
                    sentence_id: 2,
                    repr: "r2".into(),
                },
                prev: Some(vec!["a".into()]),
                date: Utc::now(),
            },
        );
        let chain = bms.chk_const("a");
        assert_eq!(chain, vec!["b".to_string()]);
    }

    #[test]
    fn records_serialize() {
        let bms = wrapper_with_chain();
        let rec = bms.get("a[$X,u=1]").unwrap();
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("sentence_id"));
    }
}
