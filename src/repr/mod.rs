//! The knowledge store: individuals, classes and the operations over them.
//!
//! [`Representation`] is the container for an agent's internal
//! representations. `tell` parses assertions and rules into it; `ask` runs
//! the inference engine over it. All shared state lives in concurrent maps,
//! so parallel `tell` and `ask` calls on the same store are safe; sentence
//! evaluation serializes per-atom through a bounded-wait lock table.

pub mod entity;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::lock_api::ArcMutexGuard;

use crate::atom::{Assertion, Atom, Membership, Relation, is_individual_name};
use crate::bms::BmsWrapper;
use crate::error::DoxaResult;
use crate::infer::Inference;
use crate::parser::{ParseMode, ParsedBatch, QuerySpec, parse};
use crate::sentence::{Branch, LogSentence, RuleOutcome};

pub use self::entity::{Class, ClassKind, EntityId, EntityIdGen, Individual};

/// Bounded wait for per-atom locks; a timeout aborts the affected sentence
/// evaluation with an unknown outcome.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Tri-valued answer of a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    True,
    False,
    Unknown,
}

/// Full query results: subject → atom name → tri-value.
pub type QueryResults = HashMap<String, HashMap<String, Option<bool>>>;

/// Which entity map `objs_by_ctg` scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Individuals,
    Classes,
}

/// RAII guards over the atom names a sentence may assert; released on every
/// exit path when dropped.
pub struct AtomLocks {
    _guards: Vec<ArcMutexGuard<parking_lot::RawMutex, ()>>,
}

/// Container for an agent's representations: every individual, class and
/// relation it knows of, the rules attached to them, and the belief ledger.
#[derive(Debug, Default)]
pub struct Representation {
    individuals: DashMap<String, Individual>,
    classes: DashMap<String, Class>,
    bms: BmsWrapper,
    locks: DashMap<String, Arc<Mutex<()>>>,
    ids: EntityIdGen,
}

impl Representation {
    pub fn new() -> Self {
        tracing::debug!("initializing representation");
        Self::default()
    }

    // -- public API ---------------------------------------------------------

    /// Parse one or more statements and store them: grounded atoms become
    /// members of their classes, rules attach to every category they
    /// mention and immediately re-run against matching subjects.
    ///
    /// Errors only for unparseable input, fuzzy values outside [0, 1] and
    /// illegal connective placement.
    pub fn tell(&self, text: &str) -> DoxaResult<()> {
        let batch = parse(text, ParseMode::Tell)?;
        let mut seeds = Vec::new();

        for memb in batch.assert_memb {
            let assertion = Assertion::Memb(memb.clone());
            self.bms.add_self(self, &assertion);
            if self.up_memb(memb)? {
                if let Assertion::Memb(m) = &assertion {
                    seeds.push((m.parent.clone(), m.term.clone()));
                }
            }
        }
        for rel in batch.assert_rel {
            let assertion = Assertion::Rel(rel.clone());
            self.bms.add_self(self, &assertion);
            let subjects: Vec<String> = rel.arg_terms().map(str::to_string).collect();
            let func = rel.func.clone();
            if self.up_rel(rel)? {
                for subject in subjects {
                    seeds.push((func.clone(), subject));
                }
            }
        }
        for rule in batch.assert_rules {
            self.save_rule(Arc::new(rule))?;
        }
        for cog in batch.assert_cogs {
            self.add_cog(Arc::new(cog))?;
        }

        self.propagate(seeds);
        Ok(())
    }

    /// Ask whether the queried facts hold, folded to a single tri-value:
    /// true iff every queried atom is proven true, false if any is proven
    /// false, unknown otherwise.
    pub fn ask(&self, text: &str) -> DoxaResult<Answer> {
        Ok(fold_answers(&self.ask_all(text)?))
    }

    /// Ask and return the full subject → atom name → tri-value mapping.
    pub fn ask_all(&self, text: &str) -> DoxaResult<QueryResults> {
        let batch = parse(text, ParseMode::Ask)?;
        Inference::new(self).run(batch)
    }

    /// Direct store lookup of a grounded atom, without inference.
    pub fn test_pred(&self, assertion: &Assertion) -> Option<bool> {
        match assertion {
            Assertion::Memb(m) => self.test_memb(m),
            Assertion::Rel(r) => self.test_rel(r),
        }
    }

    /// Map each known subject to the subset of `names` it holds as
    /// categories or relations.
    pub fn objs_by_ctg(
        &self,
        names: &HashSet<String>,
        kind: EntityKind,
    ) -> HashMap<String, HashSet<String>> {
        let mut out = HashMap::new();
        match kind {
            EntityKind::Individuals => {
                for entry in self.individuals.iter() {
                    let mut held: HashSet<String> =
                        entry.check_ctg(names).into_iter().collect();
                    held.extend(
                        entry
                            .rel_names()
                            .filter(|n| names.contains(*n))
                            .cloned(),
                    );
                    if !held.is_empty() {
                        out.insert(entry.key().clone(), held);
                    }
                }
            }
            EntityKind::Classes => {
                for entry in self.classes.iter() {
                    let mut held: HashSet<String> =
                        entry.check_parents(names).into_iter().collect();
                    held.extend(
                        entry
                            .rel_names()
                            .filter(|n| names.contains(*n))
                            .cloned(),
                    );
                    if !held.is_empty() {
                        out.insert(entry.key().clone(), held);
                    }
                }
            }
        }
        out
    }

    /// The belief maintenance ledger.
    pub fn bms(&self) -> &BmsWrapper {
        &self.bms
    }

    // -- store updates ------------------------------------------------------

    /// Store a membership atom on its owner, creating the referenced parent
    /// category if absent. Returns `true` when the store changed.
    pub fn up_memb(&self, memb: Membership) -> DoxaResult<bool> {
        let parent = memb.parent.clone();
        let subject = memb.term.clone();
        let changed = if is_individual_name(&subject) {
            let id = self.ids.next_id()?;
            let mut owner = self
                .individuals
                .entry(subject.clone())
                .or_insert_with(|| Individual::new(id, subject));
            owner.add_ctg(memb)
        } else {
            let mut owner = self
                .classes
                .entry(subject.clone())
                .or_insert_with(|| Class::membership(subject));
            owner.add_ctg(memb)
        };
        self.classes
            .entry(parent.clone())
            .or_insert_with(|| Class::membership(parent));
        Ok(changed)
    }

    /// Store a relation atom on every argument's owner, creating the
    /// relation class if absent. Returns `true` when the store changed.
    pub fn up_rel(&self, rel: Relation) -> DoxaResult<bool> {
        let func = rel.func.clone();
        let subjects: Vec<String> = rel.arg_terms().map(str::to_string).collect();
        let mut changed = false;
        for subject in subjects {
            if is_individual_name(&subject) {
                let id = self.ids.next_id()?;
                let mut owner = self
                    .individuals
                    .entry(subject.clone())
                    .or_insert_with(|| Individual::new(id, subject));
                changed |= owner.add_rel(rel.clone());
            } else {
                let mut owner = self
                    .classes
                    .entry(subject.clone())
                    .or_insert_with(|| Class::membership(subject));
                changed |= owner.add_rel(rel.clone())?;
            }
        }
        self.classes
            .entry(func.clone())
            .or_insert_with(|| Class::relational(func));
        Ok(changed)
    }

    /// Index a quantified statement under every atom it mentions, then
    /// dispatch its free atoms as questions.
    pub fn add_cog(&self, sent: Arc<LogSentence>) -> DoxaResult<()> {
        let mut spec = QuerySpec {
            var_order: sent.var_order.clone(),
            ..Default::default()
        };
        for atom in sent.atoms() {
            let Some(name) = atom.name() else { continue };
            let relational = matches!(atom, Atom::Func(_));
            for term in atom.terms() {
                let free = sent.var_order.iter().any(|v| v == term)
                    || sent.time_vars.iter().any(|v| v == term);
                if free {
                    let mut cls = self.classes.entry(name.to_string()).or_insert_with(|| {
                        if relational {
                            Class::relational(name)
                        } else {
                            Class::membership(name)
                        }
                    });
                    cls.add_cog(Arc::clone(&sent));
                } else if is_individual_name(term) {
                    let id = self.ids.next_id()?;
                    let mut ind = self
                        .individuals
                        .entry(term.to_string())
                        .or_insert_with(|| Individual::new(id, term));
                    ind.add_cog(name, Arc::clone(&sent));
                } else {
                    let mut cls = self
                        .classes
                        .entry(term.to_string())
                        .or_insert_with(|| Class::membership(term));
                    cls.add_cog(Arc::clone(&sent));
                }
            }
            match atom {
                Atom::Memb(m) => spec.preds.push(m.clone()),
                Atom::Func(r) => spec.funcs.push(r.clone()),
                Atom::TimeCmp(_) => {}
            }
        }
        if !spec.var_order.is_empty() && (!spec.preds.is_empty() || !spec.funcs.is_empty()) {
            let batch = ParsedBatch {
                queries: vec![spec],
                ..Default::default()
            };
            let _ = Inference::new(self).run(batch);
        }
        Ok(())
    }

    /// Attach a rule to every category and relation it references, then
    /// re-run it against every subject whose held names intersect the
    /// rule's (forward propagation).
    pub fn save_rule(&self, sent: Arc<LogSentence>) -> DoxaResult<()> {
        let mut referenced: HashSet<String> = HashSet::new();
        for atom in sent.atoms() {
            let Some(name) = atom.name() else { continue };
            referenced.insert(name.to_string());
            let relational = matches!(atom, Atom::Func(_));
            let mut cls = self.classes.entry(name.to_string()).or_insert_with(|| {
                if relational {
                    Class::relational(name)
                } else {
                    Class::membership(name)
                }
            });
            cls.add_cog(Arc::clone(&sent));
        }

        let mut subjects = self.objs_by_ctg(&referenced, EntityKind::Individuals);
        subjects.extend(self.objs_by_ctg(&referenced, EntityKind::Classes));

        let mut seeds = Vec::new();
        for subject in subjects.into_keys() {
            if let RuleOutcome::Committed(asserted) =
                sent.call(self, &self.bms, std::slice::from_ref(&subject))
            {
                for a in asserted {
                    if a.changed {
                        for term in a.atom.terms() {
                            seeds.push((a.atom.name().to_string(), term.to_string()));
                        }
                    }
                }
            }
        }
        self.propagate(seeds);
        Ok(())
    }

    /// Forward chaining worklist: for every changed (name, subject) pair,
    /// re-run the assertive rules indexed under the name against the
    /// subject, feeding newly changed facts back into the queue.
    fn propagate(&self, seeds: Vec<(String, String)>) {
        let mut queue: VecDeque<(String, String)> = seeds.into();
        let mut attempted: HashSet<(u64, String)> = HashSet::new();

        while let Some((name, subject)) = queue.pop_front() {
            let rules: Vec<Arc<LogSentence>> = match self.classes.get(&name) {
                Some(cls) => cls.cog().to_vec(),
                None => continue,
            };
            for rule in rules {
                // Only rules whose antecedent mentions the changed name can
                // fire from it; a consequent mention must not re-derive over
                // a fresh direct assertion.
                if !rule.is_assertive()
                    || !rule.branch_names(Branch::Left).iter().any(|n| *n == name)
                {
                    continue;
                }
                if !attempted.insert((rule.id, subject.clone())) {
                    continue;
                }
                if let RuleOutcome::Committed(asserted) =
                    rule.call(self, &self.bms, std::slice::from_ref(&subject))
                {
                    for a in asserted {
                        if a.changed {
                            tracing::debug!(atom = %a.atom, rule = rule.id, "forward propagation");
                            for term in a.atom.terms() {
                                queue.push_back((a.atom.name().to_string(), term.to_string()));
                            }
                        }
                    }
                }
            }
        }
    }

    // -- lookups ------------------------------------------------------------

    /// Tri-value direct check of a grounded membership atom.
    pub fn test_memb(&self, query: &Membership) -> Option<bool> {
        let now = Utc::now();
        if is_individual_name(&query.term) {
            self.individuals.get(&query.term)?.test_ctg(query, now)
        } else {
            self.classes.get(&query.term)?.test_ctg(query, now)
        }
    }

    /// Tri-value direct check of a grounded relation atom, resolved against
    /// the owner of its object argument.
    pub fn test_rel(&self, query: &Relation) -> Option<bool> {
        let now = Utc::now();
        let owner = query.arg_terms().next()?.to_string();
        if is_individual_name(&owner) {
            self.individuals.get(&owner)?.test_rel(query, now)
        } else {
            self.classes.get(&owner)?.test_rel(query, now)
        }
    }

    /// The currently stored membership atom for a (subject, category) slot.
    pub fn stored_memb(&self, parent: &str, term: &str) -> Option<Membership> {
        if is_individual_name(term) {
            self.individuals.get(term)?.get_ctg(parent).cloned()
        } else {
            self.classes.get(term)?.get_ctg(parent).cloned()
        }
    }

    /// The currently stored relation atom matching a query's args.
    pub fn stored_rel(&self, query: &Relation) -> Option<Relation> {
        let owner = query.arg_terms().next()?.to_string();
        if is_individual_name(&owner) {
            self.individuals.get(&owner)?.get_rel(query).cloned()
        } else {
            self.classes.get(&owner)?.get_rel(query).cloned()
        }
    }

    /// The latest date attached to the stored atom matching an assertion;
    /// atoms without explicit dates report the current instant.
    pub fn assertion_date(&self, assertion: &Assertion) -> Option<DateTime<Utc>> {
        let latest = match assertion {
            Assertion::Memb(m) => self.stored_memb(&m.parent, &m.term)?.latest_date(),
            Assertion::Rel(r) => self.stored_rel(r)?.latest_date(),
        };
        Some(latest.unwrap_or_else(Utc::now))
    }

    /// Whether a subject name is known, as an individual or a class.
    pub fn has_entity(&self, name: &str) -> bool {
        self.individuals.contains_key(name) || self.classes.contains_key(name)
    }

    /// Sentences indexed under a class or relation name, oldest first.
    pub(crate) fn rules_for(&self, name: &str) -> Vec<Arc<LogSentence>> {
        self.classes
            .get(name)
            .map(|c| c.cog().to_vec())
            .unwrap_or_default()
    }

    // -- locking ------------------------------------------------------------

    /// Acquire the per-atom locks for the given names with a bounded wait.
    /// Names are sorted so concurrent evaluations acquire in a single
    /// global order; `None` means a timeout and the caller must abort with
    /// an unknown result.
    pub fn lock_atoms(&self, names: Vec<String>) -> Option<AtomLocks> {
        let mut names = names;
        names.sort();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            let arc = self
                .locks
                .entry(name.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            match arc.try_lock_arc_for(LOCK_TIMEOUT) {
                Some(guard) => guards.push(guard),
                None => {
                    tracing::warn!(atom = %name, "atom lock timeout");
                    return None;
                }
            }
        }
        Some(AtomLocks { _guards: guards })
    }

    /// Counts of stored individuals and classes.
    pub fn stats(&self) -> (usize, usize) {
        (self.individuals.len(), self.classes.len())
    }
}

/// Fold a full results map into the single tri-valued answer: false
/// dominates, then unknown, else true. An empty result is unknown.
pub fn fold_answers(results: &QueryResults) -> Answer {
    let mut any = false;
    let mut unknown = false;
    for atom_results in results.values() {
        for value in atom_results.values() {
            any = true;
            match value {
                Some(false) => return Answer::False,
                None => unknown = true,
                Some(true) => {}
            }
        }
    }
    if !any || unknown {
        Answer::Unknown
    } else {
        Answer::True
    }
}
