//! The inference engine: query normalization, rule discovery, unification.
//!
//! An `ask` runs through five stages:
//!
//! 1. **Query normalization** — free variables, subject → atoms-to-prove,
//!    and the seed category list. Anything answerable by direct lookup is
//!    recorded immediately (true and false alike); only unknowns proceed.
//! 2. **Rule discovery** — a worklist over cognition indexes materializes an
//!    [`InferNode`] per rule consequent, newest rules first. Names with no
//!    rules are swallowed as "unknown from rules".
//! 3. **Object prefetch** — every subject holding at least one referenced
//!    name, with its held-name set.
//! 4. **Unification** — per node, candidate substitutions are subjects whose
//!    held names cover the variable's requirements; every combination is
//!    tried once (combination-hash memoization) and committed derivations
//!    extend the object dictionary. Antecedent names expand breadth-first;
//!    the pass restarts while rule applications keep changing the store.
//! 5. **Write-back** — remaining unknowns get a final direct lookup, since
//!    derived atoms already live in the store, and the inference-local
//!    belief records are promoted into the main ledger.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::atom::{Assertion, Membership, Relation};
use crate::bms::BmsLite;
use crate::error::{DoxaResult, InferError};
use crate::parser::ParsedBatch;
use crate::repr::{EntityKind, QueryResults, Representation};
use crate::sentence::{Branch, LogSentence, RuleOutcome};

// ---------------------------------------------------------------------------
// Inference nodes
// ---------------------------------------------------------------------------

/// Per-rule, per-consequent handle used during unification.
#[derive(Debug)]
struct InferNode {
    id: u64,
    rule: Arc<LogSentence>,
    /// The consequent name this node can derive.
    cons: String,
    /// Antecedent names, expanded into the worklist after the node runs.
    ants: Vec<String>,
    /// Per-variable required names, aligned with the rule's `var_order`:
    /// a subject qualifies for a variable when its held names cover the set.
    subs: Vec<(String, HashSet<String>)>,
}

impl InferNode {
    fn build(rule: &Arc<LogSentence>, cons: &str, ants_branch: Branch, id: u64) -> Self {
        let ants = rule.branch_names(ants_branch);
        let mut subs = Vec::with_capacity(rule.var_order.len());
        for var in &rule.var_order {
            let mut required = HashSet::new();
            for atom in rule.branch_atoms(ants_branch) {
                if let Some(name) = atom.name() {
                    if atom.terms().iter().any(|t| t == var) {
                        required.insert(name.to_string());
                    }
                }
            }
            subs.push((var.clone(), required));
        }
        Self {
            id,
            rule: Arc::clone(rule),
            cons: cons.to_string(),
            ants,
            subs,
        }
    }
}

/// The atom currently being proven.
#[derive(Debug, Clone)]
struct ActiveQuery {
    subject: String,
    name: String,
}

// ---------------------------------------------------------------------------
// The engine
// ---------------------------------------------------------------------------

/// One inference run over a live store.
///
/// All working state (node map, memoization tables, object dictionary,
/// results) is per-query; derived facts are written to the store as they
/// commit, while their provenance accumulates in a [`BmsLite`] promoted on
/// completion.
pub struct Inference<'a> {
    kb: &'a Representation,
    lite: BmsLite,
    vrs: HashSet<String>,
    nodes: HashMap<String, Vec<Arc<InferNode>>>,
    memo_ok: HashMap<u64, HashSet<u64>>,
    memo_failed: HashMap<u64, HashSet<u64>>,
    obj_dic: HashMap<String, HashSet<String>>,
    results: QueryResults,
    updated: bool,
    actv: Option<ActiveQuery>,
    node_ids: u64,
}

impl<'a> Inference<'a> {
    pub fn new(kb: &'a Representation) -> Self {
        Self {
            kb,
            lite: BmsLite::new(),
            vrs: HashSet::new(),
            nodes: HashMap::new(),
            memo_ok: HashMap::new(),
            memo_failed: HashMap::new(),
            obj_dic: HashMap::new(),
            results: QueryResults::new(),
            updated: false,
            actv: None,
            node_ids: 0,
        }
    }

    /// Run the full pipeline for a parsed query batch.
    pub fn run(mut self, batch: ParsedBatch) -> DoxaResult<QueryResults> {
        let (terms, ctgs) = self.normalize(batch);
        self.discover_rules(ctgs);

        for (subject, preds) in terms {
            if self.vrs.contains(&subject) {
                self.solve_free(&preds);
            } else {
                for pred in &preds {
                    let name = pred.name().to_string();
                    let already = self
                        .results
                        .get(&subject)
                        .and_then(|r| r.get(&name))
                        .is_some();
                    if !already {
                        self.solve(&subject, &name, pred);
                    }
                }
            }
        }

        self.lite.promote(self.kb);
        Ok(self.results)
    }

    // -- stage 1: query normalization ---------------------------------------

    fn seed_memb(
        &mut self,
        m: Membership,
        terms: &mut HashMap<String, Vec<Assertion>>,
        ctgs: &mut Vec<String>,
    ) {
        match self.kb.test_memb(&m) {
            Some(result) => {
                self.results
                    .entry(m.term.clone())
                    .or_default()
                    .insert(m.parent.clone(), Some(result));
            }
            None => {
                ctgs.push(m.parent.clone());
                terms
                    .entry(m.term.clone())
                    .or_default()
                    .push(Assertion::Memb(m));
            }
        }
    }

    fn seed_rel(
        &mut self,
        r: Relation,
        terms: &mut HashMap<String, Vec<Assertion>>,
        ctgs: &mut Vec<String>,
    ) {
        let subjects: Vec<String> = r.arg_terms().map(str::to_string).collect();
        match self.kb.test_rel(&r) {
            Some(result) => {
                for subject in subjects {
                    self.results
                        .entry(subject)
                        .or_default()
                        .insert(r.func.clone(), Some(result));
                }
            }
            None => {
                ctgs.push(r.func.clone());
                // An atom with free subjects is proven through them alone;
                // its grounded arguments are not query subjects themselves.
                let free: Vec<&String> = subjects
                    .iter()
                    .filter(|s| self.vrs.contains(*s))
                    .collect();
                let queue_under: Vec<String> = if free.is_empty() {
                    subjects
                } else {
                    free.into_iter().cloned().collect()
                };
                for subject in queue_under {
                    terms
                        .entry(subject)
                        .or_default()
                        .push(Assertion::Rel(r.clone()));
                }
            }
        }
    }

    fn normalize(
        &mut self,
        batch: ParsedBatch,
    ) -> (HashMap<String, Vec<Assertion>>, Vec<String>) {
        let mut terms: HashMap<String, Vec<Assertion>> = HashMap::new();
        let mut ctgs: Vec<String> = Vec::new();

        for r in batch.assert_rel {
            self.seed_rel(r, &mut terms, &mut ctgs);
        }
        for m in batch.assert_memb {
            self.seed_memb(m, &mut terms, &mut ctgs);
        }
        for query in batch.queries {
            self.vrs.extend(query.var_order.iter().cloned());
            for m in query.preds {
                self.seed_memb(m, &mut terms, &mut ctgs);
            }
            for r in query.funcs {
                self.seed_rel(r, &mut terms, &mut ctgs);
            }
        }
        (terms, ctgs)
    }

    // -- stage 2: rule discovery --------------------------------------------

    fn rules_for_consequent(&self, name: &str) -> Result<Vec<Arc<LogSentence>>, InferError> {
        let rules = self.kb.rules_for(name);
        if rules.is_empty() {
            Err(InferError::NoRules {
                name: name.to_string(),
            })
        } else {
            Ok(rules)
        }
    }

    fn discover_rules(&mut self, seeds: Vec<String>) {
        let mut worklist = seeds;
        let mut done: Vec<String> = Vec::new();
        let mut seen_rules: HashSet<u64> = HashSet::new();

        while let Some(name) = worklist.pop() {
            if done.contains(&name) {
                continue;
            }
            done.push(name.clone());
            let rules = match self.rules_for_consequent(&name) {
                Ok(rules) => rules,
                // No rules for this consequent: unknown from rules.
                Err(err) => {
                    tracing::trace!(%err, "rule discovery");
                    continue;
                }
            };
            for rule in rules {
                if !seen_rules.insert(rule.id) {
                    continue;
                }
                let lhs_names = rule.branch_names(Branch::Left);
                self.mk_nodes(&rule, Branch::Right);
                for n in &lhs_names {
                    if !done.contains(n) && !worklist.contains(n) {
                        worklist.push(n.clone());
                    }
                }
                // The query name sits on the left side too: the rule also
                // works backwards, with the sides swapped.
                if lhs_names.iter().any(|n| *n == name) {
                    self.mk_nodes(&rule, Branch::Left);
                    for n in rule.branch_names(Branch::Right) {
                        if !done.contains(&n) && !worklist.contains(&n) {
                            worklist.push(n);
                        }
                    }
                }
            }
        }

        // Newest rules take precedence within each consequent bucket.
        for bucket in self.nodes.values_mut() {
            bucket.sort_by(|a, b| (b.rule.created, b.rule.id).cmp(&(a.rule.created, a.rule.id)));
        }

        let chk_ctgs: HashSet<String> = done.into_iter().collect();
        self.obj_dic = self.kb.objs_by_ctg(&chk_ctgs, EntityKind::Individuals);
        self.obj_dic
            .extend(self.kb.objs_by_ctg(&chk_ctgs, EntityKind::Classes));
    }

    fn mk_nodes(&mut self, rule: &Arc<LogSentence>, cons_branch: Branch) {
        let ants_branch = match cons_branch {
            Branch::Left => Branch::Right,
            Branch::Right => Branch::Left,
        };
        for cons in rule.branch_names(cons_branch) {
            self.node_ids += 1;
            let node = InferNode::build(rule, &cons, ants_branch, self.node_ids);
            self.nodes.entry(cons).or_default().push(Arc::new(node));
        }
    }

    // -- stage 4: unification -----------------------------------------------

    /// Prove one grounded atom, restarting the unification pass while rule
    /// applications keep updating the object dictionary.
    fn solve(&mut self, subject: &str, name: &str, pred: &Assertion) {
        self.actv = Some(ActiveQuery {
            subject: subject.to_string(),
            name: name.to_string(),
        });
        // Fresh memoization tables per active query.
        self.memo_ok.values_mut().for_each(HashSet::clear);
        self.memo_failed.values_mut().for_each(HashSet::clear);

        loop {
            self.updated = false;
            let mut chk = VecDeque::new();
            let mut done = Vec::new();
            let proved = self.unify(name.to_string(), &mut chk, &mut done, pred);
            if proved || !self.updated {
                break;
            }
            // New facts may unblock combinations that failed last pass.
            self.memo_failed.values_mut().for_each(HashSet::clear);
        }

        // Derived atoms already exist in the store; a final direct lookup
        // settles anything the comparison pass missed.
        let slot = self
            .results
            .entry(subject.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert(None);
        if slot.is_none() {
            *slot = self.kb.test_pred(pred);
        }
    }

    /// Free-variable query: every subject holding the queried name gets a
    /// direct check, falling back to inference for unknowns.
    fn solve_free(&mut self, preds: &[Assertion]) {
        for pred in preds {
            let name = pred.name().to_string();
            let holders: Vec<String> = self
                .obj_dic
                .iter()
                .filter(|(_, held)| held.contains(&name))
                .map(|(obj, _)| obj.clone())
                .collect();
            for obj in holders {
                let grounded = match pred {
                    Assertion::Memb(m) => Assertion::Memb(m.substitute(&obj)),
                    Assertion::Rel(r) => {
                        let mut bindings = HashMap::new();
                        for v in &self.vrs {
                            bindings.insert(v.clone(), obj.clone());
                        }
                        Assertion::Rel(r.substitute(&bindings))
                    }
                };
                match self.kb.test_pred(&grounded) {
                    Some(result) => {
                        self.results
                            .entry(obj.clone())
                            .or_default()
                            .insert(name.clone(), Some(result));
                    }
                    None => self.solve(&obj, &name, &grounded),
                }
            }
        }
    }

    fn unify(
        &mut self,
        name: String,
        chk: &mut VecDeque<String>,
        done: &mut Vec<String>,
        pred: &Assertion,
    ) -> bool {
        if let Some(bucket) = self.nodes.get(&name) {
            let bucket: Vec<Arc<InferNode>> = bucket.to_vec();
            for node in bucket {
                tracing::trace!(cons = %node.cons, rule = node.rule.id, "unifying node");
                let candidates = self.map_vars(&node);
                for combo in cartesian(&candidates) {
                    let key = combo_hash(&combo);
                    let tried = self
                        .memo_ok
                        .get(&node.id)
                        .is_some_and(|s| s.contains(&key))
                        || self
                            .memo_failed
                            .get(&node.id)
                            .is_some_and(|s| s.contains(&key));
                    if tried {
                        continue;
                    }
                    match node.rule.call(self.kb, &self.lite, &combo) {
                        RuleOutcome::Committed(asserted) => {
                            self.updated = true;
                            self.memo_ok.entry(node.id).or_default().insert(key);
                            for a in &asserted {
                                for term in a.atom.terms() {
                                    self.obj_dic
                                        .entry(term.to_string())
                                        .or_default()
                                        .insert(a.atom.name().to_string());
                                }
                                self.record_if_answer(pred, &a.atom);
                            }
                        }
                        RuleOutcome::False | RuleOutcome::Unknown => {
                            self.memo_failed.entry(node.id).or_default().insert(key);
                        }
                    }
                }
                if !done.contains(&name) {
                    for ant in node.ants.iter().rev() {
                        chk.push_front(ant.clone());
                    }
                }
            }
        }

        if let Some(actv) = &self.actv {
            if self
                .obj_dic
                .get(&actv.subject)
                .is_some_and(|held| held.contains(&actv.name))
            {
                return true;
            }
        }
        if let Some(next) = chk.pop_front() {
            done.push(name);
            return self.unify(next, chk, done, pred);
        }
        false
    }

    /// Record a derived atom into the results when it answers the active
    /// query; structurally incomparable atoms are skipped, not failed.
    fn record_if_answer(&mut self, pred: &Assertion, derived: &Assertion) {
        let Some(actv) = self.actv.clone() else { return };
        let now = chrono::Utc::now();
        let answer = match (pred, derived) {
            (Assertion::Memb(q), Assertion::Memb(r)) => q
                .compatible(r)
                .ok()
                .filter(|_| r.term == actv.subject)
                .map(|_| q.satisfied_by(r, now)),
            (Assertion::Rel(q), Assertion::Rel(r)) => q.satisfied_by(r, now).ok(),
            _ => None,
        };
        if let Some(value) = answer {
            self.results
                .entry(actv.subject)
                .or_default()
                .insert(actv.name, Some(value));
        }
    }

    /// Candidate substitutions per rule variable: subjects whose held names
    /// cover the variable's requirement set. An unconstrained variable
    /// ranges over every known subject.
    fn map_vars(&self, node: &InferNode) -> Vec<Vec<String>> {
        node.subs
            .iter()
            .map(|(_, required)| {
                let mut candidates: Vec<String> = self
                    .obj_dic
                    .iter()
                    .filter(|(_, held)| required.is_subset(held))
                    .map(|(obj, _)| obj.clone())
                    .collect();
                candidates.sort_unstable();
                candidates
            })
            .collect()
    }
}

/// Every combination of one candidate per variable; a rule without
/// variables yields the single empty combination.
fn cartesian(candidates: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut combos: Vec<Vec<String>> = vec![Vec::new()];
    for options in candidates {
        let mut next = Vec::with_capacity(combos.len() * options.len());
        for combo in &combos {
            for option in options {
                let mut extended = combo.clone();
                extended.push(option.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

fn combo_hash(combo: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for item in combo {
        item.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{Answer, Representation};

    #[test]
    fn cartesian_product_shapes() {
        assert_eq!(cartesian(&[]), vec![Vec::<String>::new()]);
        let combos = cartesian(&[
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string()],
        ]);
        assert_eq!(combos.len(), 2);
        assert!(combos.contains(&vec!["a".to_string(), "c".to_string()]));
        // An empty candidate set kills every combination.
        assert!(cartesian(&[vec![], vec!["c".to_string()]]).is_empty());
    }

    #[test]
    fn combo_hash_is_order_sensitive() {
        let ab = combo_hash(&["a".to_string(), "b".to_string()]);
        let ba = combo_hash(&["b".to_string(), "a".to_string()]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn direct_lookup_short_circuits() {
        let kb = Representation::new();
        kb.tell("professor[$Lucy,u=1]").unwrap();
        assert_eq!(kb.ask("professor[$Lucy,u=1]").unwrap(), Answer::True);
        assert_eq!(kb.ask("professor[$Lucy,u=0.5]").unwrap(), Answer::False);
        assert_eq!(kb.ask("student[$Lucy,u=1]").unwrap(), Answer::Unknown);
    }

    #[test]
    fn backward_chaining_derives_consequent() {
        let kb = Representation::new();
        kb.tell("professor[$Lucy,u=1]").unwrap();
        kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])")
            .unwrap();

        assert_eq!(kb.ask("person[$Lucy,u=1]").unwrap(), Answer::True);
        // Idempotence: the same ask on the unchanged store agrees.
        assert_eq!(kb.ask("person[$Lucy,u=1]").unwrap(), Answer::True);
    }

    #[test]
    fn unification_tries_multi_variable_substitutions() {
        let kb = Representation::new();
        // A two-variable rule never fires from single-subject forward
        // propagation; only ask-time unification can derive the consequent.
        kb.tell(":vars: x, y: (<friend[x,u=1;y]> && crazy[x,u=1] |> crazy[y,u=1])")
            .unwrap();
        kb.tell("<friend[$John,u=1;$Lucy]>").unwrap();
        kb.tell("crazy[$John,u=1]").unwrap();

        assert_eq!(
            kb.test_pred(&Assertion::Memb(
                crate::atom::Membership::new(
                    "crazy",
                    "$Lucy",
                    crate::atom::Comparator::Equal,
                    1.0
                )
                .unwrap()
            )),
            None
        );
        assert_eq!(kb.ask("crazy[$Lucy,u=1]").unwrap(), Answer::True);
        // The derivation now lives in the store and carries provenance.
        assert!(kb.bms().contains("crazy[$Lucy,u=1]"));
    }

    #[test]
    fn chained_rules_resolve_transitively() {
        let kb = Representation::new();
        kb.tell(":vars: x: (person[x,u=1] |> mortal[x,u=1])").unwrap();
        kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])")
            .unwrap();
        kb.tell("professor[$Lucy,u=1]").unwrap();

        assert_eq!(kb.ask("mortal[$Lucy,u=1]").unwrap(), Answer::True);
    }

    #[test]
    fn free_variable_query_maps_all_holders() {
        let kb = Representation::new();
        kb.tell("animal[cow,u=1]").unwrap();
        kb.tell("animal[chicken,u=1]").unwrap();

        let results = kb.ask_all(":vars: x: (animal[x,u=1])").unwrap();
        assert_eq!(results["cow"]["animal"], Some(true));
        assert_eq!(results["chicken"]["animal"], Some(true));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn relation_query_false_on_value_mismatch() {
        let kb = Representation::new();
        kb.tell("<friend[$John,u=1;$Lucy]>").unwrap();
        assert_eq!(kb.ask("<friend[$Lucy,u=0;$John]>").unwrap(), Answer::False);
    }

    #[test]
    fn unknown_when_antecedent_missing() {
        let kb = Representation::new();
        kb.tell(":vars: x: (bird[x,u=1] && hasWings[x,u=1] |> flies[x,u=1])")
            .unwrap();
        kb.tell("bird[$Tweety,u=1]").unwrap();

        assert_eq!(kb.ask("flies[$Tweety,u=1]").unwrap(), Answer::Unknown);

        kb.tell("hasWings[$Tweety,u=1]").unwrap();
        assert_eq!(kb.ask("flies[$Tweety,u=1]").unwrap(), Answer::True);
    }

    #[test]
    fn derived_fact_has_provenance() {
        let kb = Representation::new();
        kb.tell("professor[$Lucy,u=1]").unwrap();
        kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])")
            .unwrap();

        assert!(kb.bms().contains("person[$Lucy,u=1]"));
        let record = kb.bms().get("person[$Lucy,u=1]").unwrap();
        assert_eq!(record.prev, Some(vec!["professor[$Lucy,u=1]".to_string()]));
    }

    #[test]
    fn no_rules_error_formats() {
        let err = InferError::NoRules {
            name: "person".into(),
        };
        assert!(format!("{err}").contains("person"));
    }
}
