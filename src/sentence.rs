//! Logical sentences: connective trees over atoms, evaluated by resolution
//! or conditional assertion.
//!
//! A [`LogSentence`] owns a tree of particles (connective nodes and atom
//! leaves), an ordered variable list and a creation timestamp used for rule
//! precedence. Evaluation is two explicit traversals:
//!
//! - **resolve** computes a tri-valued truth for a subtree, consulting the
//!   store for every atom and recording each match for provenance;
//! - **substitute** asserts the atoms of a subtree into the store.
//!
//! The indicative conditional `|>` is the only node that does both, in that
//! order: if the antecedent resolves true, the consequent is substituted.
//! Connective placement is validated at construction; a sentence carrying a
//! disjunction, implication or equivalence inside a consequent is rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::atom::{Assertion, Atom, TimeArg};
use crate::bms::BeliefSink;
use crate::error::{DoxaResult, SentenceError};
use crate::parser::{Expr, VarDecl, VarKind};
use crate::repr::Representation;

static SENTENCE_IDS: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Tree structure
// ---------------------------------------------------------------------------

/// A logical connective node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connective {
    /// `|>` — if the left side is true, assert the right side.
    IndCond,
    /// `<=>`
    Equiv,
    /// `=>`
    Implies,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl std::fmt::Display for Connective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connective::IndCond => write!(f, "|>"),
            Connective::Equiv => write!(f, "<=>"),
            Connective::Implies => write!(f, "=>"),
            Connective::And => write!(f, "&&"),
            Connective::Or => write!(f, "||"),
        }
    }
}

/// A node in a sentence tree: a binary connective or an atom leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Particle {
    Conn {
        op: Connective,
        children: Box<[Particle; 2]>,
    },
    Atom(Atom),
}

impl Particle {
    fn from_expr(expr: Expr) -> Self {
        match expr {
            Expr::Atom(atom) => Particle::Atom(atom),
            Expr::Conn { op, lhs, rhs } => Particle::Conn {
                op,
                children: Box::new([Self::from_expr(*lhs), Self::from_expr(*rhs)]),
            },
        }
    }

    fn depth(&self) -> usize {
        match self {
            Particle::Atom(_) => 0,
            Particle::Conn { children, .. } => {
                1 + children[0].depth().max(children[1].depth())
            }
        }
    }
}

/// Evaluation position of a particle, used both for construction-time
/// validation and for branch classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Top,
    Antecedent,
    Consequent,
}

fn validate(p: &Particle, pos: Position) -> Result<(), SentenceError> {
    match p {
        Particle::Atom(Atom::TimeCmp(_)) if pos == Position::Consequent => {
            Err(SentenceError::TimeCompareAssert)
        }
        Particle::Atom(_) => Ok(()),
        Particle::Conn { op, children } => match op {
            Connective::IndCond => {
                if pos == Position::Antecedent {
                    return Err(SentenceError::NestedIndCond);
                }
                validate(&children[0], Position::Antecedent)?;
                validate(&children[1], Position::Consequent)
            }
            Connective::And => {
                let inner = if pos == Position::Top {
                    Position::Antecedent
                } else {
                    pos
                };
                validate(&children[0], inner)?;
                validate(&children[1], inner)
            }
            Connective::Or | Connective::Implies | Connective::Equiv => {
                if pos == Position::Consequent {
                    return Err(SentenceError::IllegalConnective { op: op.to_string() });
                }
                validate(&children[0], Position::Antecedent)?;
                validate(&children[1], Position::Antecedent)
            }
        },
    }
}

/// Side of a sentence relative to its conditional structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Left,
    Right,
}

// ---------------------------------------------------------------------------
// Sentences
// ---------------------------------------------------------------------------

/// A first-order logic sentence: a particle tree with its variables.
///
/// Sentences are built by the parser and shared into the cognition indexes
/// of every category they mention. Newer sentences take precedence during
/// inference, ordered by `created`.
#[derive(Debug, Clone)]
pub struct LogSentence {
    /// Stable identity for dedup in cognition indexes and BMS records.
    pub id: u64,
    start: Particle,
    /// Ordered object variables; call arity must match when non-empty.
    pub var_order: Vec<String>,
    /// Declared time-typed variables.
    pub time_vars: Vec<String>,
    /// Time variables with a declared default, merged into every call.
    pub pre_assigned: HashMap<String, TimeArg>,
    /// Maximum connective nesting.
    pub depth: usize,
    /// Creation timestamp; newer rules win ties during inference.
    pub created: DateTime<Utc>,
}

impl LogSentence {
    /// Build a sentence from a parsed expression, validating connective
    /// placement.
    pub fn new(expr: Expr, decls: Vec<VarDecl>) -> Result<Self, SentenceError> {
        let start = Particle::from_expr(expr);
        validate(&start, Position::Top)?;

        let mut var_order = Vec::new();
        let mut time_vars = Vec::new();
        let mut pre_assigned = HashMap::new();
        for decl in decls {
            match decl.kind {
                VarKind::Object => var_order.push(decl.name),
                VarKind::Time(default) => {
                    if let Some(arg) = default {
                        pre_assigned.insert(decl.name.clone(), arg);
                    }
                    time_vars.push(decl.name);
                }
            }
        }

        Ok(Self {
            id: SENTENCE_IDS.fetch_add(1, Ordering::Relaxed),
            depth: start.depth(),
            start,
            var_order,
            time_vars,
            pre_assigned,
            created: Utc::now(),
        })
    }

    /// Whether the top connective is a conditional (`|>`, `=>` or `<=>`).
    pub fn is_conditional(&self) -> bool {
        matches!(
            self.start,
            Particle::Conn {
                op: Connective::IndCond | Connective::Implies | Connective::Equiv,
                ..
            }
        )
    }

    /// Whether the sentence asserts on success (top-level `|>`).
    pub fn is_assertive(&self) -> bool {
        matches!(
            self.start,
            Particle::Conn {
                op: Connective::IndCond,
                ..
            }
        )
    }

    /// All atom leaves, in tree order.
    pub fn atoms(&self) -> Vec<&Atom> {
        let mut out = Vec::new();
        collect_atoms(&self.start, &mut out);
        out
    }

    /// Atoms on one side of the conditional structure. For a sentence with
    /// no top-level conditional both branches yield every atom.
    pub fn branch_atoms(&self, branch: Branch) -> Vec<&Atom> {
        match &self.start {
            Particle::Conn {
                op: Connective::IndCond | Connective::Implies | Connective::Equiv,
                children,
            } => {
                let mut out = Vec::new();
                let idx = match branch {
                    Branch::Left => 0,
                    Branch::Right => 1,
                };
                collect_atoms(&children[idx], &mut out);
                out
            }
            _ => self.atoms(),
        }
    }

    /// Unique category/relation names on one side, in first-seen order.
    pub fn branch_names(&self, branch: Branch) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for atom in self.branch_atoms(branch) {
            if let Some(name) = atom.name() {
                if !out.iter().any(|n| n == name) {
                    out.push(name.to_string());
                }
            }
        }
        out
    }

    /// Unique names across the whole sentence.
    pub fn all_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for atom in self.atoms() {
            if let Some(name) = atom.name() {
                if !out.iter().any(|n| n == name) {
                    out.push(name.to_string());
                }
            }
        }
        out
    }

    /// Evaluate the sentence against the store with the given variable
    /// substitutions.
    ///
    /// Bindings live in a per-call proof context; the sentence itself is
    /// never mutated, so concurrent calls are safe. For assertive sentences
    /// the consequent atom names are locked for the duration of the call
    /// with a bounded wait; a timeout aborts with [`RuleOutcome::Unknown`].
    pub fn call(
        &self,
        kb: &Representation,
        sink: &dyn BeliefSink,
        args: &[String],
    ) -> RuleOutcome {
        if !self.var_order.is_empty() && self.var_order.len() != args.len() {
            return RuleOutcome::Unknown;
        }

        let now = Utc::now();
        let mut assigned = HashMap::new();
        for (var, constant) in self.var_order.iter().zip(args) {
            if !kb.has_entity(constant) {
                return RuleOutcome::Unknown;
            }
            assigned.insert(var.clone(), constant.clone());
        }
        let mut times = HashMap::new();
        for (var, arg) in &self.pre_assigned {
            let date = match arg {
                TimeArg::Now => now,
                TimeArg::At(d) => *d,
                TimeArg::Var(_) => continue,
            };
            times.insert(var.clone(), date);
        }

        // Atoms the consequent may write are locked before evaluation so
        // rule applications to the same subject serialize.
        let _guard = if self.is_assertive() {
            match kb.lock_atoms(self.branch_names(Branch::Right)) {
                Some(guard) => Some(guard),
                None => {
                    tracing::debug!(sentence = self.id, "lock timeout, aborting evaluation");
                    return RuleOutcome::Unknown;
                }
            }
        } else {
            None
        };

        let mut proof = Proof {
            kb,
            sink,
            sentence: self,
            assigned,
            times,
            matched: Vec::new(),
            asserted: Vec::new(),
            now,
        };

        match &self.start {
            Particle::Conn {
                op: Connective::IndCond,
                children,
            } => match proof.resolve(&children[0]) {
                Some(true) => match proof.substitute(&children[1]) {
                    Ok(()) => RuleOutcome::Committed(proof.asserted),
                    Err(err) => {
                        tracing::debug!(sentence = self.id, %err, "substitution failed");
                        RuleOutcome::Unknown
                    }
                },
                Some(false) => RuleOutcome::False,
                None => RuleOutcome::Unknown,
            },
            other => match proof.resolve(other) {
                Some(true) => RuleOutcome::Committed(Vec::new()),
                Some(false) => RuleOutcome::False,
                None => RuleOutcome::Unknown,
            },
        }
    }
}

fn collect_atoms<'a>(p: &'a Particle, out: &mut Vec<&'a Atom>) {
    match p {
        Particle::Atom(atom) => out.push(atom),
        Particle::Conn { children, .. } => {
            collect_atoms(&children[0], out);
            collect_atoms(&children[1], out);
        }
    }
}

impl std::fmt::Display for LogSentence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn render(p: &Particle, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match p {
                Particle::Atom(atom) => write!(f, "{atom}"),
                Particle::Conn { op, children } => {
                    write!(f, "(")?;
                    render(&children[0], f)?;
                    write!(f, " {op} ")?;
                    render(&children[1], f)?;
                    write!(f, ")")
                }
            }
        }
        if !self.var_order.is_empty() || !self.time_vars.is_empty() {
            write!(f, ":vars: ")?;
            let mut first = true;
            for v in &self.var_order {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{v}")?;
                first = false;
            }
            for v in &self.time_vars {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{v}:time")?;
                first = false;
            }
            write!(f, ": ")?;
        }
        render(&self.start, f)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// A grounded atom committed by a substitution, with whether it changed the
/// store (new atom or new value).
#[derive(Debug, Clone)]
pub struct Asserted {
    pub atom: Assertion,
    pub changed: bool,
}

/// Tri-valued outcome of calling a sentence.
///
/// Substitution is side-effect-only: `Committed` carries the asserted atoms
/// (empty for pure-resolution sentences that evaluated true), `False` means
/// the antecedent resolved false, `Unknown` covers everything else
/// (unresolved atoms, arity mismatch, lock timeout).
#[derive(Debug, Clone)]
pub enum RuleOutcome {
    Committed(Vec<Asserted>),
    False,
    Unknown,
}

impl RuleOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, RuleOutcome::Committed(_))
    }
}

/// Per-call evaluation context: bindings, matches and assertions.
struct Proof<'a> {
    kb: &'a Representation,
    sink: &'a dyn BeliefSink,
    sentence: &'a LogSentence,
    assigned: HashMap<String, String>,
    times: HashMap<String, DateTime<Utc>>,
    matched: Vec<String>,
    asserted: Vec<Asserted>,
    now: DateTime<Utc>,
}

impl Proof<'_> {
    fn binding<'b>(&'b self, term: &'b str) -> &'b str {
        self.assigned.get(term).map(String::as_str).unwrap_or(term)
    }

    fn resolve(&mut self, p: &Particle) -> Option<bool> {
        match p {
            Particle::Atom(Atom::Memb(m)) => {
                let test = m.substitute(self.binding(&m.term));
                let result = self.kb.test_memb(&test);
                if result == Some(true) {
                    let assertion = Assertion::Memb(test);
                    if let Some(var) = &m.time_var {
                        if let Some(date) = self.kb.assertion_date(&assertion) {
                            self.times.insert(var.clone(), date);
                        }
                    }
                    self.matched.push(assertion.key());
                }
                result
            }
            Particle::Atom(Atom::Func(func)) => {
                let test = func.substitute(&self.assigned);
                let result = self.kb.test_rel(&test);
                if result == Some(true) {
                    let assertion = Assertion::Rel(test);
                    if let Some(var) = &func.time_var {
                        if let Some(date) = self.kb.assertion_date(&assertion) {
                            self.times.insert(var.clone(), date);
                        }
                    }
                    self.matched.push(assertion.key());
                }
                result
            }
            Particle::Atom(Atom::TimeCmp(cmp)) => cmp.eval(&self.times, self.now),
            Particle::Conn { op, children } => {
                let [lhs, rhs] = children.as_ref();
                match op {
                    Connective::And => {
                        let l = self.resolve(lhs);
                        let r = self.resolve(rhs);
                        match (l, r) {
                            (Some(false), _) | (_, Some(false)) => Some(false),
                            (Some(true), Some(true)) => Some(true),
                            _ => None,
                        }
                    }
                    Connective::Or => {
                        let l = self.resolve(lhs);
                        let r = self.resolve(rhs);
                        match (l, r) {
                            (Some(true), _) | (_, Some(true)) => Some(true),
                            (Some(false), Some(false)) => Some(false),
                            _ => None,
                        }
                    }
                    Connective::Implies => {
                        let l = self.resolve(lhs)?;
                        let r = self.resolve(rhs)?;
                        Some(!(l && !r))
                    }
                    Connective::Equiv => {
                        let l = self.resolve(lhs)?;
                        let r = self.resolve(rhs)?;
                        Some(l == r)
                    }
                    // Construction forbids `|>` in resolve positions.
                    Connective::IndCond => None,
                }
            }
        }
    }

    fn substitute(&mut self, p: &Particle) -> DoxaResult<()> {
        match p {
            Particle::Atom(Atom::Memb(m)) => {
                let mut ground = m.substitute(self.binding(&m.term));
                ground.time_var = None;
                let assertion = Assertion::Memb(ground.clone());
                self.sink
                    .asserted(self.kb, &assertion, self.sentence, &self.matched);
                let changed = self.kb.up_memb(ground)?;
                self.asserted.push(Asserted {
                    atom: assertion,
                    changed,
                });
                Ok(())
            }
            Particle::Atom(Atom::Func(func)) => {
                let mut ground = func.substitute(&self.assigned);
                ground.time_var = None;
                let assertion = Assertion::Rel(ground.clone());
                self.sink
                    .asserted(self.kb, &assertion, self.sentence, &self.matched);
                let changed = self.kb.up_rel(ground)?;
                self.asserted.push(Asserted {
                    atom: assertion,
                    changed,
                });
                Ok(())
            }
            // Construction keeps time comparisons out of consequents.
            Particle::Atom(Atom::TimeCmp(_)) => Ok(()),
            Particle::Conn { op, children } => {
                let [lhs, rhs] = children.as_ref();
                match op {
                    Connective::And => {
                        self.substitute(lhs)?;
                        self.substitute(rhs)
                    }
                    Connective::IndCond => {
                        // A nested conditional resolves its own antecedent
                        // before asserting; a false or unknown antecedent
                        // skips the branch without failing the sentence.
                        if self.resolve(lhs) == Some(true) {
                            self.substitute(rhs)?;
                        }
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseMode, parse};

    fn rule(text: &str) -> LogSentence {
        let mut batch = parse(text, ParseMode::Tell).unwrap();
        batch
            .assert_rules
            .pop()
            .or_else(|| batch.assert_cogs.pop())
            .expect("expected a sentence")
    }

    #[test]
    fn illegal_connective_in_consequent() {
        let err = parse(
            ":vars: x: (professor[x,u=1] |> person[x,u=1] || human[x,u=1])",
            ParseMode::Tell,
        );
        assert!(matches!(
            err,
            Err(crate::error::DoxaError::Sentence(
                SentenceError::IllegalConnective { .. }
            ))
        ));
    }

    #[test]
    fn implication_in_consequent_rejected() {
        let err = parse(
            ":vars: x: (a[x,u=1] |> (b[x,u=1] => c[x,u=1]))",
            ParseMode::Tell,
        );
        assert!(matches!(
            err,
            Err(crate::error::DoxaError::Sentence(
                SentenceError::IllegalConnective { .. }
            ))
        ));
    }

    #[test]
    fn nested_icond_in_antecedent_rejected() {
        let err = parse(
            ":vars: x: ((a[x,u=1] |> b[x,u=1]) |> c[x,u=1])",
            ParseMode::Tell,
        );
        assert!(matches!(
            err,
            Err(crate::error::DoxaError::Sentence(SentenceError::NestedIndCond))
        ));
    }

    #[test]
    fn nested_icond_in_consequent_accepted() {
        let sent = rule(":vars: x: (a[x,u=1] |> (b[x,u=1] |> c[x,u=1]))");
        assert!(sent.is_assertive());
        assert_eq!(sent.depth, 2);
    }

    #[test]
    fn branch_classification() {
        let sent = rule(":vars: x: (bird[x,u=1] && hasWings[x,u=1] |> flies[x,u=1])");
        assert_eq!(sent.branch_names(Branch::Left), vec!["bird", "hasWings"]);
        assert_eq!(sent.branch_names(Branch::Right), vec!["flies"]);
        assert_eq!(sent.all_names(), vec!["bird", "hasWings", "flies"]);
    }

    #[test]
    fn non_conditional_sentence_has_single_branch() {
        let sent = rule(":vars: x: (animal[x,u=1])");
        assert_eq!(sent.branch_names(Branch::Left), vec!["animal"]);
        assert_eq!(sent.branch_names(Branch::Right), vec!["animal"]);
        assert!(!sent.is_conditional());
    }

    #[test]
    fn sentence_ids_are_unique_and_ordered() {
        let a = rule(":vars: x: (a[x,u=1] |> b[x,u=1])");
        let b = rule(":vars: x: (a[x,u=1] |> c[x,u=1])");
        assert_ne!(a.id, b.id);
        assert!(a.created <= b.created);
    }

    #[test]
    fn display_round_trips_structure() {
        let sent = rule(":vars: x: (professor[x,u=1] |> person[x,u=1])");
        assert_eq!(
            sent.to_string(),
            ":vars: x: (professor[x,u=1] |> person[x,u=1])"
        );
    }
}
