//! Logical atoms: fuzzy membership predicates, n-ary relation functions and
//! time comparisons.
//!
//! An atom is a ground logical unit. Memberships place a subject in a
//! category with a fuzzy degree; relations map an object to a subject (and
//! optional further arguments) under a named function, with the truth value
//! carried by the first argument; time comparisons test date variables bound
//! during sentence evaluation.
//!
//! Atoms carry two temporal records: `dates` is the validity interval list
//! (an even number of entries means the atom is currently false, odd means
//! currently true since the last entry), and `history` is the trail of
//! superseded values appended on every in-place update.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AtomError;

/// Result alias for atom-level operations.
pub type AtomResult<T> = std::result::Result<T, AtomError>;

/// Subjects whose names begin with `$` denote concrete individuals; all
/// other names denote categories.
pub fn is_individual_name(name: &str) -> bool {
    name.starts_with('$')
}

// ---------------------------------------------------------------------------
// Comparators
// ---------------------------------------------------------------------------

/// Comparator attached to a fuzzy value or a time comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// `=`
    Equal,
    /// `>`
    More,
    /// `<`
    Less,
}

impl Comparator {
    /// Apply the comparator with `self` read as `stored OP query`:
    /// `=` needs equality, `>` needs `stored > query`, `<` needs
    /// `stored < query`.
    pub fn holds(self, stored: f32, query: f32) -> bool {
        match self {
            Comparator::Equal => stored == query,
            Comparator::More => stored > query,
            Comparator::Less => stored < query,
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Equal => write!(f, "="),
            Comparator::More => write!(f, ">"),
            Comparator::Less => write!(f, "<"),
        }
    }
}

/// Check a fuzzy value against the [0, 1] domain.
fn check_value(value: f32) -> AtomResult<f32> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        Err(AtomError::ValueBounds { value })
    } else {
        Ok(value)
    }
}

/// Current time-truth of a validity date list: empty lists are vacuously
/// true, otherwise the parity rule applies and the last entry must not lie
/// in the future.
fn time_truth(dates: &[DateTime<Utc>], at: DateTime<Utc>) -> bool {
    match dates.last() {
        None => true,
        Some(last) => dates.len() % 2 == 1 && *last <= at,
    }
}

/// A superseded value retained when an atom is updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    pub value: f32,
    pub op: Comparator,
    pub date: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Membership atoms
// ---------------------------------------------------------------------------

/// A membership atom: `parent[term,u OP value]`.
///
/// The term is a concrete subject name when grounded; inside a sentence a
/// term naming a declared variable is free and bound during unification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    /// The category the subject belongs to.
    pub parent: String,
    /// The subject name (or a variable inside a sentence).
    pub term: String,
    /// Fuzzy degree of membership in [0, 1].
    pub value: f32,
    /// Comparator carried by the atom (`=` for plain assertions).
    pub op: Comparator,
    /// Validity interval edges; parity encodes the current truth.
    pub dates: Vec<DateTime<Utc>>,
    /// Superseded values, appended by [`Membership::update`].
    pub history: Vec<TimedValue>,
    /// Variable capturing the matched atom's latest date during evaluation.
    pub time_var: Option<String>,
}

impl Membership {
    /// Create a membership atom, rejecting values outside [0, 1].
    pub fn new(
        parent: impl Into<String>,
        term: impl Into<String>,
        op: Comparator,
        value: f32,
    ) -> AtomResult<Self> {
        Ok(Self {
            parent: parent.into(),
            term: term.into(),
            value: check_value(value)?,
            op,
            dates: Vec::new(),
            history: Vec::new(),
            time_var: None,
        })
    }

    /// Clone the atom with its term replaced by a binding.
    pub fn substitute(&self, term: impl Into<String>) -> Self {
        let mut subs = self.clone();
        subs.term = term.into();
        subs
    }

    /// Check that two membership atoms describe the same slot. A mismatch
    /// is an error the inference layer treats as "no match".
    pub fn compatible(&self, other: &Membership) -> AtomResult<()> {
        if self.parent != other.parent || self.term != other.term {
            return Err(AtomError::NotCompAssert {
                left: self.to_string(),
                right: other.to_string(),
            });
        }
        Ok(())
    }

    /// Whether this atom, read as a query, is satisfied by a stored atom for
    /// the same slot. Short-circuits on a time-truth mismatch, then applies
    /// the query comparator against the stored value.
    pub fn satisfied_by(&self, stored: &Membership, at: DateTime<Utc>) -> bool {
        if time_truth(&self.dates, at) != time_truth(&stored.dates, at) {
            return false;
        }
        self.op.holds(stored.value, self.value)
    }

    /// Replace value and comparator in place, appending the superseded value
    /// to the history. Returns `true` when anything actually changed.
    pub fn update(&mut self, newer: &Membership) -> bool {
        if self.value == newer.value && self.op == newer.op {
            return false;
        }
        self.history.push(TimedValue {
            value: self.value,
            op: self.op,
            date: Utc::now(),
        });
        self.value = newer.value;
        self.op = newer.op;
        true
    }

    /// The most recent date associated with this atom: the last validity
    /// edge, or the last update, or `None` for a pristine atom.
    pub fn latest_date(&self) -> Option<DateTime<Utc>> {
        self.dates
            .last()
            .copied()
            .or_else(|| self.history.last().map(|t| t.date))
    }
}

impl std::fmt::Display for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{},u{}{}]", self.parent, self.term, self.op, self.value)
    }
}

// ---------------------------------------------------------------------------
// Relation atoms
// ---------------------------------------------------------------------------

/// One argument of a relation atom: a term with an optional fuzzy value.
///
/// Only the value at position 0 (the object of the relation) carries truth;
/// values parsed at other positions are kept for display but never compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncArg {
    pub term: String,
    pub uval: Option<(Comparator, f32)>,
}

impl FuncArg {
    pub fn bare(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            uval: None,
        }
    }

    pub fn with_val(term: impl Into<String>, op: Comparator, value: f32) -> AtomResult<Self> {
        Ok(Self {
            term: term.into(),
            uval: Some((op, check_value(value)?)),
        })
    }
}

/// A relation atom: `<func[obj,u OP val;sbj;..]>`.
///
/// `args[0]` is the object of the relation and carries the truth value; the
/// remaining arguments identify the subject and optional indirect objects.
/// `args_id` hashes the ordered argument terms and uniquely identifies the
/// atom within a relation bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub func: String,
    pub args: Vec<FuncArg>,
    pub args_id: u64,
    pub dates: Vec<DateTime<Utc>>,
    pub history: Vec<TimedValue>,
    pub time_var: Option<String>,
}

fn hash_terms<'a>(terms: impl Iterator<Item = &'a str>) -> u64 {
    let mut hasher = DefaultHasher::new();
    for t in terms {
        t.hash(&mut hasher);
    }
    hasher.finish()
}

impl Relation {
    /// Create a relation atom from its argument list.
    pub fn new(func: impl Into<String>, args: Vec<FuncArg>) -> AtomResult<Self> {
        for arg in &args {
            if let Some((_, v)) = arg.uval {
                check_value(v)?;
            }
        }
        let args_id = hash_terms(args.iter().map(|a| a.term.as_str()));
        Ok(Self {
            func: func.into(),
            args,
            args_id,
            dates: Vec::new(),
            history: Vec::new(),
            time_var: None,
        })
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// The truth value carried by the object position, if any.
    pub fn value(&self) -> Option<f32> {
        self.args.first().and_then(|a| a.uval).map(|(_, v)| v)
    }

    /// The comparator on the object position (`=` when absent).
    pub fn op(&self) -> Comparator {
        self.args
            .first()
            .and_then(|a| a.uval)
            .map(|(op, _)| op)
            .unwrap_or(Comparator::Equal)
    }

    /// The ordered argument terms.
    pub fn arg_terms(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|a| a.term.as_str())
    }

    /// Clone with every term that appears in `bindings` replaced, recomputing
    /// the argument hash.
    pub fn substitute(&self, bindings: &HashMap<String, String>) -> Self {
        let mut subs = self.clone();
        for arg in &mut subs.args {
            if let Some(bound) = bindings.get(&arg.term) {
                arg.term = bound.clone();
            }
        }
        subs.args_id = hash_terms(subs.args.iter().map(|a| a.term.as_str()));
        subs
    }

    /// Check structural comparability: arity, function name, positional arg
    /// terms. A mismatch is an error the inference layer treats as "no match".
    pub fn compatible(&self, other: &Relation) -> AtomResult<()> {
        if other.arity() != self.arity() {
            return Err(AtomError::NotCompFunc {
                what: "arity",
                left: self.arity().to_string(),
                right: other.arity().to_string(),
            });
        }
        if other.func != self.func {
            return Err(AtomError::NotCompFunc {
                what: "function",
                left: self.func.clone(),
                right: other.func.clone(),
            });
        }
        for (a, b) in self.args.iter().zip(&other.args) {
            if a.term != b.term {
                return Err(AtomError::NotCompFunc {
                    what: "args",
                    left: a.term.clone(),
                    right: b.term.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether this atom, read as a query, is satisfied by a stored atom.
    /// Errors on structurally incomparable atoms; only `args[0]` carries
    /// truth.
    pub fn satisfied_by(&self, stored: &Relation, at: DateTime<Utc>) -> AtomResult<bool> {
        self.compatible(stored)?;
        if time_truth(&self.dates, at) != time_truth(&stored.dates, at) {
            return Ok(false);
        }
        let (Some(qv), Some(sv)) = (self.value(), stored.value()) else {
            // No truth annotation on either side: identity match suffices.
            return Ok(true);
        };
        Ok(self.op().holds(sv, qv))
    }

    /// Whether two atoms relate the same set of terms under the same
    /// function, ignoring argument order. Used as a comparison fallback so
    /// a query from the subject's side still finds the stored mapping.
    pub fn same_arg_set(&self, other: &Relation) -> bool {
        if self.func != other.func || self.arity() != other.arity() {
            return false;
        }
        let mut left: Vec<&str> = self.arg_terms().collect();
        let mut right: Vec<&str> = other.arg_terms().collect();
        left.sort_unstable();
        right.sort_unstable();
        left == right
    }

    /// Compare only the object values of two atoms under this atom's
    /// comparator, with the time-truth short-circuit.
    pub fn value_match(&self, stored: &Relation, at: DateTime<Utc>) -> Option<bool> {
        if time_truth(&self.dates, at) != time_truth(&stored.dates, at) {
            return Some(false);
        }
        let (qv, sv) = (self.value()?, stored.value()?);
        Some(self.op().holds(sv, qv))
    }

    /// Replace the object value in place, appending the superseded value to
    /// the history. Returns `true` when anything actually changed.
    pub fn update(&mut self, newer: &Relation) -> bool {
        if self.value() == newer.value() && self.op() == newer.op() {
            return false;
        }
        if let Some(v) = self.value() {
            self.history.push(TimedValue {
                value: v,
                op: self.op(),
                date: Utc::now(),
            });
        }
        if let (Some(slot), Some(new0)) = (self.args.first_mut(), newer.args.first()) {
            slot.uval = new0.uval;
        }
        true
    }

    pub fn latest_date(&self) -> Option<DateTime<Utc>> {
        self.dates
            .last()
            .copied()
            .or_else(|| self.history.last().map(|t| t.date))
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}[", self.func)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{}", arg.term)?;
            if let Some((op, val)) = arg.uval {
                write!(f, ",u{op}{val}")?;
            }
        }
        write!(f, "]>")
    }
}

// ---------------------------------------------------------------------------
// Time comparison atoms
// ---------------------------------------------------------------------------

/// One side of a time comparison: a variable, a concrete date, or the
/// evaluation instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeArg {
    Var(String),
    At(DateTime<Utc>),
    Now,
}

impl TimeArg {
    fn resolve(
        &self,
        bindings: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            TimeArg::Var(name) => bindings.get(name).copied(),
            TimeArg::At(date) => Some(*date),
            TimeArg::Now => Some(now),
        }
    }
}

impl std::fmt::Display for TimeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeArg::Var(name) => write!(f, "{name}"),
            TimeArg::At(date) => write!(f, "{}", date.format("%Y.%m.%d.%H.%M.%S")),
            TimeArg::Now => write!(f, "now"),
        }
    }
}

/// A time comparison atom: `timeCalc[a OP b]`.
///
/// Resolves to a boolean once both sides are bound; unresolved date
/// variables defer the comparison and yield unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeCompare {
    pub op: Comparator,
    pub lhs: TimeArg,
    pub rhs: TimeArg,
}

impl TimeCompare {
    pub fn eval(
        &self,
        bindings: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<bool> {
        let lhs = self.lhs.resolve(bindings, now)?;
        let rhs = self.rhs.resolve(bindings, now)?;
        Some(match self.op {
            Comparator::Equal => lhs == rhs,
            Comparator::More => lhs > rhs,
            Comparator::Less => lhs < rhs,
        })
    }

    /// The variable names this comparison depends on.
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        [&self.lhs, &self.rhs].into_iter().filter_map(|a| match a {
            TimeArg::Var(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

impl std::fmt::Display for TimeCompare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timeCalc[{}{}{}]", self.lhs, self.op, self.rhs)
    }
}

// ---------------------------------------------------------------------------
// Sentence leaves
// ---------------------------------------------------------------------------

/// An atom as it appears at a sentence leaf, possibly with free terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Atom {
    Memb(Membership),
    Func(Relation),
    TimeCmp(TimeCompare),
}

impl Atom {
    /// The category or relation name the atom indexes under; time
    /// comparisons have none.
    pub fn name(&self) -> Option<&str> {
        match self {
            Atom::Memb(m) => Some(&m.parent),
            Atom::Func(r) => Some(&r.func),
            Atom::TimeCmp(_) => None,
        }
    }

    /// The subject terms the atom mentions (free or constant).
    pub fn terms(&self) -> Vec<&str> {
        match self {
            Atom::Memb(m) => vec![m.term.as_str()],
            Atom::Func(r) => r.arg_terms().collect(),
            Atom::TimeCmp(_) => Vec::new(),
        }
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Atom::Memb(m) => write!(f, "{m}"),
            Atom::Func(r) => write!(f, "{r}"),
            Atom::TimeCmp(t) => write!(f, "{t}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ground assertions
// ---------------------------------------------------------------------------

/// A grounded atom that can be stored: a membership or a relation.
///
/// Time comparisons never ground; they only test bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Assertion {
    Memb(Membership),
    Rel(Relation),
}

impl Assertion {
    /// The category or relation name the atom indexes under.
    pub fn name(&self) -> &str {
        match self {
            Assertion::Memb(m) => &m.parent,
            Assertion::Rel(r) => &r.func,
        }
    }

    /// The subject terms the atom mentions.
    pub fn terms(&self) -> Vec<&str> {
        match self {
            Assertion::Memb(m) => vec![m.term.as_str()],
            Assertion::Rel(r) => r.arg_terms().collect(),
        }
    }

    /// Canonical string key, used by the belief maintenance system.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Assertion::Memb(m) => write!(f, "{m}"),
            Assertion::Rel(r) => write!(f, "{r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn memb(parent: &str, term: &str, op: Comparator, val: f32) -> Membership {
        Membership::new(parent, term, op, val).unwrap()
    }

    #[test]
    fn value_bounds_enforced() {
        assert!(Membership::new("cold", "$Water", Comparator::Equal, 1.2).is_err());
        assert!(Membership::new("cold", "$Water", Comparator::Equal, -0.1).is_err());
        assert!(Membership::new("cold", "$Water", Comparator::Equal, 0.0).is_ok());
        assert!(Membership::new("cold", "$Water", Comparator::Equal, 1.0).is_ok());
        assert!(FuncArg::with_val("$Water", Comparator::Equal, 7.0).is_err());
    }

    #[test]
    fn membership_comparator_semantics() {
        let now = Utc::now();
        let stored = memb("cold", "$Water", Comparator::Equal, 0.9);

        assert!(memb("cold", "$Water", Comparator::Equal, 0.9).satisfied_by(&stored, now));
        assert!(!memb("cold", "$Water", Comparator::Equal, 0.5).satisfied_by(&stored, now));
        assert!(memb("cold", "$Water", Comparator::Less, 1.0).satisfied_by(&stored, now));
        assert!(memb("cold", "$Water", Comparator::More, 0.5).satisfied_by(&stored, now));
        assert!(!memb("cold", "$Water", Comparator::More, 0.9).satisfied_by(&stored, now));
    }

    #[test]
    fn membership_compatibility() {
        let lucy = memb("professor", "$Lucy", Comparator::Equal, 1.0);
        assert!(lucy.compatible(&memb("professor", "$Lucy", Comparator::Less, 0.3)).is_ok());
        assert!(matches!(
            lucy.compatible(&memb("student", "$Lucy", Comparator::Equal, 1.0)),
            Err(AtomError::NotCompAssert { .. })
        ));
        assert!(lucy.compatible(&memb("professor", "$John", Comparator::Equal, 1.0)).is_err());
    }

    #[test]
    fn membership_update_in_place() {
        let mut stored = memb("cold", "$Water", Comparator::Equal, 0.9);
        let newer = memb("cold", "$Water", Comparator::Equal, 0.1);

        assert!(stored.update(&newer));
        assert_eq!(stored.value, 0.1);
        assert_eq!(stored.history.len(), 1);
        assert_eq!(stored.history[0].value, 0.9);

        // Re-asserting the same value is not a change.
        assert!(!stored.update(&newer));
        assert_eq!(stored.history.len(), 1);
    }

    #[test]
    fn time_truth_parity() {
        let now = Utc::now();
        let past = now - Duration::hours(1);
        let earlier = now - Duration::hours(2);

        let mut a = memb("cold", "$Water", Comparator::Equal, 1.0);
        let b = memb("cold", "$Water", Comparator::Equal, 1.0);
        // Odd number of dates in the past: currently true, matches fresh atom.
        a.dates = vec![past];
        assert!(b.satisfied_by(&a, now));
        // Even number: currently false.
        a.dates = vec![earlier, past];
        assert!(!b.satisfied_by(&a, now));
        // A validity edge in the future does not count yet.
        a.dates = vec![now + Duration::hours(1)];
        assert!(!b.satisfied_by(&a, now));
    }

    #[test]
    fn relation_compatibility() {
        let friend = Relation::new(
            "friend",
            vec![
                FuncArg::with_val("$John", Comparator::Equal, 1.0).unwrap(),
                FuncArg::bare("$Lucy"),
            ],
        )
        .unwrap();

        let other_args = Relation::new(
            "friend",
            vec![
                FuncArg::with_val("$John", Comparator::Equal, 1.0).unwrap(),
                FuncArg::bare("$Bob"),
            ],
        )
        .unwrap();
        assert!(matches!(
            friend.compatible(&other_args),
            Err(AtomError::NotCompFunc { what: "args", .. })
        ));

        let other_arity = Relation::new(
            "friend",
            vec![FuncArg::with_val("$John", Comparator::Equal, 1.0).unwrap()],
        )
        .unwrap();
        assert!(matches!(
            friend.compatible(&other_arity),
            Err(AtomError::NotCompFunc { what: "arity", .. })
        ));

        assert_ne!(friend.args_id, other_args.args_id);
    }

    #[test]
    fn relation_value_on_object_position() {
        let now = Utc::now();
        let stored = Relation::new(
            "friend",
            vec![
                FuncArg::with_val("$John", Comparator::Equal, 1.0).unwrap(),
                FuncArg::bare("$Lucy"),
            ],
        )
        .unwrap();

        let same = stored.clone();
        assert_eq!(same.satisfied_by(&stored, now).unwrap(), true);

        let mut zero = stored.clone();
        zero.args[0].uval = Some((Comparator::Equal, 0.0));
        assert_eq!(zero.satisfied_by(&stored, now).unwrap(), false);
    }

    #[test]
    fn relation_substitution_rehashes() {
        let free = Relation::new(
            "friend",
            vec![
                FuncArg::with_val("x", Comparator::Equal, 1.0).unwrap(),
                FuncArg::bare("y"),
            ],
        )
        .unwrap();
        let mut bindings = HashMap::new();
        bindings.insert("x".to_string(), "$John".to_string());
        bindings.insert("y".to_string(), "$Lucy".to_string());

        let ground = free.substitute(&bindings);
        assert_eq!(ground.args[0].term, "$John");
        assert_eq!(ground.args[1].term, "$Lucy");
        assert_ne!(ground.args_id, free.args_id);
    }

    #[test]
    fn time_compare_defers_on_unbound_var() {
        let cmp = TimeCompare {
            op: Comparator::Less,
            lhs: TimeArg::Var("t1".into()),
            rhs: TimeArg::Now,
        };
        let now = Utc::now();

        assert_eq!(cmp.eval(&HashMap::new(), now), None);

        let mut bindings = HashMap::new();
        bindings.insert("t1".to_string(), now - Duration::minutes(5));
        assert_eq!(cmp.eval(&bindings, now), Some(true));
    }

    #[test]
    fn canonical_display_round() {
        let m = memb("professor", "$Lucy", Comparator::Equal, 1.0);
        assert_eq!(m.to_string(), "professor[$Lucy,u=1]");

        let r = Relation::new(
            "friend",
            vec![
                FuncArg::with_val("$John", Comparator::Equal, 1.0).unwrap(),
                FuncArg::bare("$Lucy"),
            ],
        )
        .unwrap();
        assert_eq!(r.to_string(), "<friend[$John,u=1;$Lucy]>");
        assert_eq!(Assertion::Rel(r).key(), "<friend[$John,u=1;$Lucy]>");
    }
}
