//! Rich diagnostic error types for the doxa knowledge base.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so users know exactly what went wrong
//! and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the doxa knowledge base.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum DoxaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Atom(#[from] AtomError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sentence(#[from] SentenceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Infer(#[from] InferError),
}

// ---------------------------------------------------------------------------
// Parser errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("empty input: nothing to parse")]
    #[diagnostic(
        code(doxa::parse::empty),
        help("`tell` and `ask` require at least one statement.")
    )]
    EmptyInput,

    #[error("unbalanced `{delimiter}` at byte {offset}")]
    #[diagnostic(
        code(doxa::parse::unbalanced),
        help("Every `(`, `[` and `<` opening a relation must have a matching closer.")
    )]
    Unbalanced { delimiter: char, offset: usize },

    #[error("unexpected token `{found}` at byte {offset}, expected {expected}")]
    #[diagnostic(
        code(doxa::parse::unexpected_token),
        help("Check the statement against the atom syntax: `category[term,u=val]` \
              for memberships, `<func[obj,u=val;sbj]>` for relations.")
    )]
    UnexpectedToken {
        found: String,
        expected: String,
        offset: usize,
    },

    #[error("malformed fuzzy value annotation at byte {offset}")]
    #[diagnostic(
        code(doxa::parse::malformed_uval),
        help("A truth annotation is written `u OP val` with OP one of `=`, `<`, `>` \
              and val a number in [0, 1].")
    )]
    MalformedUval { offset: usize },

    #[error("a grounded membership assertion must state its value with `u=`")]
    #[diagnostic(
        code(doxa::parse::assertion_op),
        help("The comparators `<` and `>` belong in queries and rule \
              antecedents; a direct assertion fixes the fuzzy value.")
    )]
    AssertionOp,

    #[error("existential quantifier `:exists:` is not supported")]
    #[diagnostic(
        code(doxa::parse::existential),
        help("Skolemization of existential variables is declared but not \
              implemented. Use universally quantified `:vars:` instead.")
    )]
    ExistentialUnsupported,

    #[error("complex sentences cannot be queried directly")]
    #[diagnostic(
        code(doxa::parse::complex_query),
        help("A query is a grounded atom or a `:vars:`-quantified group of atoms. \
              Tell the rule first, then ask about its consequent.")
    )]
    ComplexQuery,

    #[error("invalid date literal `{text}`")]
    #[diagnostic(
        code(doxa::parse::bad_date),
        help("Dates are written `year.month.day` with optional `.hour.minute.second` \
              components, e.g. `*t=2014.7.5.10.30`.")
    )]
    BadDate { text: String },
}

// ---------------------------------------------------------------------------
// Atom errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AtomError {
    #[error("illegal fuzzy value {value}: must be in [0, 1]")]
    #[diagnostic(
        code(doxa::atom::value_bounds),
        help("Membership and relation truth values are fuzzy degrees between \
              0 (never a member) and 1 (always a member).")
    )]
    ValueBounds { value: f32 },

    #[error("relation atoms are not comparable: {what} mismatch ({left} vs {right})")]
    #[diagnostic(
        code(doxa::atom::not_comp_func),
        help("Two relation atoms compare only when function name, arity and the \
              terms at every position agree. The inference layer treats this as \
              \"no match\", not a failure.")
    )]
    NotCompFunc {
        what: &'static str,
        left: String,
        right: String,
    },

    #[error("membership atoms are not comparable: {left} vs {right}")]
    #[diagnostic(
        code(doxa::atom::not_comp_assert),
        help("Two membership atoms compare only when they name the same category \
              and subject.")
    )]
    NotCompAssert { left: String, right: String },
}

// ---------------------------------------------------------------------------
// Sentence errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SentenceError {
    #[error("illegal connective `{op}` in the consequent of an indicative conditional")]
    #[diagnostic(
        code(doxa::sentence::illegal_connective),
        help("Only conjunctions, nested indicative conditionals and atoms may \
              appear on the right side of `|>`. Disjunction, implication and \
              equivalence cannot be asserted.")
    )]
    IllegalConnective { op: String },

    #[error("indicative conditional `|>` nested in an antecedent position")]
    #[diagnostic(
        code(doxa::sentence::nested_icond),
        help("`|>` is valid only at the top of a sentence or chained in the \
              consequent of an enclosing `|>`.")
    )]
    NestedIndCond,

    #[error("no indicative conditional, implication or equivalence found")]
    #[diagnostic(
        code(doxa::sentence::missing_condition),
        help("An unquantified complex sentence must relate its sides with `|>`, \
              `=>` or `<=>`; a bare conjunction asserts nothing.")
    )]
    MissingCondition,

    #[error("time comparison atoms cannot be asserted")]
    #[diagnostic(
        code(doxa::sentence::time_assert),
        help("`timeCalc[..]` atoms test date variables and are only valid in \
              antecedent positions.")
    )]
    TimeCompareAssert,
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("`{name}` names a relation and cannot hold relation atoms itself")]
    #[diagnostic(
        code(doxa::store::relation_attachment),
        help("A relation class indexes the rules mentioning it; relation atoms \
              attach to the individuals and classes named in their arguments.")
    )]
    RelationAttachment { name: String },

    #[error("entity id space exhausted")]
    #[diagnostic(
        code(doxa::store::ids_exhausted),
        help("The id allocator wrapped after 2^64 - 1 allocations, which should \
              be impossible in practice. Check for an allocation loop.")
    )]
    IdSpaceExhausted,
}

// ---------------------------------------------------------------------------
// Inference errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InferError {
    #[error("no rules indexed for consequent `{name}`")]
    #[diagnostic(
        code(doxa::infer::no_rules),
        help("The category or relation has no sentences in its cognition index. \
              The query branch resolves to unknown.")
    )]
    NoRules { name: String },
}

/// Convenience alias for functions returning doxa results.
pub type DoxaResult<T> = std::result::Result<T, DoxaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_error_converts_to_doxa_error() {
        let err = AtomError::ValueBounds { value: 1.3 };
        let doxa: DoxaError = err.into();
        assert!(matches!(doxa, DoxaError::Atom(AtomError::ValueBounds { .. })));
    }

    #[test]
    fn parse_error_converts_to_doxa_error() {
        let err = ParseError::EmptyInput;
        let doxa: DoxaError = err.into();
        assert!(matches!(doxa, DoxaError::Parse(ParseError::EmptyInput)));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = AtomError::ValueBounds { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));

        let err = SentenceError::IllegalConnective { op: "||".into() };
        assert!(format!("{err}").contains("||"));
    }
}
