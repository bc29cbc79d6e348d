//! # doxa
//!
//! The reasoning core of a cognitive agent: a first-order, fuzzy-valued
//! knowledge base that ingests assertions and rules, stores them as a graph
//! of individuals, classes and relations, and answers queries by
//! backward-chaining inference combined with direct fact lookup.
//!
//! ## Architecture
//!
//! - **Atoms** (`atom`): fuzzy membership predicates, n-ary relation
//!   functions, time comparisons
//! - **Sentences** (`sentence`): trees of logical connectives over atoms,
//!   evaluated by resolution or conditional assertion
//! - **Knowledge store** (`repr`): individuals and classes with cognition
//!   indexes linking every category to the rules that mention it
//! - **Belief maintenance** (`bms`): provenance records per stored fact and
//!   inconsistency detection against previously held beliefs
//! - **Inference** (`infer`): rule discovery, variable mapping, recursive
//!   unification with memoization and fixpoint restart
//!
//! ## Library usage
//!
//! ```
//! use doxa::repr::{Answer, Representation};
//!
//! let kb = Representation::new();
//! kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])").unwrap();
//! kb.tell("professor[$Lucy,u=1]").unwrap();
//! assert_eq!(kb.ask("person[$Lucy,u=1]").unwrap(), Answer::True);
//! ```

pub mod atom;
pub mod bms;
pub mod error;
pub mod infer;
pub mod parser;
pub mod repr;
pub mod sentence;

pub use crate::atom::{Assertion, Comparator, Membership, Relation};
pub use crate::error::{DoxaError, DoxaResult};
pub use crate::repr::{Answer, QueryResults, Representation};
