//! Entities of the knowledge store: individuals and classes.
//!
//! An individual is the unique member of its own set, holding fuzzy
//! memberships to categories, relation atoms by function name, and a
//! cognition index from atom names to the sentences mentioning the entity.
//! A class mirrors this for sets: its memberships point at parent classes
//! (category-of-category) and its cognition index drives rule discovery.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::atom::{Membership, Relation};
use crate::error::StoreError;
use crate::sentence::LogSentence;

// ---------------------------------------------------------------------------
// Entity ids
// ---------------------------------------------------------------------------

/// Unique, niche-optimized identifier for a stored entity.
///
/// Uses `NonZeroU64` so that `Option<EntityId>` is the same size as
/// `EntityId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(NonZeroU64);

impl EntityId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(EntityId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Thread-safe entity id allocator, monotonically increasing from 1.
#[derive(Debug)]
pub struct EntityIdGen {
    next: AtomicU64,
}

impl EntityIdGen {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> Result<EntityId, StoreError> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        EntityId::new(raw).ok_or(StoreError::IdSpaceExhausted)
    }
}

impl Default for EntityIdGen {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Individuals
// ---------------------------------------------------------------------------

/// A concrete entity: the unique member of its own class.
#[derive(Debug, Clone)]
pub struct Individual {
    pub id: EntityId,
    pub name: String,
    categ: Vec<Membership>,
    relations: HashMap<String, Vec<Relation>>,
    cog: HashMap<String, Vec<Arc<LogSentence>>>,
}

impl Individual {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            categ: Vec::new(),
            relations: HashMap::new(),
            cog: HashMap::new(),
        }
    }

    /// Insert a membership atom or update the existing atom for the same
    /// category in place. Returns `true` when the store changed.
    pub fn add_ctg(&mut self, fact: Membership) -> bool {
        match self.categ.iter_mut().find(|c| c.parent == fact.parent) {
            Some(held) => held.update(&fact),
            None => {
                self.categ.push(fact);
                true
            }
        }
    }

    /// The stored membership atom for a category, if any.
    pub fn get_ctg(&self, parent: &str) -> Option<&Membership> {
        self.categ.iter().find(|c| c.parent == parent)
    }

    /// Category names from `names` this individual holds.
    pub fn check_ctg(&self, names: &HashSet<String>) -> Vec<String> {
        self.categ
            .iter()
            .filter(|c| names.contains(&c.parent))
            .map(|c| c.parent.clone())
            .collect()
    }

    /// Tri-value direct check of a membership query.
    pub fn test_ctg(&self, query: &Membership, at: DateTime<Utc>) -> Option<bool> {
        self.get_ctg(&query.parent)
            .map(|held| query.satisfied_by(held, at))
    }

    /// Insert a relation atom, updating in place when an atom with the same
    /// argument hash is already held. Returns `true` when the store changed.
    pub fn add_rel(&mut self, func: Relation) -> bool {
        let bucket = self.relations.entry(func.func.clone()).or_default();
        match bucket.iter_mut().find(|f| f.args_id == func.args_id) {
            Some(held) => held.update(&func),
            None => {
                bucket.push(func);
                true
            }
        }
    }

    /// The stored relation atom matching a query's function and args, if any.
    pub fn get_rel(&self, query: &Relation) -> Option<&Relation> {
        self.relations
            .get(&query.func)?
            .iter()
            .find(|f| f.args_id == query.args_id)
    }

    /// Tri-value direct check of a relation query. An exact argument match
    /// is preferred; a stored atom over the same term set (permuted args)
    /// is compared by value so queries from either side of the mapping
    /// resolve.
    pub fn test_rel(&self, query: &Relation, at: DateTime<Utc>) -> Option<bool> {
        if let Some(held) = self.get_rel(query) {
            return query.satisfied_by(held, at).ok();
        }
        let bucket = self.relations.get(&query.func)?;
        let held = bucket.iter().find(|f| query.same_arg_set(f))?;
        query.value_match(held, at)
    }

    /// Names of the relations this individual participates in.
    pub fn rel_names(&self) -> impl Iterator<Item = &String> {
        self.relations.keys()
    }

    /// Index a sentence under one of the atom names it mentions.
    pub fn add_cog(&mut self, name: &str, sent: Arc<LogSentence>) {
        let bucket = self.cog.entry(name.to_string()).or_default();
        if !bucket.iter().any(|s| s.id == sent.id) {
            bucket.push(sent);
        }
    }

    /// Sentences indexed under an atom name.
    pub fn cog_for(&self, name: &str) -> &[Arc<LogSentence>] {
        self.cog.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn categ_count(&self) -> usize {
        self.categ.len()
    }
}

impl std::fmt::Display for Individual {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<individual '{}' w/ id: {}>", self.name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

/// Whether a class names a set of subjects or a relation.
///
/// A relation is structurally a class whose cognition index drives rule
/// discovery, but it rejects direct relation-atom attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Membership,
    Relational,
}

/// A set of entities sharing a property, or a relation name.
#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub kind: ClassKind,
    parents: Vec<Membership>,
    relations: HashMap<String, Vec<Relation>>,
    cog: Vec<Arc<LogSentence>>,
}

impl Class {
    pub fn membership(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ClassKind::Membership,
            parents: Vec::new(),
            relations: HashMap::new(),
            cog: Vec::new(),
        }
    }

    pub fn relational(name: impl Into<String>) -> Self {
        Self {
            kind: ClassKind::Relational,
            ..Self::membership(name)
        }
    }

    /// Insert or update a parent membership (category-of-category).
    pub fn add_ctg(&mut self, fact: Membership) -> bool {
        match self.parents.iter_mut().find(|c| c.parent == fact.parent) {
            Some(held) => held.update(&fact),
            None => {
                self.parents.push(fact);
                true
            }
        }
    }

    pub fn get_ctg(&self, parent: &str) -> Option<&Membership> {
        self.parents.iter().find(|c| c.parent == parent)
    }

    pub fn check_parents(&self, names: &HashSet<String>) -> Vec<String> {
        self.parents
            .iter()
            .filter(|c| names.contains(&c.parent))
            .map(|c| c.parent.clone())
            .collect()
    }

    pub fn test_ctg(&self, query: &Membership, at: DateTime<Utc>) -> Option<bool> {
        self.get_ctg(&query.parent)
            .map(|held| query.satisfied_by(held, at))
    }

    /// Insert a relation atom the class participates in. Rejected for
    /// relational classes.
    pub fn add_rel(&mut self, func: Relation) -> Result<bool, StoreError> {
        if self.kind == ClassKind::Relational {
            return Err(StoreError::RelationAttachment {
                name: self.name.clone(),
            });
        }
        let bucket = self.relations.entry(func.func.clone()).or_default();
        Ok(match bucket.iter_mut().find(|f| f.args_id == func.args_id) {
            Some(held) => held.update(&func),
            None => {
                bucket.push(func);
                true
            }
        })
    }

    pub fn get_rel(&self, query: &Relation) -> Option<&Relation> {
        self.relations
            .get(&query.func)?
            .iter()
            .find(|f| f.args_id == query.args_id)
    }

    pub fn test_rel(&self, query: &Relation, at: DateTime<Utc>) -> Option<bool> {
        if let Some(held) = self.get_rel(query) {
            return query.satisfied_by(held, at).ok();
        }
        let bucket = self.relations.get(&query.func)?;
        let held = bucket.iter().find(|f| query.same_arg_set(f))?;
        query.value_match(held, at)
    }

    pub fn rel_names(&self) -> impl Iterator<Item = &String> {
        self.relations.keys()
    }

    /// Index a sentence in the cognition list, once per sentence.
    pub fn add_cog(&mut self, sent: Arc<LogSentence>) {
        if !self.cog.iter().any(|s| s.id == sent.id) {
            self.cog.push(sent);
        }
    }

    /// Every sentence mentioning this class, oldest first.
    pub fn cog(&self) -> &[Arc<LogSentence>] {
        &self.cog
    }
}
