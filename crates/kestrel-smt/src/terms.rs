use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::backends::smtlib_printer::to_smtlib;
use crate::sorts::SmtSort;

/// Abstract SMT term representation, solver-agnostic.
///
/// Terms are plain trees; path formulas, candidate invariants and blocking
/// clauses are all built from this one type. The derived ordering is only
/// used to keep candidate collections deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Integer literal.
    IntLit(i64),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Box<SmtTerm>, Box<SmtTerm>),
    Sub(Box<SmtTerm>, Box<SmtTerm>),
    Mul(Box<SmtTerm>, Box<SmtTerm>),

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),

    // If-then-else
    Ite(Box<SmtTerm>, Box<SmtTerm>, Box<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        SmtTerm::IntLit(n)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    pub fn add(self, other: SmtTerm) -> Self {
        SmtTerm::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: SmtTerm) -> Self {
        SmtTerm::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: SmtTerm) -> Self {
        SmtTerm::Mul(Box::new(self), Box::new(other))
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Box::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    pub fn ite(cond: SmtTerm, then: SmtTerm, els: SmtTerm) -> Self {
        SmtTerm::Ite(Box::new(cond), Box::new(then), Box::new(els))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, SmtTerm::BoolLit(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, SmtTerm::BoolLit(false))
    }

    /// Conjunction that flattens nested `and`s and folds boolean constants.
    pub fn conjunction(terms: impl IntoIterator<Item = SmtTerm>) -> Self {
        let mut parts = Vec::new();
        for term in terms {
            match term {
                SmtTerm::BoolLit(true) => {}
                SmtTerm::BoolLit(false) => return SmtTerm::bool(false),
                SmtTerm::And(inner) => {
                    for t in inner {
                        if t.is_false() {
                            return SmtTerm::bool(false);
                        }
                        if !t.is_true() {
                            parts.push(t);
                        }
                    }
                }
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => SmtTerm::bool(true),
            1 => parts.pop().unwrap_or(SmtTerm::bool(true)),
            _ => SmtTerm::And(parts),
        }
    }

    /// Disjunction that flattens nested `or`s and folds boolean constants.
    pub fn disjunction(terms: impl IntoIterator<Item = SmtTerm>) -> Self {
        let mut parts = Vec::new();
        for term in terms {
            match term {
                SmtTerm::BoolLit(false) => {}
                SmtTerm::BoolLit(true) => return SmtTerm::bool(true),
                SmtTerm::Or(inner) => {
                    for t in inner {
                        if t.is_true() {
                            return SmtTerm::bool(true);
                        }
                        if !t.is_false() {
                            parts.push(t);
                        }
                    }
                }
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => SmtTerm::bool(false),
            1 => parts.pop().unwrap_or(SmtTerm::bool(false)),
            _ => SmtTerm::Or(parts),
        }
    }

    /// Negation that removes double negations and folds constants.
    pub fn negate(self) -> Self {
        match self {
            SmtTerm::BoolLit(b) => SmtTerm::BoolLit(!b),
            SmtTerm::Not(inner) => *inner,
            other => other.not(),
        }
    }

    /// `self => other`, folding the trivial cases.
    pub fn implies_simplified(self, other: SmtTerm) -> Self {
        if self.is_false() || other.is_true() {
            return SmtTerm::bool(true);
        }
        if self.is_true() {
            return other;
        }
        if other.is_false() {
            return self.negate();
        }
        self.implies(other)
    }

    /// Top-level conjuncts of this term (the term itself if it is not an `and`).
    pub fn conjuncts(&self) -> Vec<SmtTerm> {
        match self {
            SmtTerm::And(parts) => parts.iter().flat_map(|p| p.conjuncts()).collect(),
            SmtTerm::BoolLit(true) => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// All variable names occurring in the term.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            SmtTerm::Var(name) => {
                out.insert(name.clone());
            }
            SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => {}
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Eq(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r)
            | SmtTerm::Implies(l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
            SmtTerm::And(parts) | SmtTerm::Or(parts) => {
                for p in parts {
                    p.collect_variables(out);
                }
            }
            SmtTerm::Not(inner) => inner.collect_variables(out),
            SmtTerm::Ite(c, t, e) => {
                c.collect_variables(out);
                t.collect_variables(out);
                e.collect_variables(out);
            }
        }
    }

    /// Boolean atoms of the term: comparisons and boolean variables.
    ///
    /// Used to turn interpolants into predicates for abstraction precision.
    pub fn atoms(&self) -> BTreeSet<SmtTerm> {
        let mut out = BTreeSet::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms(&self, out: &mut BTreeSet<SmtTerm>) {
        match self {
            SmtTerm::And(parts) | SmtTerm::Or(parts) => {
                for p in parts {
                    p.collect_atoms(out);
                }
            }
            SmtTerm::Not(inner) => inner.collect_atoms(out),
            SmtTerm::Implies(l, r) => {
                l.collect_atoms(out);
                r.collect_atoms(out);
            }
            SmtTerm::Ite(c, t, e) => {
                c.collect_atoms(out);
                if t.is_boolean_shaped() {
                    t.collect_atoms(out);
                    e.collect_atoms(out);
                }
            }
            SmtTerm::BoolLit(_) => {}
            SmtTerm::Eq(l, r) if l.is_boolean_shaped() || r.is_boolean_shaped() => {
                l.collect_atoms(out);
                r.collect_atoms(out);
            }
            atom => {
                out.insert(atom.clone());
            }
        }
    }

    fn is_boolean_shaped(&self) -> bool {
        matches!(
            self,
            SmtTerm::BoolLit(_)
                | SmtTerm::And(_)
                | SmtTerm::Or(_)
                | SmtTerm::Not(_)
                | SmtTerm::Implies(_, _)
                | SmtTerm::Lt(_, _)
                | SmtTerm::Le(_, _)
                | SmtTerm::Gt(_, _)
                | SmtTerm::Ge(_, _)
        )
    }

    /// Rebuild the term, replacing each variable by `f(name)`.
    ///
    /// Returns `None` as soon as `f` rejects a variable.
    pub fn try_map_vars<F>(&self, f: &mut F) -> Option<SmtTerm>
    where
        F: FnMut(&str) -> Option<SmtTerm>,
    {
        let bin = |l: &SmtTerm, r: &SmtTerm, f: &mut F| -> Option<(Box<SmtTerm>, Box<SmtTerm>)> {
            Some((Box::new(l.try_map_vars(f)?), Box::new(r.try_map_vars(f)?)))
        };
        Some(match self {
            SmtTerm::Var(name) => f(name)?,
            SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => self.clone(),
            SmtTerm::Add(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Add(l, r)
            }
            SmtTerm::Sub(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Sub(l, r)
            }
            SmtTerm::Mul(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Mul(l, r)
            }
            SmtTerm::Eq(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Eq(l, r)
            }
            SmtTerm::Lt(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Lt(l, r)
            }
            SmtTerm::Le(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Le(l, r)
            }
            SmtTerm::Gt(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Gt(l, r)
            }
            SmtTerm::Ge(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Ge(l, r)
            }
            SmtTerm::Implies(l, r) => {
                let (l, r) = bin(l, r, f)?;
                SmtTerm::Implies(l, r)
            }
            SmtTerm::And(parts) => SmtTerm::And(
                parts
                    .iter()
                    .map(|p| p.try_map_vars(f))
                    .collect::<Option<Vec<_>>>()?,
            ),
            SmtTerm::Or(parts) => SmtTerm::Or(
                parts
                    .iter()
                    .map(|p| p.try_map_vars(f))
                    .collect::<Option<Vec<_>>>()?,
            ),
            SmtTerm::Not(inner) => SmtTerm::Not(Box::new(inner.try_map_vars(f)?)),
            SmtTerm::Ite(c, t, e) => SmtTerm::Ite(
                Box::new(c.try_map_vars(f)?),
                Box::new(t.try_map_vars(f)?),
                Box::new(e.try_map_vars(f)?),
            ),
        })
    }

    /// Rebuild the term, replacing each variable by `f(name)`.
    pub fn map_vars<F>(&self, mut f: F) -> SmtTerm
    where
        F: FnMut(&str) -> SmtTerm,
    {
        let mut total = |name: &str| Some(f(name));
        // `total` never rejects a variable.
        self.try_map_vars(&mut total)
            .unwrap_or_else(|| SmtTerm::bool(true))
    }

    /// Replace variables by terms; unmapped variables are kept.
    pub fn substitute(&self, map: &BTreeMap<String, SmtTerm>) -> SmtTerm {
        self.map_vars(|name| {
            map.get(name)
                .cloned()
                .unwrap_or_else(|| SmtTerm::var(name))
        })
    }

    /// Infer the sort of every variable from the positions it occurs in.
    ///
    /// Variables only ever compared with other variables default to `Int`.
    pub fn infer_sorts(&self, out: &mut BTreeMap<String, SmtSort>) {
        self.infer_with_expected(Some(SmtSort::Bool), out);
    }

    fn infer_with_expected(&self, expected: Option<SmtSort>, out: &mut BTreeMap<String, SmtSort>) {
        match self {
            SmtTerm::Var(name) => {
                if let Some(sort) = expected {
                    out.entry(name.clone()).or_insert(sort);
                }
            }
            SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => {}
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r) => {
                l.infer_with_expected(Some(SmtSort::Int), out);
                r.infer_with_expected(Some(SmtSort::Int), out);
            }
            SmtTerm::Eq(l, r) => {
                let sort = l
                    .shallow_sort(out)
                    .or_else(|| r.shallow_sort(out))
                    .unwrap_or(SmtSort::Int);
                l.infer_with_expected(Some(sort), out);
                r.infer_with_expected(Some(sort), out);
            }
            SmtTerm::And(parts) | SmtTerm::Or(parts) => {
                for p in parts {
                    p.infer_with_expected(Some(SmtSort::Bool), out);
                }
            }
            SmtTerm::Not(inner) => inner.infer_with_expected(Some(SmtSort::Bool), out),
            SmtTerm::Implies(l, r) => {
                l.infer_with_expected(Some(SmtSort::Bool), out);
                r.infer_with_expected(Some(SmtSort::Bool), out);
            }
            SmtTerm::Ite(c, t, e) => {
                c.infer_with_expected(Some(SmtSort::Bool), out);
                let sort = expected
                    .or_else(|| t.shallow_sort(out))
                    .or_else(|| e.shallow_sort(out));
                t.infer_with_expected(sort, out);
                e.infer_with_expected(sort, out);
            }
        }
    }

    fn shallow_sort(&self, known: &BTreeMap<String, SmtSort>) -> Option<SmtSort> {
        match self {
            SmtTerm::Var(name) => known.get(name).copied(),
            SmtTerm::IntLit(_) | SmtTerm::Add(..) | SmtTerm::Sub(..) | SmtTerm::Mul(..) => {
                Some(SmtSort::Int)
            }
            SmtTerm::Ite(_, t, e) => t.shallow_sort(known).or_else(|| e.shallow_sort(known)),
            _ => Some(SmtSort::Bool),
        }
    }
}

impl std::fmt::Display for SmtTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&to_smtlib(self))
    }
}
