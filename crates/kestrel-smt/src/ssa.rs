//! SSA indexing of program variables.
//!
//! Path formulas refer to variables as `name@index`. An [`SsaMap`] records
//! the current index of each variable at one program state, so that
//! location-independent formulas can be instantiated at that state and
//! instantiated formulas can be mapped back.

use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::terms::SmtTerm;

const INDEX_SEPARATOR: char = '@';

/// Name of variable `name` at SSA index `index`.
pub fn indexed_name(name: &str, index: usize) -> String {
    format!("{name}{INDEX_SEPARATOR}{index}")
}

/// Split `name@index` into its base name and index.
pub fn parse_indexed(name: &str) -> Option<(&str, usize)> {
    let (base, idx) = name.rsplit_once(INDEX_SEPARATOR)?;
    if base.is_empty() {
        return None;
    }
    idx.parse().ok().map(|i| (base, i))
}

/// Persistent map from variable name to its current SSA index.
///
/// Cloning is cheap; successor states share structure with their parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SsaMap(OrdMap<String, usize>);

impl SsaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current index of `name`, if the variable has been assigned.
    pub fn index(&self, name: &str) -> Option<usize> {
        self.0.get(name).copied()
    }

    /// Map in which `name` is bumped to a fresh index.
    pub fn with_increment(&self, name: &str) -> Self {
        let next = self.index(name).map_or(1, |i| i + 1);
        SsaMap(self.0.update(name.to_string(), next))
    }

    pub fn with_index(&self, name: &str, index: usize) -> Self {
        SsaMap(self.0.update(name.to_string(), index))
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &usize)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Instantiate an unindexed formula at this state.
    ///
    /// Variables without an index refer to their initial (index 0) value.
    pub fn instantiate(&self, term: &SmtTerm) -> SmtTerm {
        term.map_vars(|name| SmtTerm::var(indexed_name(name, self.index(name).unwrap_or(0))))
    }

    /// Strip SSA indices from `term`.
    ///
    /// Only occurrences at the current index of this map can be mapped back;
    /// any other indexed variable yields `None`.
    pub fn uninstantiate(&self, term: &SmtTerm) -> Option<SmtTerm> {
        term.try_map_vars(&mut |name: &str| {
            let (base, idx) = parse_indexed(name)?;
            (self.index(base).unwrap_or(0) == idx).then(|| SmtTerm::var(base))
        })
    }

    /// Whether `name@index` is the current version of its variable here.
    pub fn is_current(&self, indexed: &str) -> bool {
        parse_indexed(indexed)
            .map(|(base, idx)| self.index(base).unwrap_or(0) == idx)
            .unwrap_or(false)
    }
}

impl FromIterator<(String, usize)> for SsaMap {
    fn from_iter<T: IntoIterator<Item = (String, usize)>>(iter: T) -> Self {
        SsaMap(iter.into_iter().collect())
    }
}
