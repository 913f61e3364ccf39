use std::fmt;

use serde::{Deserialize, Serialize};

/// Sorts of the quantifier-free integer/boolean fragment used for path formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SmtSort {
    Bool,
    Int,
}

impl SmtSort {
    /// The SMT-LIB2 name of the sort, as used in `declare-fun`.
    pub const fn smtlib_name(self) -> &'static str {
        match self {
            SmtSort::Bool => "Bool",
            SmtSort::Int => "Int",
        }
    }
}

impl fmt::Display for SmtSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.smtlib_name())
    }
}
