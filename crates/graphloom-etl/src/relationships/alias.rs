//! Alias resolution for join predicates.
//!
//! Mapping rows are written by hand, so a predicate may name its sides in
//! several ways: `from`/`to`/`junction`/`link`, or a name derived from the
//! label (`account`, `a`, `pm` for `PaymentMethod`, `payment_method`).
//! Self-referential mappings use numbered variants (`a1`, `a2`).

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::predicate::PredicateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    From,
    Junction,
    To,
}

impl Side {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::From => 0,
            Self::Junction => 1,
            Self::To => 2,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::From => "from",
            Self::Junction => "junction",
            Self::To => "to",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Side(Side),
    Ambiguous,
}

/// Alias precedence, strongest first. A collision inside one tier is
/// ambiguous; a weaker tier never overrides a stronger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Keyword,
    Short,
    Derived,
    Junction,
}

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, (Tier, Target)>,
}

impl AliasTable {
    /// Builds the alias table for one mapping.
    ///
    /// The short names used in hand-written conditions come first: the first
    /// letter of the from label, and for the to label its camel initials
    /// (`pm`, `pe`) or its first letter. Every other derived form ranks below
    /// them, and names derived from the junction rank lowest.
    pub fn new(
        from_label: &str,
        to_label: &str,
        junction_table: Option<&str>,
        junction_label: Option<&str>,
    ) -> Self {
        let mut table = Self::default();

        table.add("from", Side::From, Tier::Keyword);
        table.add("to", Side::To, Tier::Keyword);
        if junction_table.is_some() || junction_label.is_some() {
            for alias in ["junction", "link", "j"] {
                table.add(alias, Side::Junction, Tier::Keyword);
            }
        }

        if let Some(alias) = first_letter(from_label) {
            table.add(&alias, Side::From, Tier::Short);
        }
        if let Some(alias) = short_alias(to_label) {
            table.add(&alias, Side::To, Tier::Short);
        }

        let from = derived_aliases(from_label);
        let to = derived_aliases(to_label);
        for alias in &from {
            table.add(alias, Side::From, Tier::Derived);
            table.add(&format!("{alias}1"), Side::From, Tier::Derived);
        }
        for alias in &to {
            table.add(alias, Side::To, Tier::Derived);
            table.add(&format!("{alias}2"), Side::To, Tier::Derived);
        }

        if let Some(label) = junction_label {
            for alias in derived_aliases(label) {
                table.add(&alias, Side::Junction, Tier::Junction);
            }
        }
        if let Some(name) = junction_table {
            table.add(&name.to_lowercase(), Side::Junction, Tier::Junction);
        }
        table
    }

    fn add(&mut self, alias: &str, side: Side, tier: Tier) {
        let candidate = (tier, Target::Side(side));
        let entry = self.aliases.entry(alias.to_string()).or_insert(candidate);
        if tier < entry.0 {
            *entry = candidate;
        } else if tier == entry.0 && entry.1 != candidate.1 {
            entry.1 = Target::Ambiguous;
        }
    }

    pub fn resolve(&self, alias: &str) -> Result<Side, PredicateError> {
        match self.aliases.get(&alias.to_lowercase()) {
            Some((_, Target::Side(side))) => Ok(*side),
            Some((_, Target::Ambiguous)) => Err(PredicateError::AmbiguousAlias(alias.to_string())),
            None => Err(PredicateError::UnknownAlias(alias.to_string())),
        }
    }
}

fn first_letter(label: &str) -> Option<String> {
    label.trim().chars().next().map(|c| c.to_lowercase().collect())
}

/// Camel initials when the label has more than one word, else the first letter.
fn short_alias(label: &str) -> Option<String> {
    let initials = camel_initials(label);
    if initials.chars().count() > 1 {
        Some(initials)
    } else {
        first_letter(label)
    }
}

fn camel_initials(label: &str) -> String {
    label
        .trim()
        .chars()
        .filter(|c| c.is_uppercase())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lowercased label, first letter, camel-case initials, snake-case form.
fn derived_aliases(label: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let label = label.trim();
    if label.is_empty() {
        return out;
    }

    out.insert(label.to_lowercase());
    out.extend(first_letter(label));

    let initials = camel_initials(label);
    if !initials.is_empty() {
        out.insert(initials);
    }

    let mut snake = String::new();
    for (i, c) in label.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            snake.push('_');
        }
        snake.extend(c.to_lowercase());
    }
    out.insert(snake);
    out
}
