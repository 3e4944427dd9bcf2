//! Relationship resolution: evaluates each mapping's join predicate against
//! the row index and emits one edge per distinct (from, to) pair.

pub mod alias;
pub mod index;
pub mod predicate;

use std::collections::{HashMap, HashSet};

use graphloom_core::{key_component, BusinessKey, GraphRelationship, Property, RelationshipMapping, Row};

use crate::error::{EtlError, Result};

pub use alias::{AliasTable, Side};
pub use index::{IndexKey, IndexedRows, RowIndex};
pub use predicate::{AttrRef, Binding, Predicate, PredicateError};

/// Edges produced by one mapping.
#[derive(Debug, Clone)]
pub struct RelationshipSection {
    pub mapping_id: i64,
    pub relationship_type: String,
    pub description: Option<String>,
    pub relationships: Vec<GraphRelationship>,
}

/// Outcome of resolving every active mapping.
#[derive(Debug, Default)]
pub struct ResolutionReport {
    /// Successful mappings in execution order.
    pub sections: Vec<RelationshipSection>,
    pub failures: Vec<EtlError>,
}

impl ResolutionReport {
    pub fn relationship_count(&self) -> usize {
        self.sections.iter().map(|s| s.relationships.len()).sum()
    }
}

/// Resolve mappings in the order given. A failing mapping is recorded and
/// the remaining mappings still run.
pub fn resolve_all(mappings: &[RelationshipMapping], index: &RowIndex) -> ResolutionReport {
    mappings
        .iter()
        .map(|mapping| resolve_mapping(mapping, index))
        .fold(ResolutionReport::default(), |mut report, outcome| {
            match outcome {
                Ok(section) => report.sections.push(section),
                Err(e) => {
                    tracing::error!(error = %e, "Relationship mapping failed");
                    report.failures.push(e);
                }
            }
            report
        })
}

/// Resolve one mapping into its edges.
pub fn resolve_mapping(mapping: &RelationshipMapping, index: &RowIndex) -> Result<RelationshipSection> {
    let fail = |message: String| EtlError::RelationshipResolution {
        mapping_id: mapping.mapping_id,
        relationship_type: mapping.relationship_type.clone(),
        message,
    };

    let aliases = AliasTable::new(
        &mapping.from_label,
        &mapping.to_label,
        mapping.junction_table(),
        mapping.junction_label(),
    );
    let predicate =
        Predicate::parse(&mapping.join_condition, &aliases).map_err(|e| fail(e.to_string()))?;
    let edge_properties = parse_edge_properties(mapping.edge_properties.as_deref(), &aliases)
        .map_err(|e| fail(e.to_string()))?;

    let from = index
        .label(&mapping.from_label)
        .ok_or_else(|| fail(format!("no rows indexed for label {}", mapping.from_label)))?;
    let to = index
        .label(&mapping.to_label)
        .ok_or_else(|| fail(format!("no rows indexed for label {}", mapping.to_label)))?;
    let junction = match junction_key(mapping) {
        Some(key) => Some(
            index
                .get(&key)
                .ok_or_else(|| fail(format!("no rows indexed for junction {key:?}")))?,
        ),
        None => None,
    };

    let mut sides: [Option<&IndexedRows>; 3] = [None; 3];
    sides[Side::From.index()] = Some(from);
    sides[Side::Junction.index()] = junction;
    sides[Side::To.index()] = Some(to);
    let side_rows = |side: Side| sides[side.index()];

    let references = predicate
        .references()
        .into_iter()
        .chain(edge_properties.iter().map(|(_, attr)| attr));
    for attr in references {
        let rows = side_rows(attr.side).ok_or_else(|| {
            fail("predicate references the junction but mapping declares none".to_string())
        })?;
        if !rows.has_column(&attr.attribute) {
            return Err(fail(format!(
                "attribute '{}' is not available on the {} side",
                attr.attribute, attr.side
            )));
        }
    }

    let mut order = vec![Side::From];
    if junction.is_some() {
        order.push(Side::Junction);
    }
    order.push(Side::To);

    let equi = predicate.equi_joins();
    let mut partials: Vec<Binding<'_>> = from
        .rows()
        .iter()
        .map(|row| Binding::default().bind(Side::From, row))
        .collect();

    for (step, &side) in order.iter().enumerate().skip(1) {
        let Some(rows) = side_rows(side) else {
            continue;
        };
        let bound = &order[..step];
        let keys = join_keys(&equi, side, bound);
        partials = if keys.is_empty() {
            partials
                .iter()
                .flat_map(|b| rows.rows().iter().map(move |row| b.bind(side, row)))
                .collect()
        } else {
            let table = hash_rows(rows.rows(), &keys);
            partials
                .iter()
                .flat_map(|b| {
                    let matches = lookup_key(b, &keys)
                        .and_then(|k| table.get(&k))
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    matches.iter().map(move |row| b.bind(side, *row))
                })
                .collect()
        };
    }

    let mut seen: HashSet<(BusinessKey, BusinessKey)> = HashSet::new();
    let mut relationships = Vec::new();
    for binding in partials.iter().filter(|b| predicate.evaluate(b)) {
        let (Some(from_row), Some(to_row)) = (binding.row(Side::From), binding.row(Side::To))
        else {
            continue;
        };
        if !seen.insert((from_row.key.clone(), to_row.key.clone())) {
            continue;
        }
        let properties = edge_properties
            .iter()
            .filter_map(|(name, attr)| {
                let value = binding.value(attr);
                if value.is_null() {
                    return None;
                }
                Some(Property {
                    name: name.clone(),
                    value: value.clone(),
                    kind: side_rows(attr.side)
                        .map(|r| r.column_kind(&attr.attribute))
                        .unwrap_or_default(),
                })
            })
            .collect();
        relationships.push(GraphRelationship {
            relationship_type: mapping.relationship_type.clone(),
            from_label: mapping.from_label.clone(),
            from_key: from_row.key.clone(),
            to_label: mapping.to_label.clone(),
            to_key: to_row.key.clone(),
            properties,
        });
    }

    tracing::info!(
        mapping_id = mapping.mapping_id,
        relationship_type = %mapping.relationship_type,
        candidates = partials.len(),
        relationships = relationships.len(),
        "Resolved relationship mapping"
    );

    Ok(RelationshipSection {
        mapping_id: mapping.mapping_id,
        relationship_type: mapping.relationship_type.clone(),
        description: mapping.description.clone(),
        relationships,
    })
}

/// Where junction rows come from: the junction table if named, else the
/// junction label.
fn junction_key(mapping: &RelationshipMapping) -> Option<IndexKey> {
    mapping
        .junction_table()
        .map(|t| IndexKey::Table(t.to_string()))
        .or_else(|| mapping.junction_label().map(|l| IndexKey::Label(l.to_string())))
}

/// Pairs of (attribute on `side`, attribute on an already bound side).
fn join_keys<'p>(
    equi: &[(&'p AttrRef, &'p AttrRef)],
    side: Side,
    bound: &[Side],
) -> Vec<(&'p AttrRef, &'p AttrRef)> {
    equi.iter()
        .filter_map(|&(l, r)| {
            if l.side == side && bound.contains(&r.side) {
                Some((l, r))
            } else if r.side == side && bound.contains(&l.side) {
                Some((r, l))
            } else {
                None
            }
        })
        .collect()
}

fn hash_rows<'r>(rows: &'r [Row], keys: &[(&AttrRef, &AttrRef)]) -> HashMap<Vec<String>, Vec<&'r Row>> {
    let mut table: HashMap<Vec<String>, Vec<&Row>> = HashMap::new();
    for row in rows {
        let key: Option<Vec<String>> = keys
            .iter()
            .map(|(own, _)| key_component(row.get(&own.attribute)))
            .collect();
        if let Some(key) = key {
            table.entry(key).or_default().push(row);
        }
    }
    table
}

fn lookup_key(binding: &Binding<'_>, keys: &[(&AttrRef, &AttrRef)]) -> Option<Vec<String>> {
    keys.iter()
        .map(|(_, other)| key_component(binding.value(other)))
        .collect()
}

/// Parse `name = alias.attribute, ...`.
fn parse_edge_properties(
    text: Option<&str>,
    aliases: &AliasTable,
) -> std::result::Result<Vec<(String, AttrRef)>, PredicateError> {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(Vec::new());
    };
    text.split(',')
        .map(|pair| {
            let syntax = |message: String| PredicateError::Syntax { offset: 0, message };
            let (name, source) = pair
                .split_once('=')
                .ok_or_else(|| syntax(format!("edge property '{}' has no '='", pair.trim())))?;
            let name = name.trim();
            let (alias, attribute) = source
                .trim()
                .split_once('.')
                .ok_or_else(|| syntax(format!("edge property '{name}' must read alias.attribute")))?;
            if name.is_empty() || attribute.trim().is_empty() {
                return Err(syntax(format!("malformed edge property '{}'", pair.trim())));
            }
            Ok((
                name.to_string(),
                AttrRef {
                    side: aliases.resolve(alias.trim())?,
                    attribute: attribute.trim().to_string(),
                },
            ))
        })
        .collect()
}
