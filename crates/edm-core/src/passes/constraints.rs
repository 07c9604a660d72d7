//! Referential constraints and multiplicities of associations.
//!
//! Initialization runs right after foreign keys exist and establishes backlink
//! partnerships. Finalization runs after proxies were decided and drops every
//! pair that does not survive into the rendered model.

use std::collections::HashMap;

use tracing::trace;

use crate::derived::{ConstraintPair, ConstraintSet, Derived, ElementId, Multiplicity};
use crate::expr::{comparisons, is_constraint_condition, parse_tokens, Expr};
use crate::messages::{InternalError, Messages};
use crate::options::Options;
use crate::types::*;

use super::params::{PARAMETERS_ELEMENT, SET_ELEMENT};
use super::{collect_associations, service_entities};

const SELF: &str = "$self";

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

pub fn initialize(
    graph: &SchemaGraph,
    derived: &mut Derived,
    messages: &mut Messages,
) -> Result<(), InternalError> {
    // partner → association that claimed it
    let mut claims: HashMap<ElementId, ElementId> = HashMap::new();

    for entity in service_entities(graph, derived) {
        let Some(elements) = graph.definition(&entity).and_then(|d| d.elements()) else {
            continue;
        };
        for (path, element) in collect_associations(graph, elements) {
            let id = ElementId::new(&entity, &path);
            let set = initialize_one(graph, derived, &id, element, &mut claims, messages)?;
            derived.constraints.insert(id, set);
        }
    }

    // Set/Parameters of split entities are partners by construction.
    let splits: Vec<_> = derived.param_entities.values().cloned().collect();
    for split in splits {
        let set = ElementId::top(&split.parameters, SET_ELEMENT);
        let back = ElementId::top(&split.type_entity, PARAMETERS_ELEMENT);
        if let Some(c) = derived.constraints.get_mut(&set) {
            c.partner = Some(back.clone());
        }
        claims.insert(back, set);
    }

    for (partner, claimer) in claims {
        derived
            .constraints
            .entry(partner)
            .or_insert_with(|| ConstraintSet {
                eligible: true,
                ..ConstraintSet::default()
            })
            .claimed_by = Some(claimer);
    }
    Ok(())
}

fn initialize_one(
    graph: &SchemaGraph,
    derived: &Derived,
    id: &ElementId,
    element: &Element,
    claims: &mut HashMap<ElementId, ElementId>,
    messages: &mut Messages,
) -> Result<ConstraintSet, InternalError> {
    let mut set = ConstraintSet {
        eligible: true,
        ..ConstraintSet::default()
    };
    let Some(ref on) = element.on else {
        return Ok(set);
    };
    if !is_constraint_condition(on) {
        set.eligible = false;
        return Ok(set);
    }
    let Ok(condition) = parse_tokens(on) else {
        set.eligible = false;
        return Ok(set);
    };

    let own = id.name();
    for (lhs, rhs) in comparisons(&condition) {
        set.term_count += 1;
        let (Expr::Ref(lhs), Expr::Ref(rhs)) = (lhs, rhs) else {
            continue;
        };
        let lhs = strip_self(lhs);
        let rhs = strip_self(rhs);
        let lhs_target = starts_with_own(lhs, own);
        let rhs_target = starts_with_own(rhs, own);
        if lhs_target == rhs_target {
            continue;
        }
        let (own_side, target_side) = if lhs_target { (rhs, lhs) } else { (lhs, rhs) };
        let target_path = target_side[1..].to_vec();
        if own_side.len() == 1 && own_side[0] == SELF {
            set.self_refs.push(target_path);
        } else {
            set.pairs
                .push(ConstraintPair::new(own_side.to_vec(), target_path));
        }
    }

    let Some(target) = element.target.as_deref() else {
        return Ok(set);
    };
    // redirected to a Parameters entity: the elements live on the type half
    let target = derived.principal_definition(id, target);
    let backlink = set.self_refs.len() == 1 && set.term_count == 1;
    for self_ref in std::mem::take(&mut set.self_refs) {
        let partner_id = ElementId::new(target, &self_ref);
        let partner = resolve_backlink(graph, id, target, &self_ref)?;

        if backlink {
            let claimed_by_other = claims
                .get(&partner_id)
                .filter(|other| *other != id)
                .map(ElementId::to_string);
            match claimed_by_other {
                Some(other) => {
                    let (name, partner_name) = (id.to_string(), partner_id.to_string());
                    messages.warning(
                        "odata-partner-ambiguous",
                        id.location(),
                        &[
                            ("name", name.as_str()),
                            ("partner", partner_name.as_str()),
                            ("other", other.as_str()),
                        ],
                    );
                }
                None => {
                    trace!(association = %id, partner = %partner_id, "backlink partnership");
                    claims.insert(partner_id.clone(), id.clone());
                    if partner.is_managed() && partner.key {
                        set.pairs.extend(partner_pairs(derived, &partner_id));
                    }
                    set.self_refs.push(self_ref);
                    set.partner = Some(partner_id);
                    continue;
                }
            }
        }
        // demoted: the backlink's foreign keys become plain pairs
        set.pairs.extend(partner_pairs(derived, &partner_id));
        set.self_refs.push(self_ref);
    }
    Ok(set)
}

fn resolve_backlink<'a>(
    graph: &'a SchemaGraph,
    id: &ElementId,
    target: &str,
    path: &[String],
) -> Result<&'a Element, InternalError> {
    graph
        .definition(target)
        .and_then(|d| d.elements())
        .and_then(|elements| graph.element_at(elements, path))
        .filter(|e| e.is_association())
        .ok_or_else(|| InternalError::BacklinkNotAssociation {
            association: id.to_string(),
            target: target.to_string(),
            path: path.join("."),
        })
}

/// `[own key path, partner foreign key]` for every foreign key of the partner.
fn partner_pairs(derived: &Derived, partner: &ElementId) -> Vec<ConstraintPair> {
    derived
        .foreign_keys
        .get(partner)
        .map(|fks| {
            fks.iter()
                .map(|fk| ConstraintPair::new(fk.principal.clone(), partner.sibling(&fk.name)))
                .collect()
        })
        .unwrap_or_default()
}

fn strip_self(path: &[String]) -> &[String] {
    if path.len() > 1 && path[0] == SELF {
        &path[1..]
    } else {
        path
    }
}

fn starts_with_own(path: &[String], own: &str) -> bool {
    path.len() > 1 && path[0] == own
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

pub fn finalize(
    graph: &SchemaGraph,
    derived: &mut Derived,
    options: &Options,
    messages: &mut Messages,
) -> Result<(), InternalError> {
    let ids: Vec<ElementId> = derived.constraints.keys().cloned().collect();
    for id in &ids {
        let Some(element) = element_of(graph, id) else {
            continue;
        };
        let Some(set) = derived.constraints.get(id) else {
            continue;
        };
        if set.finalized {
            return Err(InternalError::DuplicateFinalization(id.to_string()));
        }
        let pairs = surviving_pairs(graph, derived, id, element, set, options, messages);
        let (source, target) = determine_multiplicity(element);
        if let Some(set) = derived.constraints.get_mut(id) {
            set.pairs = pairs;
            set.source_multiplicity = Some(source);
            set.target_multiplicity = Some(target);
            set.finalized = true;
        }
    }

    // Partner cardinalities mirror each other.
    for id in &ids {
        let Some(partner_id) = derived.constraints.get(id).and_then(|s| s.partner.clone()) else {
            continue;
        };
        let (Some(own), Some(partner)) = (element_of(graph, id), element_of(graph, &partner_id)) else {
            continue;
        };
        let own_target = match explicit_source(partner) {
            Some(mirrored) => {
                let declared = own
                    .cardinality
                    .as_ref()
                    .filter(|c| c.min.is_some() || c.max.is_some());
                if declared.is_some() {
                    let (_, computed) = determine_multiplicity(own);
                    if computed != mirrored {
                        let name = id.to_string();
                        let declared = computed.to_string();
                        let mirrored_text = mirrored.to_string();
                        let partner_name = partner_id.to_string();
                        messages.warning(
                            "odata-cardinality-mismatch",
                            id.location(),
                            &[
                                ("name", name.as_str()),
                                ("declared", declared.as_str()),
                                ("computed", mirrored_text.as_str()),
                                ("partner", partner_name.as_str()),
                            ],
                        );
                    }
                }
                mirrored
            }
            None => determine_multiplicity(own).1,
        };
        let partner_target = explicit_source(own).unwrap_or_else(|| determine_multiplicity(partner).1);

        if let Some(set) = derived.constraints.get_mut(id) {
            set.target_multiplicity = Some(own_target);
            set.source_multiplicity = Some(partner_target);
        }
        if let Some(set) = derived.constraints.get_mut(&partner_id) {
            set.target_multiplicity = Some(partner_target);
            set.source_multiplicity = Some(own_target);
        }
    }
    Ok(())
}

fn element_of<'a>(graph: &'a SchemaGraph, id: &ElementId) -> Option<&'a Element> {
    let elements = graph.definition(&id.definition)?.elements()?;
    graph.element_at(elements, &id.path)
}

fn surviving_pairs(
    graph: &SchemaGraph,
    derived: &Derived,
    id: &ElementId,
    element: &Element,
    set: &ConstraintSet,
    options: &Options,
    messages: &mut Messages,
) -> Vec<ConstraintPair> {
    if !set.eligible {
        return Vec::new();
    }
    let Some(target) = element.target.as_deref() else {
        return Vec::new();
    };
    let principal_def = derived.principal_definition(id, target);
    let Some(principal_elements) = graph.definition(principal_def).and_then(|d| d.elements()) else {
        return Vec::new();
    };
    let Some(own_elements) = graph.definition(&id.definition).and_then(|d| d.elements()) else {
        return Vec::new();
    };

    let candidates: Vec<ConstraintPair> = if element.is_managed() {
        derived
            .foreign_keys
            .get(id)
            .map(|fks| {
                fks.iter()
                    .filter(|fk| {
                        fk.principal
                            .first()
                            .and_then(|p| principal_elements.get(p))
                            .is_some_and(|p| p.key && !p.is_ignored())
                    })
                    .map(|fk| ConstraintPair::new(id.sibling(&fk.name), fk.principal.clone()))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        set.pairs.clone()
    };

    let mut pairs: Vec<ConstraintPair> = candidates
        .into_iter()
        .filter(|pair| {
            let dependent = rendered_scalar(graph, own_elements, &pair.dependent);
            let principal = rendered_scalar(graph, principal_elements, &pair.principal);
            let principal_is_key = pair
                .principal
                .first()
                .and_then(|p| principal_elements.get(p))
                .is_some_and(|p| p.key);
            dependent && principal && (!options.is_v2() || principal_is_key)
        })
        .collect();

    if options.is_v2() && !pairs.is_empty() {
        let uncovered: Vec<&String> = principal_elements
            .iter()
            .filter(|(_, e)| e.key && !e.is_ignored() && !e.is_association())
            .map(|(name, _)| name)
            .filter(|name| !pairs.iter().any(|p| p.principal.first() == Some(*name)))
            .collect();
        if !uncovered.is_empty() {
            if options.odata_v2_partial_constraints {
                let name = id.to_string();
                messages.info(
                    "odata-spec-violation-constraints",
                    id.location(),
                    &[("name", name.as_str()), ("target", principal_def)],
                );
            } else {
                trace!(association = %id, "partial constraints voided");
                pairs.clear();
            }
        }
    }
    pairs
}

fn rendered_scalar(graph: &SchemaGraph, elements: &Elements, path: &[String]) -> bool {
    if path.is_empty() {
        return false;
    }
    // every step of the path must be rendered
    let mut current = elements;
    for (index, segment) in path.iter().enumerate() {
        let Some(element) = current.get(segment) else {
            return false;
        };
        if element.is_ignored() || element.is_association() {
            return false;
        }
        if index + 1 == path.len() {
            return !graph.is_structured(element);
        }
        let Some(nested) = graph.structure_of(element) else {
            return false;
        };
        current = nested;
    }
    false
}

/// Target multiplicity after partner mirroring, or as declared.
pub fn target_multiplicity(derived: &Derived, id: &ElementId, element: &Element) -> Multiplicity {
    derived
        .constraints
        .get(id)
        .and_then(|c| c.target_multiplicity)
        .unwrap_or_else(|| determine_multiplicity(element).1)
}

/// `(source, target)` multiplicity of an association from its own cardinality.
pub fn determine_multiplicity(element: &Element) -> (Multiplicity, Multiplicity) {
    let composition = element.is_composition();
    let cardinality = element.cardinality.clone().unwrap_or_default();

    let source = match cardinality.src {
        Some(CardinalityBound::Count(1)) if composition => Multiplicity::One,
        Some(CardinalityBound::Count(1)) if cardinality.srcmin == Some(1) => Multiplicity::One,
        Some(CardinalityBound::Count(1)) => Multiplicity::ZeroOrOne,
        Some(_) => Multiplicity::Many,
        None if composition => Multiplicity::One,
        None => Multiplicity::Many,
    };
    let target = match cardinality.max {
        Some(max) if max.is_many() => Multiplicity::Many,
        None if composition => Multiplicity::Many,
        _ if cardinality.min == Some(1) => Multiplicity::One,
        _ => Multiplicity::ZeroOrOne,
    };
    (source, target)
}

/// Target multiplicity implied for the partner by an explicit `src`.
fn explicit_source(element: &Element) -> Option<Multiplicity> {
    let cardinality = element.cardinality.as_ref()?;
    Some(match cardinality.src? {
        bound if bound.is_many() => Multiplicity::Many,
        _ if cardinality.srcmin == Some(1) => Multiplicity::One,
        _ => Multiplicity::ZeroOrOne,
    })
}
