//! Relation graph of the normalized schema.
//!
//! For every entity type this module declares the dependent tables holding a foreign key
//! onto the entity's id, in the order they must be cleared before the parent row can go.
//! Grandchildren come before their parents: `measure_area_priority_grant` references
//! `measure_area_priority` through a composite key and is therefore always listed first.
//!
//! Keep these lists in sync with the foreign keys of the schema. A missing entry surfaces at
//! runtime as a constraint violation on the parent delete.

use crate::EntityType;

/// A table whose `column` references an entity id.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Dependent {
    pub table: &'static str,
    pub column: &'static str,
}

const fn dep(table: &'static str, column: &'static str) -> Dependent {
    Dependent { table, column }
}

const MEASURE_DEPENDENTS: &[Dependent] = &[
    dep("measure_has_type", "measure_id"),
    dep("measure_has_stakeholder", "measure_id"),
    dep("measure_area_priority_grant", "measure_id"),
    dep("measure_area_priority", "measure_id"),
    dep("measure_has_benefits", "measure_id"),
    dep("measure_has_species", "measure_id"),
];

const AREA_DEPENDENTS: &[Dependent] = &[
    dep("measure_area_priority_grant", "area_id"),
    dep("measure_area_priority", "area_id"),
    dep("species_area_priority", "area_id"),
    dep("area_funding_schemes", "area_id"),
    dep("habitat_creation_area", "area_id"),
    dep("habitat_management_area", "area_id"),
];

const PRIORITY_DEPENDENTS: &[Dependent] = &[
    dep("measure_area_priority_grant", "priority_id"),
    dep("measure_area_priority", "priority_id"),
    dep("species_area_priority", "priority_id"),
];

const SPECIES_DEPENDENTS: &[Dependent] = &[
    dep("species_area_priority", "species_id"),
    dep("measure_has_species", "species_id"),
];

const GRANT_DEPENDENTS: &[Dependent] = &[dep("measure_area_priority_grant", "grant_id")];

const HABITAT_DEPENDENTS: &[Dependent] = &[
    dep("habitat_creation_area", "habitat_id"),
    dep("habitat_management_area", "habitat_id"),
];

/// Ordered dependents of `entity_type`, leaf-most first.
#[must_use]
pub fn dependents_of(entity_type: EntityType) -> &'static [Dependent] {
    match entity_type {
        EntityType::Measure => MEASURE_DEPENDENTS,
        EntityType::Area => AREA_DEPENDENTS,
        EntityType::Priority => PRIORITY_DEPENDENTS,
        EntityType::Species => SPECIES_DEPENDENTS,
        EntityType::Grant => GRANT_DEPENDENTS,
        EntityType::Habitat => HABITAT_DEPENDENTS,
    }
}

/// A two-column bridge table whose rows for one owner can be replaced wholesale.
///
/// Only bridges that no other table references are listed here, so clearing and
/// re-inserting them inside one transaction never trips a foreign key.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Bridge {
    pub category: &'static str,
    pub table: &'static str,
    pub owner_column: &'static str,
    pub member_column: &'static str,
}

const fn bridge_def(
    category: &'static str,
    table: &'static str,
    owner_column: &'static str,
    member_column: &'static str,
) -> Bridge {
    Bridge { category, table, owner_column, member_column }
}

const MEASURE_BRIDGES: &[Bridge] = &[
    bridge_def("types", "measure_has_type", "measure_id", "measure_type_id"),
    bridge_def("stakeholders", "measure_has_stakeholder", "measure_id", "stakeholder_id"),
    bridge_def("benefits", "measure_has_benefits", "measure_id", "benefit_id"),
    bridge_def("species", "measure_has_species", "measure_id", "species_id"),
];

const AREA_BRIDGES: &[Bridge] = &[
    bridge_def("creation_habitats", "habitat_creation_area", "area_id", "habitat_id"),
    bridge_def("management_habitats", "habitat_management_area", "area_id", "habitat_id"),
];

const HABITAT_BRIDGES: &[Bridge] = &[
    bridge_def("creation_areas", "habitat_creation_area", "habitat_id", "area_id"),
    bridge_def("management_areas", "habitat_management_area", "habitat_id", "area_id"),
];

const SPECIES_BRIDGES: &[Bridge] =
    &[bridge_def("measures", "measure_has_species", "species_id", "measure_id")];

#[must_use]
pub fn bridges_of(entity_type: EntityType) -> &'static [Bridge] {
    match entity_type {
        EntityType::Measure => MEASURE_BRIDGES,
        EntityType::Area => AREA_BRIDGES,
        EntityType::Habitat => HABITAT_BRIDGES,
        EntityType::Species => SPECIES_BRIDGES,
        EntityType::Priority | EntityType::Grant => &[],
    }
}

#[must_use]
pub fn bridge(entity_type: EntityType, category: &str) -> Option<&'static Bridge> {
    bridges_of(entity_type).iter().find(|bridge| bridge.category == category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_links_are_cleared_before_measure_area_priority() {
        for entity_type in [EntityType::Measure, EntityType::Area, EntityType::Priority] {
            let tables: Vec<_> = dependents_of(entity_type).iter().map(|dep| dep.table).collect();
            let grant_pos = tables.iter().position(|t| *t == "measure_area_priority_grant");
            let map_pos = tables.iter().position(|t| *t == "measure_area_priority");
            assert!(grant_pos < map_pos, "{entity_type}: {tables:?}");
        }
    }

    #[test]
    fn every_dependent_column_names_the_entity_id() {
        for entity_type in EntityType::ALL {
            for dependent in dependents_of(entity_type) {
                assert_eq!(dependent.column, entity_type.id_column(), "{entity_type}");
            }
        }
    }

    #[test]
    fn bridges_are_owned_by_their_entity_and_appear_as_dependents() {
        for entity_type in EntityType::ALL {
            for bridge in bridges_of(entity_type) {
                assert_eq!(bridge.owner_column, entity_type.id_column());
                assert!(dependents_of(entity_type).iter().any(|dep| dep.table == bridge.table));
            }
        }
        assert!(bridge(EntityType::Measure, "types").is_some());
        assert!(bridge(EntityType::Grant, "types").is_none());
    }
}
