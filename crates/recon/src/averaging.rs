//! Hand-off of finalized groups to an external averaging engine.
//!
//! The engine itself is a black box: it receives one field's values for one
//! group and returns an adopted value with diagnostics, which is attached to
//! the group untouched.

use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::config::AveragingConfig;
use crate::group::{CanonicalGroup, GroupSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AveragedField {
    Energy,
    /// Relative gamma intensity.
    Intensity,
    /// Level half-life, unit passed through as reported.
    HalfLife,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AveragingMode {
    #[default]
    Weighted,
    Unweighted,
    /// Let the engine pick whichever method it trusts.
    Best,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentCategory {
    Default,
    All,
    Unweighted,
    NonAverage,
    Adopted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    pub value: f64,
    pub upper: f64,
    pub lower: f64,
    /// Dataset tag of the contributing member.
    pub source: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AveragingRequest {
    pub field: AveragedField,
    pub values: Vec<FieldValue>,
    pub min_weight: f64,
    pub mode: AveragingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChiSquared {
    pub reduced: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AveragingComment {
    pub category: CommentCategory,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AveragingOutcome {
    pub value: f64,
    pub upper: f64,
    pub lower: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chi_squared: Option<ChiSquared>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<AveragingComment>,
}

/// Outcome attached to a group for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldAverage {
    pub field: AveragedField,
    pub outcome: AveragingOutcome,
}

pub trait AveragingEngine {
    /// `None` when the engine declines (too few usable values, etc.).
    fn average(&self, request: &AveragingRequest) -> Option<AveragingOutcome>;
}

/// Numeric values of `field` from the group's members. Placeholder energies
/// and limit-only values are skipped.
pub fn collect_field_values(
    arena: &Arena,
    group: &CanonicalGroup,
    field: AveragedField,
    exclude_multiply_assigned: bool,
) -> Vec<FieldValue> {
    group
        .members
        .iter()
        .filter(|m| !(exclude_multiply_assigned && m.tag.markers.multiply_assigned))
        .filter_map(|m| {
            let o = arena.obs(m.obs);
            let (quantity, unit) = match field {
                AveragedField::Energy => (o.energy.as_ref(), "keV"),
                AveragedField::Intensity => (o.intensity.as_ref(), ""),
                AveragedField::HalfLife => (o.half_life.as_ref(), o.half_life_unit.as_str()),
            };
            let q = quantity?;
            if q.is_placeholder() || matches!(q.uncertainty, nuclink_core::Uncertainty::Limit { .. }) {
                return None;
            }
            Some(FieldValue {
                value: q.value,
                upper: q.uncertainty.upper(),
                lower: q.uncertainty.lower(),
                source: m.tag.label.clone(),
                unit: unit.to_string(),
            })
        })
        .collect()
}

fn applies(field: AveragedField, is_level_group: bool) -> bool {
    match field {
        AveragedField::Energy => true,
        AveragedField::Intensity => !is_level_group,
        AveragedField::HalfLife => is_level_group,
    }
}

/// Average every configured field of every group and its gamma children.
/// Returns how many outcomes were attached.
pub fn attach_averages(
    arena: &Arena,
    groups: &mut GroupSet,
    engine: &dyn AveragingEngine,
    config: &AveragingConfig,
) -> usize {
    groups
        .groups_mut()
        .iter_mut()
        .map(|g| attach_one(arena, g, engine, config, true))
        .sum()
}

fn attach_one(
    arena: &Arena,
    group: &mut CanonicalGroup,
    engine: &dyn AveragingEngine,
    config: &AveragingConfig,
    is_level_group: bool,
) -> usize {
    let mut attached = 0;
    group.averages.clear();
    for &field in &config.fields {
        if !applies(field, is_level_group) {
            continue;
        }
        let values = collect_field_values(arena, group, field, config.exclude_multiply_assigned);
        if values.is_empty() {
            continue;
        }
        let request = AveragingRequest {
            field,
            values,
            min_weight: config.min_weight,
            mode: config.mode,
        };
        if let Some(outcome) = engine.average(&request) {
            group.averages.push(FieldAverage { field, outcome });
            attached += 1;
        }
    }
    for child in &mut group.children {
        attached += attach_one(arena, child, engine, config, false);
    }
    attached
}
