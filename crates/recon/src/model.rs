use serde::Serialize;

use crate::arena::{Arena, ObsKind};
use crate::averaging::FieldAverage;
use crate::group::{CanonicalGroup, GroupState};
use crate::resolver::ResolutionProof;

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub dataset: String,
    /// Tag with ambiguity marker: `A`, `A?`, `A&`.
    pub tag: String,
    pub energy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub spin_parity: String,
    pub firm: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub anchor: String,
    pub anchor_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Dataset id of the reference member.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adopted_spin_parity: Option<String>,
    pub state: GroupState,
    pub members: Vec<MemberView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gammas: Vec<GroupView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub averages: Vec<FieldAverage>,
}

impl GroupView {
    pub fn from_group(arena: &Arena, group: &CanonicalGroup) -> Self {
        GroupView {
            anchor: group.anchor.to_string(),
            anchor_value: group.anchor.value,
            label: group.anchor.label.clone(),
            reference: group
                .reference
                .map(|r| arena.dataset(arena.obs(r).dataset).id.clone()),
            adopted_spin_parity: group.adopted_spin_parity.as_ref().map(|sp| sp.to_string()),
            state: group.state,
            members: group
                .members
                .iter()
                .map(|m| {
                    let o = arena.obs(m.obs);
                    MemberView {
                        dataset: arena.dataset(m.dataset).id.clone(),
                        tag: m.tag.to_string(),
                        energy: o.energy_text.clone(),
                        spin_parity: o.spin_parity_text.clone(),
                        firm: m.is_firm(),
                    }
                })
                .collect(),
            gammas: group
                .children
                .iter()
                .map(|c| GroupView::from_group(arena, c))
                .collect(),
            averages: group.averages.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unplaced
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Level,
    Gamma,
}

impl From<ObsKind> for EntityKind {
    fn from(kind: ObsKind) -> Self {
        match kind {
            ObsKind::Level => EntityKind::Level,
            ObsKind::Gamma { .. } => EntityKind::Gamma,
        }
    }
}

/// Observation kept out of matching.
#[derive(Debug, Clone, Serialize)]
pub struct UnplacedView {
    pub dataset: String,
    pub kind: EntityKind,
    pub energy: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupingSummary {
    pub level_groups: usize,
    pub gamma_groups: usize,
    pub singletons: usize,
    pub members: usize,
    pub multiply_assigned: usize,
    pub uncertain: usize,
    pub with_reference: usize,
    pub pruned_groups: usize,
    pub deferred_decisions: usize,
    pub refined_placements: usize,
    pub no_consensus: usize,
    pub components_solved: usize,
    pub bisections: usize,
    pub cap_hits: usize,
    pub unplaced: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetView {
    pub id: String,
    pub tag: String,
    pub reference: bool,
    pub levels: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupingMeta {
    pub config_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nuclide: Option<String>,
    pub engine_version: String,
    pub run_at: String,
    pub datasets: Vec<DatasetView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupingResult {
    pub meta: GroupingMeta,
    pub summary: GroupingSummary,
    pub groups: Vec<GroupView>,
    pub unplaced: Vec<UnplacedView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proofs: Vec<ResolutionProof>,
}
