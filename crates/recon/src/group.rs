use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use nuclink_core::{Quantity, SpinParity, Uncertainty};
use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::arena::{Arena, DatasetIdx, ObsId};
use crate::averaging::FieldAverage;
use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Markers {
    pub uncertain_placement: bool,
    pub multiply_assigned: bool,
}

impl Markers {
    pub fn is_clear(&self) -> bool {
        !self.uncertain_placement && !self.multiply_assigned
    }
}

/// Dataset tag plus ambiguity markers. Displays as `A`, `A?` or `A&`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub label: String,
    pub markers: Markers,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        if self.markers.multiply_assigned {
            write!(f, "&")
        } else if self.markers.uncertain_placement {
            write!(f, "?")
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub obs: ObsId,
    pub dataset: DatasetIdx,
    pub tag: Tag,
}

impl Member {
    pub fn new(arena: &Arena, obs: ObsId) -> Self {
        let o = arena.obs(obs);
        Member {
            obs,
            dataset: o.dataset,
            tag: Tag {
                label: arena.dataset(o.dataset).tag.clone(),
                markers: Markers {
                    uncertain_placement: o.questionable,
                    multiply_assigned: false,
                },
            },
        }
    }

    pub fn with_markers(mut self, markers: Markers) -> Self {
        self.tag.markers.uncertain_placement |= markers.uncertain_placement;
        self.tag.markers.multiply_assigned |= markers.multiply_assigned;
        self
    }

    /// Placed without any ambiguity marker.
    pub fn is_firm(&self) -> bool {
        self.tag.markers.is_clear()
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Created,
    Growing,
    SubgroupedForGammas,
    SpinParityRefined,
    Finalized,
}

impl GroupState {
    /// Move forward. Staying put is allowed; going back is not.
    pub fn advance(&mut self, next: GroupState) -> Result<(), ReconError> {
        if next < *self {
            return Err(ReconError::Invariant(format!(
                "illegal group state transition {self:?} -> {next:?}"
            )));
        }
        *self = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Canonical groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CanonicalGroup {
    pub members: Vec<Member>,
    /// Member from the reference dataset.
    pub reference: Option<ObsId>,
    /// Energy the group is sorted and matched by.
    pub anchor: Quantity,
    pub adopted_spin_parity: Option<SpinParity>,
    pub children: Vec<CanonicalGroup>,
    pub state: GroupState,
    pub averages: Vec<FieldAverage>,
}

/// (placeholder label, anchor energy)
pub type SortKey = (Option<String>, OrderedFloat<f64>);

impl CanonicalGroup {
    pub fn singleton(arena: &Arena, member: Member) -> Self {
        let mut group = CanonicalGroup {
            members: vec![member],
            reference: None,
            anchor: Quantity::new(0.0, Uncertainty::None),
            adopted_spin_parity: None,
            children: Vec::new(),
            state: GroupState::Created,
            averages: Vec::new(),
        };
        group.refresh(arena);
        group
    }

    pub fn sort_key(&self) -> SortKey {
        (self.anchor.label.clone(), OrderedFloat(self.anchor.value))
    }

    pub fn holds_dataset(&self, dataset: DatasetIdx) -> bool {
        self.members.iter().any(|m| m.dataset == dataset)
    }

    pub fn contains(&self, obs: ObsId) -> bool {
        self.members.iter().any(|m| m.obs == obs)
    }

    pub fn member(&self, obs: ObsId) -> Option<&Member> {
        self.members.iter().find(|m| m.obs == obs)
    }

    pub fn member_mut(&mut self, obs: ObsId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.obs == obs)
    }

    pub fn has_firm_member(&self) -> bool {
        self.members.iter().any(Member::is_firm)
    }

    /// Recompute reference and anchor after a membership change.
    pub fn refresh(&mut self, arena: &Arena) {
        self.reference = self
            .members
            .iter()
            .find(|m| arena.is_reference(m.dataset))
            .map(|m| m.obs);
        if let Some(anchor) = self.best_estimate(arena) {
            self.anchor = anchor;
        }
    }

    /// The reference energy if present, else the member preferred by
    /// firmness, then tightest uncertainty, then earliest dataset.
    fn best_estimate(&self, arena: &Arena) -> Option<Quantity> {
        if let Some(reference) = self.reference {
            if let Some(q) = &arena.obs(reference).energy {
                return Some(q.clone());
            }
        }
        self.members
            .iter()
            .filter_map(|m| arena.obs(m.obs).energy.as_ref().map(|q| (m, q)))
            .min_by(|(ma, qa), (mb, qb)| {
                let width = |q: &Quantity| {
                    if q.uncertainty.is_numeric() {
                        OrderedFloat(q.sigma())
                    } else {
                        OrderedFloat(f64::INFINITY)
                    }
                };
                (!ma.is_firm(), width(qa), ma.dataset, ma.obs)
                    .cmp(&(!mb.is_firm(), width(qb), mb.dataset, mb.obs))
            })
            .map(|(_, q)| q.clone())
    }

    fn check(&self, depth: usize) -> Result<(), ReconError> {
        if self.members.is_empty() {
            return Err(ReconError::Invariant(format!("empty group at {}", self.anchor)));
        }
        let mut seen = BTreeSet::new();
        for m in &self.members {
            if !seen.insert(m.dataset) {
                return Err(ReconError::Invariant(format!(
                    "group at {} holds two members of dataset {}",
                    self.anchor, m.tag.label
                )));
            }
        }
        check_sorted(&self.children, depth + 1)?;
        for child in &self.children {
            child.check(depth + 1)?;
        }
        Ok(())
    }
}

fn check_sorted(groups: &[CanonicalGroup], depth: usize) -> Result<(), ReconError> {
    for pair in groups.windows(2) {
        if pair[0].sort_key() > pair[1].sort_key() {
            return Err(ReconError::Invariant(format!(
                "groups out of order at depth {depth}: {} before {}",
                pair[0].anchor, pair[1].anchor
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Group set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    groups: Vec<CanonicalGroup>,
}

#[derive(Debug, Default)]
pub struct PruneOutcome {
    pub removed: usize,
    /// Members left with no placement at all.
    pub released: Vec<Member>,
}

impl GroupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups(groups: Vec<CanonicalGroup>) -> Self {
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[CanonicalGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [CanonicalGroup] {
        &mut self.groups
    }

    pub fn get(&self, index: usize) -> Option<&CanonicalGroup> {
        self.groups.get(index)
    }

    pub fn into_groups(self) -> Vec<CanonicalGroup> {
        self.groups
    }

    /// New singleton at its sorted position. Returns the position.
    pub fn insert_unmatched(&mut self, arena: &Arena, member: Member) -> usize {
        let group = CanonicalGroup::singleton(arena, member);
        let key = group.sort_key();
        let at = self.groups.partition_point(|g| g.sort_key() <= key);
        self.groups.insert(at, group);
        at
    }

    pub fn add_member(
        &mut self,
        arena: &Arena,
        index: usize,
        member: Member,
    ) -> Result<(), ReconError> {
        let group = self
            .groups
            .get_mut(index)
            .ok_or_else(|| ReconError::Invariant(format!("no group at index {index}")))?;
        if group.holds_dataset(member.dataset) {
            return Err(ReconError::Invariant(format!(
                "group at {} already holds a member of dataset {}",
                group.anchor, member.tag.label
            )));
        }
        if group.state == GroupState::Finalized {
            return Err(ReconError::Invariant(format!(
                "group at {} is finalized",
                group.anchor
            )));
        }
        group.state.advance(GroupState::Growing)?;
        group.members.push(member);
        group.refresh(arena);
        Ok(())
    }

    pub fn remove_member(&mut self, arena: &Arena, index: usize, obs: ObsId) -> Option<Member> {
        let group = self.groups.get_mut(index)?;
        let pos = group.members.iter().position(|m| m.obs == obs)?;
        let member = group.members.remove(pos);
        group.refresh(arena);
        Some(member)
    }

    /// Indices of every group holding `obs`.
    pub fn placements(&self, obs: ObsId) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.contains(obs))
            .map(|(i, _)| i)
            .collect()
    }

    /// Clear the multiply-assigned marker of `obs` once a single placement
    /// remains.
    pub fn settle_multiplicity(&mut self, obs: ObsId) {
        let placements = self.placements(obs);
        if let [only] = placements.as_slice() {
            if let Some(m) = self.groups[*only].member_mut(obs) {
                m.tag.markers.multiply_assigned = false;
            }
        }
    }

    /// Remove every group without a reference whose members are all
    /// ambiguity-marked.
    pub fn prune_non_firm(&mut self, arena: &Arena) -> PruneOutcome {
        let doomed: Vec<bool> = self
            .groups
            .iter()
            .map(|g| g.reference.is_none() && !g.has_firm_member())
            .collect();
        if !doomed.contains(&true) {
            return PruneOutcome::default();
        }

        let mut outcome = PruneOutcome::default();
        let mut affected = Vec::new();
        let groups = std::mem::take(&mut self.groups);
        for (group, doomed) in groups.into_iter().zip(doomed) {
            if !doomed {
                self.groups.push(group);
                continue;
            }
            outcome.removed += 1;
            affected.extend(group.members);
        }

        for mut member in affected {
            if self.groups.iter().any(|g| g.contains(member.obs)) {
                self.settle_multiplicity(member.obs);
            } else if !outcome.released.iter().any(|m| m.obs == member.obs) {
                member.tag.markers = Member::new(arena, member.obs).tag.markers;
                outcome.released.push(member);
            }
        }
        outcome
    }

    /// Members in canonical dataset order, recursively.
    pub fn reorder_by_dataset_order(&mut self, order: &[DatasetIdx]) {
        for group in &mut self.groups {
            reorder_group(group, order);
        }
    }

    pub fn resort(&mut self) {
        self.groups.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    /// Drop groups whose last member was removed.
    pub fn drop_empty(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|g| !g.members.is_empty());
        before - self.groups.len()
    }

    pub fn check_invariants(&self) -> Result<(), ReconError> {
        check_sorted(&self.groups, 0)?;
        for group in &self.groups {
            group.check(0)?;
        }
        Ok(())
    }
}

fn reorder_group(group: &mut CanonicalGroup, order: &[DatasetIdx]) {
    let rank = |d: DatasetIdx| order.iter().position(|&o| o == d).unwrap_or(usize::MAX);
    group
        .members
        .sort_by(|a, b| match rank(a.dataset).cmp(&rank(b.dataset)) {
            Ordering::Equal => a.obs.cmp(&b.obs),
            other => other,
        });
    for child in &mut group.children {
        reorder_group(child, order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nuclink_core::{DatasetRecord, LevelRecord, ObservationInput};

    fn arena(datasets: Vec<Vec<(&str, &str)>>) -> Arena {
        let datasets = datasets
            .into_iter()
            .enumerate()
            .map(|(i, levels)| {
                let tag = ((b'A' + i as u8) as char).to_string();
                DatasetRecord::new(
                    &format!("DS{i}"),
                    &tag,
                    levels
                        .into_iter()
                        .map(|(e, u)| LevelRecord::new(e, u))
                        .collect(),
                )
            })
            .collect();
        Arena::build(&ObservationInput {
            nuclide: None,
            datasets,
        })
        .unwrap()
    }

    fn marked(arena: &Arena, obs: u32, multiply: bool) -> Member {
        Member::new(arena, ObsId(obs)).with_markers(Markers {
            uncertain_placement: !multiply,
            multiply_assigned: multiply,
        })
    }

    #[test]
    fn tag_display() {
        let mut tag = Tag {
            label: "A".into(),
            markers: Markers::default(),
        };
        assert_eq!(tag.to_string(), "A");
        tag.markers.uncertain_placement = true;
        assert_eq!(tag.to_string(), "A?");
        tag.markers.multiply_assigned = true;
        assert_eq!(tag.to_string(), "A&");
    }

    #[test]
    fn state_moves_forward_only() {
        let mut state = GroupState::Created;
        state.advance(GroupState::Growing).unwrap();
        state.advance(GroupState::Growing).unwrap();
        state.advance(GroupState::Finalized).unwrap();
        assert!(state.advance(GroupState::SpinParityRefined).is_err());
    }

    #[test]
    fn insert_unmatched_keeps_order() {
        let arena = arena(vec![vec![("100", "1"), ("300", "1"), ("200", "1")]]);
        let mut set = GroupSet::new();
        for i in 0..3 {
            set.insert_unmatched(&arena, Member::new(&arena, ObsId(i)));
        }
        let anchors: Vec<f64> = set.groups().iter().map(|g| g.anchor.value).collect();
        assert_eq!(anchors, vec![100.0, 200.0, 300.0]);
        set.check_invariants().unwrap();
    }

    #[test]
    fn placeholders_sort_after_plain_energies() {
        let arena = arena(vec![vec![("X+10", ""), ("500", "")]]);
        let mut set = GroupSet::new();
        set.insert_unmatched(&arena, Member::new(&arena, ObsId(0)));
        set.insert_unmatched(&arena, Member::new(&arena, ObsId(1)));
        assert_eq!(set.groups()[0].anchor.value, 500.0);
        assert_eq!(set.groups()[1].anchor.label.as_deref(), Some("X"));
    }

    #[test]
    fn add_member_rejects_second_member_of_dataset() {
        let arena = arena(vec![vec![("100", "1"), ("100.2", "1")]]);
        let mut set = GroupSet::new();
        set.insert_unmatched(&arena, Member::new(&arena, ObsId(0)));
        let err = set
            .add_member(&arena, 0, Member::new(&arena, ObsId(1)))
            .unwrap_err();
        assert!(matches!(err, ReconError::Invariant(_)));
    }

    #[test]
    fn anchor_prefers_firm_then_tight_uncertainty() {
        let arena = arena(vec![
            vec![("100.0", "5")],
            vec![("100.4", "1")],
            vec![("100.2", "1")],
        ]);
        let mut set = GroupSet::new();
        set.insert_unmatched(&arena, Member::new(&arena, ObsId(0)));
        set.add_member(&arena, 0, Member::new(&arena, ObsId(1))).unwrap();
        assert_eq!(set.groups()[0].anchor.value, 100.4);
        set.add_member(&arena, 0, marked(&arena, 2, false)).unwrap();
        // equally tight, but marked
        assert_eq!(set.groups()[0].anchor.value, 100.4);
        assert_eq!(set.groups()[0].state, GroupState::Growing);
    }

    #[test]
    fn prune_releases_members_without_other_placement() {
        let arena = arena(vec![vec![("100", "1")], vec![("100.5", "1")], vec![("101", "1")]]);
        let mut set = GroupSet::new();
        set.insert_unmatched(&arena, marked(&arena, 0, false));
        set.add_member(&arena, 0, marked(&arena, 1, false)).unwrap();
        set.add_member(&arena, 0, marked(&arena, 2, false)).unwrap();

        let outcome = set.prune_non_firm(&arena);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.released.len(), 3);
        assert!(set.is_empty());
        assert!(outcome.released.iter().all(Member::is_firm));
    }

    #[test]
    fn prune_clears_multiplicity_of_surviving_placement() {
        let arena = arena(vec![vec![("100", "1"), ("104", "1")], vec![("102", "1")]]);
        let mut set = GroupSet::new();
        set.insert_unmatched(&arena, Member::new(&arena, ObsId(0)));
        // lone multiply-assigned member in its second group
        set.insert_unmatched(&arena, marked(&arena, 2, true));
        set.add_member(&arena, 0, marked(&arena, 2, true)).unwrap();

        let outcome = set.prune_non_firm(&arena);
        assert_eq!(outcome.removed, 1);
        assert!(outcome.released.is_empty());
        let kept = set.groups()[0].member(ObsId(2)).unwrap();
        assert!(!kept.tag.markers.multiply_assigned);
    }

    #[test]
    fn reorder_follows_dataset_order() {
        let arena = arena(vec![vec![("100", "1")], vec![("100.1", "1")]]);
        let mut set = GroupSet::new();
        set.insert_unmatched(&arena, Member::new(&arena, ObsId(1)));
        set.add_member(&arena, 0, Member::new(&arena, ObsId(0))).unwrap();
        set.reorder_by_dataset_order(&[DatasetIdx(0), DatasetIdx(1)]);
        let order: Vec<ObsId> = set.groups()[0].members.iter().map(|m| m.obs).collect();
        assert_eq!(order, vec![ObsId(0), ObsId(1)]);
    }

    #[test]
    fn invariant_check_catches_unsorted_groups() {
        let arena = arena(vec![vec![("100", "1"), ("200", "1")]]);
        let a = CanonicalGroup::singleton(&arena, Member::new(&arena, ObsId(1)));
        let b = CanonicalGroup::singleton(&arena, Member::new(&arena, ObsId(0)));
        let set = GroupSet::from_groups(vec![a, b]);
        assert!(set.check_invariants().is_err());
    }
}
