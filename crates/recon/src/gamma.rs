use std::collections::BTreeMap;

use crate::arena::{Arena, ObsId};
use crate::error::ReconError;
use crate::group::{CanonicalGroup, GroupSet, GroupState};
use crate::pipeline::{GroupingPipeline, PassParams, PipelineStats};
use crate::strength::Consistency;

/// Level observation → every level group holding it.
pub type LevelGroupIndex = BTreeMap<ObsId, Vec<usize>>;

pub fn level_group_index(groups: &GroupSet) -> LevelGroupIndex {
    let mut index = LevelGroupIndex::new();
    for (gi, group) in groups.groups().iter().enumerate() {
        for member in &group.members {
            index.entry(member.obs).or_default().push(gi);
        }
    }
    index
}

/// Group the gammas of every level group and attach them as children.
pub fn subgroup_gammas(
    arena: &Arena,
    groups: &mut GroupSet,
    params: &PassParams,
) -> Result<PipelineStats, ReconError> {
    let index = level_group_index(groups);
    let mut stats = PipelineStats::default();
    for group in groups.groups_mut() {
        stats.absorb(subgroup_one(arena, group, params, &index)?);
    }
    Ok(stats)
}

/// Rebuild the gamma children of a single level group.
pub fn subgroup_one(
    arena: &Arena,
    group: &mut CanonicalGroup,
    params: &PassParams,
    index: &LevelGroupIndex,
) -> Result<PipelineStats, ReconError> {
    let gammas: Vec<ObsId> = group
        .members
        .iter()
        .flat_map(|m| arena.obs(m.obs).gammas.iter().copied())
        .filter(|&g| arena.obs(g).energy.is_some())
        .collect();

    let scope = format!("gammas of {}", group.anchor);
    let pipeline = GroupingPipeline::new(arena, params, Consistency::FinalLevel(index), scope);
    let (children, stats) = pipeline.run(&gammas)?;
    group.children = children.into_groups();
    group.state.advance(GroupState::SubgroupedForGammas)?;
    Ok(stats)
}
