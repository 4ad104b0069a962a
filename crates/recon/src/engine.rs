use log::{debug, info};
use nuclink_core::ObservationInput;

use crate::arena::{Arena, ObsId};
use crate::averaging::{attach_averages, AveragingEngine};
use crate::backprop::{propagate_spin_parity, BackpropOutcome};
use crate::config::GroupingConfig;
use crate::error::ReconError;
use crate::gamma::{level_group_index, subgroup_gammas, subgroup_one};
use crate::group::{CanonicalGroup, GroupSet, GroupState};
use crate::model::{DatasetView, GroupView, GroupingMeta, GroupingResult, UnplacedView};
use crate::pipeline::{GroupingPipeline, PassParams, PipelineStats};
use crate::strength::Consistency;
use crate::summary::compute_summary;

/// Decode the observation store's JSON hand-off.
pub fn load_input_json(text: &str) -> Result<ObservationInput, ReconError> {
    serde_json::from_str(text).map_err(|e| ReconError::InputParse(e.to_string()))
}

/// Everything the grouping run produced, before serialization.
#[derive(Debug)]
pub struct GroupingOutcome {
    pub arena: Arena,
    pub groups: GroupSet,
    pub stats: PipelineStats,
    pub backprop: BackpropOutcome,
    pub unplaced: Vec<UnplacedView>,
}

/// Group every level and gamma of every dataset into finalized groups.
pub fn group_observations(
    config: &GroupingConfig,
    input: &ObservationInput,
) -> Result<GroupingOutcome, ReconError> {
    config.validate()?;
    let arena = Arena::build(input)?;
    let unplaced = collect_unplaced(&arena);

    let level_params = PassParams::levels(config);
    let gamma_params = PassParams::gammas(config);

    let (groups, stats, backprop) = {
        let pipeline = GroupingPipeline::new(
            &arena,
            &level_params,
            Consistency::GammaCascade {
                tolerance: config.gammas.tolerance,
                n_sigma: config.gammas.n_sigma,
            },
            "levels",
        );
        let (mut groups, mut stats) = pipeline.run(&arena.parsed_levels())?;
        debug!(
            "levels: {} groups from {} bins, {} components",
            groups.len(),
            stats.bins,
            stats.components
        );

        stats.absorb(subgroup_gammas(&arena, &mut groups, &gamma_params)?);

        let backprop = propagate_spin_parity(&arena, &mut groups, &stats.deferred, pipeline.evaluator())?;
        if !backprop.refined_groups.is_empty() {
            let index = level_group_index(&groups);
            for &gi in &backprop.refined_groups {
                if let Some(group) = groups.groups_mut().get_mut(gi) {
                    stats.absorb(subgroup_one(&arena, group, &gamma_params, &index)?);
                }
            }
        }
        (groups, stats, backprop)
    };

    let groups = finalize(&arena, groups)?;
    info!(
        "grouped {} levels into {} groups ({} unplaced)",
        arena.parsed_levels().len(),
        groups.len(),
        unplaced.len()
    );

    Ok(GroupingOutcome {
        arena,
        groups,
        stats,
        backprop,
        unplaced,
    })
}

fn finalize(arena: &Arena, mut groups: GroupSet) -> Result<GroupSet, ReconError> {
    let dropped = groups.drop_empty();
    if dropped > 0 {
        debug!("dropped {dropped} emptied level groups");
    }
    groups.resort();
    groups.reorder_by_dataset_order(&arena.processing_order());
    for group in groups.groups_mut() {
        group.state.advance(GroupState::SpinParityRefined)?;
        finalize_group(group)?;
    }
    groups.check_invariants()?;
    Ok(groups)
}

fn finalize_group(group: &mut CanonicalGroup) -> Result<(), ReconError> {
    group.state.advance(GroupState::Finalized)?;
    for child in &mut group.children {
        finalize_group(child)?;
    }
    Ok(())
}

fn collect_unplaced(arena: &Arena) -> Vec<UnplacedView> {
    let mut unplaced = Vec::new();
    let mut push = |id: ObsId, reason: String| {
        let o = arena.obs(id);
        unplaced.push(UnplacedView {
            dataset: arena.dataset(o.dataset).id.clone(),
            kind: o.kind.into(),
            energy: o.energy_text.clone(),
            reason,
        });
    };
    for dataset in arena.datasets() {
        for &level in &dataset.levels {
            let o = arena.obs(level);
            match &o.parse_error {
                Some(err) => {
                    push(level, err.clone());
                    for &g in &o.gammas {
                        push(g, "parent level unplaced".into());
                    }
                }
                None => {
                    for &g in &o.gammas {
                        if let Some(err) = &arena.obs(g).parse_error {
                            push(g, err.clone());
                        }
                    }
                }
            }
        }
    }
    unplaced
}

/// Run grouping and build the serializable result.
pub fn run(config: &GroupingConfig, input: &ObservationInput) -> Result<GroupingResult, ReconError> {
    run_with_averager(config, input, None)
}

/// As `run`, handing each finalized group to `averager`.
pub fn run_with_averager(
    config: &GroupingConfig,
    input: &ObservationInput,
    averager: Option<&dyn AveragingEngine>,
) -> Result<GroupingResult, ReconError> {
    let GroupingOutcome {
        arena,
        mut groups,
        stats,
        backprop,
        unplaced,
    } = group_observations(config, input)?;

    if let Some(engine) = averager {
        let attached = attach_averages(&arena, &mut groups, engine, &config.averaging);
        debug!("attached {attached} averages");
    }

    let summary = compute_summary(groups.groups(), &stats, &backprop, unplaced.len());

    Ok(GroupingResult {
        meta: GroupingMeta {
            config_name: config.name.clone(),
            nuclide: arena.nuclide().map(str::to_string),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            datasets: arena
                .datasets()
                .iter()
                .map(|d| DatasetView {
                    id: d.id.clone(),
                    tag: d.tag.clone(),
                    reference: d.reference,
                    levels: d.levels.len(),
                })
                .collect(),
        },
        summary,
        groups: groups
            .groups()
            .iter()
            .map(|g| GroupView::from_group(&arena, g))
            .collect(),
        unplaced,
        proofs: stats.proofs,
    })
}
