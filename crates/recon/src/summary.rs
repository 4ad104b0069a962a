use crate::backprop::BackpropOutcome;
use crate::group::CanonicalGroup;
use crate::model::GroupingSummary;
use crate::pipeline::PipelineStats;

/// Compute summary statistics from finalized level groups and run counters.
pub fn compute_summary(
    groups: &[CanonicalGroup],
    stats: &PipelineStats,
    backprop: &BackpropOutcome,
    unplaced: usize,
) -> GroupingSummary {
    let mut summary = GroupingSummary {
        level_groups: groups.len(),
        pruned_groups: stats.pruned,
        deferred_decisions: stats.deferred.len(),
        refined_placements: backprop.dropped_placements,
        no_consensus: backprop.no_consensus,
        components_solved: stats.components,
        bisections: stats.bisections,
        cap_hits: stats.cap_hits,
        unplaced,
        ..GroupingSummary::default()
    };

    for group in groups {
        summary.gamma_groups += group.children.len();
        summary.members += group.members.len();
        if group.members.len() == 1 {
            summary.singletons += 1;
        }
        if group.reference.is_some() {
            summary.with_reference += 1;
        }
        for member in &group.members {
            if member.tag.markers.multiply_assigned {
                summary.multiply_assigned += 1;
            } else if member.tag.markers.uncertain_placement {
                summary.uncertain += 1;
            }
        }
    }
    summary
}
