use std::collections::BTreeSet;

use log::{debug, warn};
use nuclink_core::SpinParity;

use crate::arena::{Arena, ObsId};
use crate::error::ReconError;
use crate::group::{CanonicalGroup, GroupSet};
use crate::strength::{Evaluator, StrengthLevel};

#[derive(Debug, Default)]
pub struct BackpropOutcome {
    pub adopted: usize,
    pub no_consensus: usize,
    pub dropped_placements: usize,
    /// Level groups whose membership changed.
    pub refined_groups: BTreeSet<usize>,
}

enum Consensus {
    Unconstrained,
    Conflict,
    Adopted(SpinParity),
}

/// AND of every non-reference member's spin-parity, optionally leaving
/// one observation out.
fn consensus(arena: &Arena, group: &CanonicalGroup, exclude: Option<ObsId>) -> Consensus {
    let mut adopted: Option<SpinParity> = None;
    let constraints = group
        .members
        .iter()
        .filter(|m| Some(m.obs) != exclude && Some(m.obs) != group.reference)
        .filter_map(|m| arena.obs(m.obs).spin_parity.as_ref());
    for sp in constraints {
        adopted = match adopted {
            None => Some(sp.clone()),
            Some(acc) => match acc.intersect(sp) {
                Some(narrowed) => Some(narrowed),
                None => return Consensus::Conflict,
            },
        };
    }
    match adopted {
        Some(sp) => Consensus::Adopted(sp),
        None => Consensus::Unconstrained,
    }
}

fn adopt(arena: &Arena, group: &mut CanonicalGroup, outcome: &mut BackpropOutcome) {
    group.adopted_spin_parity = match consensus(arena, group, None) {
        Consensus::Adopted(sp) => {
            outcome.adopted += 1;
            Some(sp)
        }
        Consensus::Conflict => {
            warn!("no spin-parity consensus for level group at {}", group.anchor);
            outcome.no_consensus += 1;
            None
        }
        Consensus::Unconstrained => None,
    };
}

/// Derive adopted spin-parity per level group, then re-decide each deferred
/// multiple placement once against it.
pub fn propagate_spin_parity(
    arena: &Arena,
    groups: &mut GroupSet,
    deferred: &[ObsId],
    evaluator: &Evaluator<'_>,
) -> Result<BackpropOutcome, ReconError> {
    let mut outcome = BackpropOutcome::default();
    for group in groups.groups_mut() {
        adopt(arena, group, &mut outcome);
    }

    let deferred: BTreeSet<ObsId> = deferred.iter().copied().collect();
    for obs in deferred {
        let placements = groups.placements(obs);
        if placements.len() < 2 {
            continue;
        }

        let levels: Vec<(usize, Option<StrengthLevel>)> = placements
            .iter()
            .map(|&gi| {
                let group = &groups.groups()[gi];
                let adopted = match consensus(arena, group, Some(obs)) {
                    Consensus::Adopted(sp) => Some(sp),
                    _ => None,
                };
                let level = evaluator
                    .evaluate_against(obs, group, adopted.as_ref())
                    .map(|s| s.level);
                (gi, level)
            })
            .collect();

        let best = levels.iter().filter_map(|(_, l)| *l).max();
        let keep = match best {
            Some(best) => levels
                .iter()
                .find(|(_, l)| *l == Some(best))
                .map(|(gi, _)| *gi),
            None => placements.first().copied(),
        };

        for (gi, level) in levels {
            if Some(gi) == keep || (best.is_some() && level == best) {
                continue;
            }
            let firm = groups
                .get(gi)
                .and_then(|g| g.member(obs))
                .is_some_and(|m| m.is_firm());
            if firm {
                continue;
            }
            if groups.remove_member(arena, gi, obs).is_some() {
                debug!(
                    "dropped {} from level group {gi} after spin-parity refinement",
                    arena.obs(obs).energy_text
                );
                outcome.dropped_placements += 1;
                outcome.refined_groups.insert(gi);
            }
        }
        groups.settle_multiplicity(obs);
    }

    let mut scratch = BackpropOutcome::default();
    for &gi in &outcome.refined_groups {
        if let Some(group) = groups.groups_mut().get_mut(gi) {
            adopt(arena, group, &mut scratch);
        }
    }
    Ok(outcome)
}
