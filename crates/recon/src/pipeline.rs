use log::debug;

use crate::arena::{Arena, DatasetIdx, ObsId};
use crate::binner::coarse_bins;
use crate::config::{GroupingConfig, ResolverConfig};
use crate::error::ReconError;
use crate::group::{GroupSet, Member};
use crate::resolver::{ResolutionProof, Resolver};
use crate::strength::{Consistency, Evaluator, MatchParams};

#[derive(Debug, Clone)]
pub struct PassParams {
    pub matching: MatchParams,
    pub resolver: ResolverConfig,
}

impl PassParams {
    pub fn levels(config: &GroupingConfig) -> Self {
        Self {
            matching: MatchParams {
                tolerance: config.levels.tolerance,
                n_sigma: config.levels.n_sigma,
                rescue_factor: config.levels.rescue_factor,
                use_spin_parity: true,
            },
            resolver: config.resolver.clone(),
        }
    }

    /// Gammas carry no spin-parity and get no rescue window.
    pub fn gammas(config: &GroupingConfig) -> Self {
        Self {
            matching: MatchParams {
                tolerance: config.gammas.tolerance,
                n_sigma: config.gammas.n_sigma,
                rescue_factor: 1.0,
                use_spin_parity: false,
            },
            resolver: config.resolver.clone(),
        }
    }
}

/// Counters accumulated over one or more pipeline runs.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub bins: usize,
    pub components: usize,
    pub bisections: usize,
    pub cap_hits: usize,
    pub pruned: usize,
    pub deferred: Vec<ObsId>,
    pub proofs: Vec<ResolutionProof>,
}

impl PipelineStats {
    pub fn absorb(&mut self, other: PipelineStats) {
        self.bins += other.bins;
        self.components += other.components;
        self.bisections += other.bisections;
        self.cap_hits += other.cap_hits;
        self.pruned += other.pruned;
        self.deferred.extend(other.deferred);
        self.proofs.extend(other.proofs);
    }
}

/// One grouping pass over a set of observations. Levels and gammas run
/// the same pass with different parameters and consistency checks.
pub struct GroupingPipeline<'a> {
    arena: &'a Arena,
    params: &'a PassParams,
    evaluator: Evaluator<'a>,
    order: Vec<DatasetIdx>,
    scope: String,
}

impl<'a> GroupingPipeline<'a> {
    pub fn new(
        arena: &'a Arena,
        params: &'a PassParams,
        consistency: Consistency<'a>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            arena,
            params,
            evaluator: Evaluator::new(arena, params.matching, consistency),
            order: arena.processing_order(),
            scope: scope.into(),
        }
    }

    pub fn evaluator(&self) -> &Evaluator<'a> {
        &self.evaluator
    }

    pub fn run(&self, items: &[ObsId]) -> Result<(GroupSet, PipelineStats), ReconError> {
        let matching = &self.params.matching;
        let bins = coarse_bins(self.arena, items, matching.tolerance, matching.n_sigma);
        let mut stats = PipelineStats {
            bins: bins.len(),
            ..PipelineStats::default()
        };
        let mut all = Vec::new();

        for bin in &bins {
            let mut set = GroupSet::new();
            for &dataset in &self.order {
                let obs: Vec<ObsId> = bin
                    .items
                    .iter()
                    .copied()
                    .filter(|&id| self.arena.obs(id).dataset == dataset)
                    .collect();
                self.insert_dataset(&mut set, dataset, &obs, &mut stats)?;
            }

            let pruned = set.prune_non_firm(self.arena);
            stats.pruned += pruned.removed;
            if !pruned.released.is_empty() {
                debug!(
                    "{}: pruned {} groups, re-offering {} observations",
                    self.scope,
                    pruned.removed,
                    pruned.released.len()
                );
            }
            for &dataset in &self.order {
                let mut obs: Vec<ObsId> = pruned
                    .released
                    .iter()
                    .filter(|m| m.dataset == dataset)
                    .map(|m| m.obs)
                    .collect();
                obs.sort_by_key(|&id| bin.items.iter().position(|&b| b == id));
                self.insert_dataset(&mut set, dataset, &obs, &mut stats)?;
            }

            set.reorder_by_dataset_order(&self.order);
            all.extend(set.into_groups());
        }

        let mut set = GroupSet::from_groups(all);
        set.resort();
        set.check_invariants()?;
        Ok((set, stats))
    }

    /// Resolve one dataset against the current groups, then open singletons
    /// for whatever found no home.
    fn insert_dataset(
        &self,
        set: &mut GroupSet,
        dataset: DatasetIdx,
        obs: &[ObsId],
        stats: &mut PipelineStats,
    ) -> Result<(), ReconError> {
        if obs.is_empty() {
            return Ok(());
        }
        let resolver = Resolver::new(self.arena, &self.evaluator, &self.params.resolver, &self.scope);
        let resolution = resolver.resolve_dataset(set, dataset, obs);

        for placement in resolution.placements {
            let member = Member::new(self.arena, placement.obs).with_markers(placement.markers);
            set.add_member(self.arena, placement.group, member)?;
        }
        set.resort();
        for obs in resolution.unmatched {
            set.insert_unmatched(self.arena, Member::new(self.arena, obs));
        }

        stats.components += resolution.proofs.len();
        stats.bisections += resolution.proofs.iter().filter(|p| p.bisected).count();
        stats.cap_hits += resolution.proofs.iter().filter(|p| p.cap_hit).count();
        stats.deferred.extend(resolution.deferred);
        stats.proofs.extend(resolution.proofs);
        Ok(())
    }
}
