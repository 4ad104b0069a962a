use std::collections::BTreeMap;

use nuclink_core::{JpiRelation, SpinParity};
use serde::Serialize;

use crate::arena::{Arena, ObsId};
use crate::group::CanonicalGroup;

/// Cost added per strength rank below the top.
pub const RANK_PENALTY: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthLevel {
    CascadeRescue = 1,
    EnergyOnly = 2,
    SpinParity = 3,
    Cascade = 4,
    Exact = 5,
}

impl StrengthLevel {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

/// How well one observation fits one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchingStrength {
    pub level: StrengthLevel,
    /// Energy residual over the matching window.
    pub distance: f64,
    pub consistent_gammas: usize,
    pub spin_parity: JpiRelation,
    pub strategy: &'static str,
}

impl MatchingStrength {
    pub fn cost(&self) -> f64 {
        self.distance + RANK_PENALTY * f64::from(StrengthLevel::Exact.rank() - self.level.rank())
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// Everything the strategies look at for one (observation, group) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub residual: f64,
    pub combined_sigma: f64,
    /// `max(tolerance, n_sigma * combined_sigma)`
    pub window: f64,
    pub rescue_window: f64,
    pub spin_parity: JpiRelation,
    pub obs_gammas: usize,
    pub group_gammas: usize,
    pub consistent_gammas: usize,
}

impl Evidence {
    pub fn within_window(&self) -> bool {
        self.residual <= self.window
    }

    /// Both sides carry cascade data and none of it agrees.
    pub fn cascade_conflict(&self) -> bool {
        self.obs_gammas > 0 && self.group_gammas > 0 && self.consistent_gammas == 0
    }

    fn all_gammas_consistent(&self) -> bool {
        self.obs_gammas == 0 || self.group_gammas == 0 || self.consistent_gammas == self.obs_gammas
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

pub trait MatchStrategy {
    fn name(&self) -> &'static str;
    fn try_match(&self, evidence: &Evidence) -> Option<StrengthLevel>;
}

pub struct ExactStrategy;
pub struct CascadeStrategy;
pub struct SpinParityStrategy;
pub struct EnergyOnlyStrategy;
pub struct CascadeRescueStrategy;

impl MatchStrategy for ExactStrategy {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn try_match(&self, e: &Evidence) -> Option<StrengthLevel> {
        (e.residual <= e.combined_sigma
            && e.spin_parity == JpiRelation::Strict
            && e.all_gammas_consistent())
        .then_some(StrengthLevel::Exact)
    }
}

impl MatchStrategy for CascadeStrategy {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn try_match(&self, e: &Evidence) -> Option<StrengthLevel> {
        (e.within_window() && e.consistent_gammas >= 1).then_some(StrengthLevel::Cascade)
    }
}

impl MatchStrategy for SpinParityStrategy {
    fn name(&self) -> &'static str {
        "spin_parity"
    }

    fn try_match(&self, e: &Evidence) -> Option<StrengthLevel> {
        (e.within_window() && e.spin_parity.is_firm_overlap() && !e.cascade_conflict())
            .then_some(StrengthLevel::SpinParity)
    }
}

impl MatchStrategy for EnergyOnlyStrategy {
    fn name(&self) -> &'static str {
        "energy_only"
    }

    fn try_match(&self, e: &Evidence) -> Option<StrengthLevel> {
        e.within_window().then_some(StrengthLevel::EnergyOnly)
    }
}

impl MatchStrategy for CascadeRescueStrategy {
    fn name(&self) -> &'static str {
        "cascade_rescue"
    }

    fn try_match(&self, e: &Evidence) -> Option<StrengthLevel> {
        (e.residual <= e.rescue_window && e.consistent_gammas >= 2)
            .then_some(StrengthLevel::CascadeRescue)
    }
}

/// Strategies in priority order; first admissible wins.
pub fn default_strategies() -> Vec<Box<dyn MatchStrategy>> {
    vec![
        Box::new(ExactStrategy),
        Box::new(CascadeStrategy),
        Box::new(SpinParityStrategy),
        Box::new(EnergyOnlyStrategy),
        Box::new(CascadeRescueStrategy),
    ]
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParams {
    pub tolerance: f64,
    pub n_sigma: f64,
    pub rescue_factor: f64,
    pub use_spin_parity: bool,
}

/// Cross-check between an observation's decay data and a group's.
#[derive(Debug, Clone, Copy)]
pub enum Consistency<'a> {
    /// Levels: count gammas matching some gamma of a member.
    GammaCascade { tolerance: f64, n_sigma: f64 },
    /// Gammas: final levels must sit in a common level group.
    FinalLevel(&'a BTreeMap<ObsId, Vec<usize>>),
    None,
}

pub struct Evaluator<'a> {
    arena: &'a Arena,
    params: MatchParams,
    consistency: Consistency<'a>,
    strategies: Vec<Box<dyn MatchStrategy>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(arena: &'a Arena, params: MatchParams, consistency: Consistency<'a>) -> Self {
        Self {
            arena,
            params,
            consistency,
            strategies: default_strategies(),
        }
    }

    pub fn evaluate(&self, obs: ObsId, group: &CanonicalGroup) -> Option<MatchingStrength> {
        self.evaluate_against(obs, group, group.adopted_spin_parity.as_ref())
    }

    /// As `evaluate`, with an explicit adopted constraint in place of the
    /// group's own.
    pub fn evaluate_against(
        &self,
        obs: ObsId,
        group: &CanonicalGroup,
        adopted: Option<&SpinParity>,
    ) -> Option<MatchingStrength> {
        let evidence = self.evidence(obs, group, adopted)?;
        let (strategy, mut level) = self
            .strategies
            .iter()
            .find_map(|s| s.try_match(&evidence).map(|level| (s.name(), level)))?;
        if evidence.cascade_conflict() && level > StrengthLevel::EnergyOnly {
            level = StrengthLevel::EnergyOnly;
        }
        Some(MatchingStrength {
            level,
            distance: evidence.residual / evidence.window,
            consistent_gammas: evidence.consistent_gammas,
            spin_parity: evidence.spin_parity,
            strategy,
        })
    }

    /// `None` on a hard block: placeholder mismatch, energy beyond the
    /// widest window, or a firm spin-parity contradiction.
    pub fn evidence(
        &self,
        obs: ObsId,
        group: &CanonicalGroup,
        adopted: Option<&SpinParity>,
    ) -> Option<Evidence> {
        let o = self.arena.obs(obs);
        let energy = o.energy.as_ref()?;
        let residual = energy.residual(&group.anchor)?;
        let combined_sigma = energy.combined_sigma(&group.anchor);
        let window = self
            .params
            .tolerance
            .max(self.params.n_sigma * combined_sigma);
        let rescue_window = window * self.params.rescue_factor;
        if residual > rescue_window.max(window) {
            return None;
        }

        let others = || group.members.iter().filter(move |m| m.obs != obs);

        let mut spin_parity = JpiRelation::Unknown;
        if self.params.use_spin_parity {
            if let Some(sp) = &o.spin_parity {
                let firm = others()
                    .filter(|m| m.is_firm())
                    .filter_map(|m| self.arena.obs(m.obs).spin_parity.as_ref())
                    .chain(adopted);
                let mut worst: Option<JpiRelation> = None;
                for other in firm {
                    let relation = sp.relation(other);
                    if relation == JpiRelation::Contradiction {
                        return None;
                    }
                    worst = Some(worst.map_or(relation, |w| w.min(relation)));
                }
                spin_parity = worst.unwrap_or(JpiRelation::Unknown);
            }
        }

        let (obs_gammas, group_gammas, consistent_gammas) = match self.consistency {
            Consistency::GammaCascade { tolerance, n_sigma } => {
                let theirs: Vec<_> = others()
                    .flat_map(|m| self.arena.obs(m.obs).gammas.iter())
                    .filter_map(|&g| self.arena.obs(g).energy.as_ref())
                    .collect();
                let mine: Vec<_> = o
                    .gammas
                    .iter()
                    .filter_map(|&g| self.arena.obs(g).energy.as_ref())
                    .collect();
                let consistent = mine
                    .iter()
                    .filter(|g| theirs.iter().any(|h| g.comparable(h, tolerance, n_sigma)))
                    .count();
                (mine.len(), theirs.len(), consistent)
            }
            Consistency::FinalLevel(level_groups) => {
                let groups_of = |id: ObsId| {
                    self.arena
                        .obs(id)
                        .final_level()
                        .and_then(|level| level_groups.get(&level))
                };
                let mine = groups_of(obs);
                let theirs: Vec<&Vec<usize>> = others().filter_map(|m| groups_of(m.obs)).collect();
                let consistent = match mine {
                    Some(mine) => theirs
                        .iter()
                        .any(|t| t.iter().any(|g| mine.contains(g)))
                        as usize,
                    None => 0,
                };
                (mine.is_some() as usize, theirs.len(), consistent)
            }
            Consistency::None => (0, 0, 0),
        };

        Some(Evidence {
            residual,
            combined_sigma,
            window,
            rescue_window,
            spin_parity,
            obs_gammas,
            group_gammas,
            consistent_gammas,
        })
    }
}
