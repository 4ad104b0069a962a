use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use nuclink_core::JpiRelation;
use serde::Serialize;

use crate::arena::{Arena, DatasetIdx, ObsId};
use crate::config::{AmbiguityPolicy, ResolverConfig};
use crate::group::{CanonicalGroup, GroupSet, Markers};
use crate::strength::{Evaluator, MatchingStrength};

/// Why a component's best assignment is not unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityReason {
    TiedSolutions,
    SearchCapHit,
    TiedAndCapHit,
}

fn ambiguity_reason(num_equivalent: usize, cap_hit: bool) -> Option<AmbiguityReason> {
    let tied = num_equivalent > 1;
    match (tied, cap_hit) {
        (true, true) => Some(AmbiguityReason::TiedAndCapHit),
        (true, false) => Some(AmbiguityReason::TiedSolutions),
        (false, true) => Some(AmbiguityReason::SearchCapHit),
        (false, false) => None,
    }
}

/// Audit trail for one connected component of one dataset pass.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionProof {
    pub scope: String,
    pub dataset: String,
    pub observations: Vec<String>,
    pub candidate_groups: usize,
    pub nodes_visited: u64,
    pub nodes_pruned: u64,
    pub cap_hit: bool,
    pub bisected: bool,
    pub num_equivalent_solutions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguity_reason: Option<AmbiguityReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tie_breaks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Placement {
    pub obs: ObsId,
    pub group: usize,
    pub markers: Markers,
    pub strength: MatchingStrength,
}

#[derive(Debug, Default)]
pub struct DatasetResolution {
    pub placements: Vec<Placement>,
    pub unmatched: Vec<ObsId>,
    /// Ambiguities left open by an inconclusive spin-parity comparison.
    pub deferred: Vec<ObsId>,
    pub proofs: Vec<ResolutionProof>,
}

// ---------------------------------------------------------------------------
// Candidate graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Edge {
    group: usize,
    strength: MatchingStrength,
    /// Cost in micro-units so ties compare exactly.
    cost: i64,
}

fn quantize(cost: f64) -> i64 {
    (cost * 1e6).round() as i64
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Lower is better. Ties on everything but `groups` are equivalent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct AssignmentScore {
    unmatched: usize,
    cost: i64,
    neg_strength: i64,
    unanchored: usize,
    groups: Vec<usize>,
}

impl AssignmentScore {
    fn equivalent(&self, other: &Self) -> bool {
        self.unmatched == other.unmatched
            && self.cost == other.cost
            && self.neg_strength == other.neg_strength
            && self.unanchored == other.unanchored
    }
}

#[derive(Debug, Clone, Copy)]
struct Partial {
    unmatched: usize,
    cost: i64,
    last: Option<usize>,
}

impl Partial {
    fn admits(&self, group: usize) -> bool {
        self.last.map_or(true, |l| group > l)
    }
}

struct Frame {
    pos: usize,
    partial: Partial,
    next: usize,
}

#[derive(Debug)]
struct SearchStats {
    nodes_visited: u64,
    nodes_pruned: u64,
    cap_hit: bool,
    bisected: bool,
    num_equivalent: usize,
}

impl Default for SearchStats {
    fn default() -> Self {
        Self {
            nodes_visited: 0,
            nodes_pruned: 0,
            cap_hit: false,
            bisected: false,
            num_equivalent: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver<'a> {
    arena: &'a Arena,
    evaluator: &'a Evaluator<'a>,
    config: &'a ResolverConfig,
    scope: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(
        arena: &'a Arena,
        evaluator: &'a Evaluator<'a>,
        config: &'a ResolverConfig,
        scope: &'a str,
    ) -> Self {
        Self {
            arena,
            evaluator,
            config,
            scope,
        }
    }

    /// Place one dataset's observations (energy ordered) into `groups`.
    /// Groups already holding a member of `dataset` are never candidates.
    pub fn resolve_dataset(
        &self,
        groups: &GroupSet,
        dataset: DatasetIdx,
        obs: &[ObsId],
    ) -> DatasetResolution {
        let n = obs.len();
        let has_reference: Vec<bool> = groups.groups().iter().map(|g| g.reference.is_some()).collect();

        let edges: Vec<Vec<Edge>> = obs
            .iter()
            .map(|&o| {
                let mut list: Vec<Edge> = groups
                    .groups()
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| !g.holds_dataset(dataset))
                    .filter_map(|(gi, g)| {
                        self.evaluator.evaluate(o, g).map(|strength| Edge {
                            group: gi,
                            cost: quantize(strength.cost()),
                            strength,
                        })
                    })
                    .collect();
                list.sort_by(|a, b| a.cost.cmp(&b.cost).then(a.group.cmp(&b.group)));
                list
            })
            .collect();

        let mut uf = UnionFind::new(n + groups.len());
        for (pos, list) in edges.iter().enumerate() {
            for e in list {
                uf.union(pos, n + e.group);
            }
        }
        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut resolution = DatasetResolution::default();
        for pos in 0..n {
            if edges[pos].is_empty() {
                continue;
            }
            components.entry(uf.find(pos)).or_default().push(pos);
        }

        let dataset_id = &self.arena.dataset(dataset).id;
        let mut assignment: Vec<Option<usize>> = vec![None; n];
        let mut component_of: Vec<Option<usize>> = vec![None; n];

        // Components iterate by lowest position (the union-find root), so
        // every position below `members[0]` is already assigned.
        for members in components.values() {
            let mut stats = SearchStats::default();
            let floor = assignment[..members[0]].iter().flatten().copied().max();
            let chosen = self.solve(&edges, members, floor, &has_reference, &mut stats);
            for (&pos, group) in members.iter().zip(chosen) {
                assignment[pos] = group;
                component_of[pos] = Some(resolution.proofs.len());
            }

            let candidate_groups: BTreeSet<usize> = members
                .iter()
                .flat_map(|&p| edges[p].iter().map(|e| e.group))
                .collect();
            if stats.cap_hit {
                warn!(
                    "{}: node cap hit resolving {} observations of '{dataset_id}'",
                    self.scope,
                    members.len()
                );
            }
            debug!(
                "{}: '{dataset_id}' component of {} obs / {} groups, {} nodes",
                self.scope,
                members.len(),
                candidate_groups.len(),
                stats.nodes_visited
            );
            resolution.proofs.push(ResolutionProof {
                scope: self.scope.to_string(),
                dataset: dataset_id.clone(),
                observations: members
                    .iter()
                    .map(|&p| self.arena.obs(obs[p]).energy_text.clone())
                    .collect(),
                candidate_groups: candidate_groups.len(),
                nodes_visited: stats.nodes_visited,
                nodes_pruned: stats.nodes_pruned,
                cap_hit: stats.cap_hit,
                bisected: stats.bisected,
                num_equivalent_solutions: stats.num_equivalent,
                ambiguity_reason: ambiguity_reason(stats.num_equivalent, stats.cap_hit),
                tie_breaks: Vec::new(),
            });
        }

        uncross(&mut assignment, obs, self.scope, dataset_id);
        self.settle_ambiguities(groups, obs, &edges, &mut assignment, &component_of, &mut resolution);

        for (pos, &o) in obs.iter().enumerate() {
            if assignment[pos].is_none() {
                resolution.unmatched.push(o);
            }
        }
        resolution
    }

    /// Best monotone assignment for `members` (positions into `edges`),
    /// restricted to groups above `floor`.
    fn solve(
        &self,
        edges: &[Vec<Edge>],
        members: &[usize],
        floor: Option<usize>,
        has_reference: &[bool],
        stats: &mut SearchStats,
    ) -> Vec<Option<usize>> {
        let groups: BTreeSet<usize> = members
            .iter()
            .flat_map(|&p| edges[p].iter().map(|e| e.group))
            .filter(|&g| floor.map_or(true, |f| g > f))
            .collect();

        if members.len() >= 2 && members.len() + groups.len() > self.config.split_limit {
            stats.bisected = true;
            let mid = members.len() / 2;
            let mut left = self.solve(edges, &members[..mid], floor, has_reference, stats);
            let floor = left.iter().flatten().copied().max().or(floor);
            let right = self.solve(edges, &members[mid..], floor, has_reference, stats);
            left.extend(right);
            return left;
        }

        self.branch_and_bound(edges, members, floor, has_reference, stats)
    }

    fn branch_and_bound(
        &self,
        edges: &[Vec<Edge>],
        members: &[usize],
        floor: Option<usize>,
        has_reference: &[bool],
        stats: &mut SearchStats,
    ) -> Vec<Option<usize>> {
        let n = members.len();
        let options: Vec<Vec<&Edge>> = members
            .iter()
            .map(|&p| {
                edges[p]
                    .iter()
                    .filter(|e| floor.map_or(true, |f| e.group > f))
                    .collect()
            })
            .collect();

        let mut suffix_min = vec![0i64; n + 1];
        for k in (0..n).rev() {
            let cheapest = options[k].iter().map(|e| e.cost).min().unwrap_or(0);
            suffix_min[k] = suffix_min[k + 1] + cheapest;
        }

        let score = |choice: &[Option<usize>]| {
            let mut s = AssignmentScore {
                unmatched: 0,
                cost: 0,
                neg_strength: 0,
                unanchored: 0,
                groups: Vec::with_capacity(n),
            };
            for (k, c) in choice.iter().enumerate() {
                match c {
                    Some(i) => {
                        let e = options[k][*i];
                        s.cost += e.cost;
                        s.neg_strength -= i64::from(e.strength.level.rank());
                        s.unanchored += usize::from(!has_reference[e.group]);
                        s.groups.push(e.group);
                    }
                    None => {
                        s.unmatched += 1;
                        s.groups.push(usize::MAX);
                    }
                }
            }
            s
        };

        // Greedy seed: cheapest admissible edge, in order.
        let mut seed: Vec<Option<usize>> = vec![None; n];
        let mut last = floor;
        for k in 0..n {
            if let Some(i) = options[k].iter().position(|e| last.map_or(true, |l| e.group > l)) {
                seed[k] = Some(i);
                last = Some(options[k][i].group);
            }
        }
        let mut best_choice = seed.clone();
        let mut best = score(&seed);
        let mut equivalent = 1usize;

        let mut choice: Vec<Option<usize>> = vec![None; n];
        let root = Partial {
            unmatched: 0,
            cost: 0,
            last: floor,
        };
        let mut stack = vec![Frame {
            pos: 0,
            partial: root,
            next: 0,
        }];
        let mut visited: u64 = 0;

        while let Some(frame) = stack.last_mut() {
            if frame.pos == n {
                stack.pop();
                if choice == seed {
                    continue;
                }
                let s = score(&choice);
                if s.equivalent(&best) {
                    equivalent += 1;
                } else if s < best {
                    equivalent = 1;
                }
                if s < best {
                    best = s;
                    best_choice = choice.clone();
                }
                continue;
            }
            if visited >= self.config.max_nodes as u64 {
                stats.cap_hit = true;
                break;
            }

            let pos = frame.pos;
            let opts = &options[pos];
            let mut pick: Option<Option<usize>> = None;
            while frame.next <= opts.len() {
                let i = frame.next;
                frame.next += 1;
                if i == opts.len() {
                    pick = Some(None);
                    break;
                }
                if frame.partial.admits(opts[i].group) {
                    pick = Some(Some(i));
                    break;
                }
            }
            let Some(pick) = pick else {
                stack.pop();
                continue;
            };

            visited += 1;
            let mut child = frame.partial;
            match pick {
                Some(i) => {
                    child.cost += opts[i].cost;
                    child.last = Some(opts[i].group);
                }
                None => child.unmatched += 1,
            }
            choice[pos] = pick;

            let bound = (child.unmatched, child.cost + suffix_min[pos + 1]);
            if bound > (best.unmatched, best.cost) {
                stats.nodes_pruned += 1;
                continue;
            }
            stack.push(Frame {
                pos: pos + 1,
                partial: child,
                next: 0,
            });
        }

        stats.nodes_visited += visited;
        stats.num_equivalent = stats.num_equivalent.saturating_mul(equivalent);
        best_choice
            .iter()
            .enumerate()
            .map(|(k, c)| c.map(|i| options[k][i].group))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Post-assignment ambiguity check
    // -----------------------------------------------------------------------

    fn settle_ambiguities(
        &self,
        groups: &GroupSet,
        obs: &[ObsId],
        edges: &[Vec<Edge>],
        assignment: &mut [Option<usize>],
        component_of: &[Option<usize>],
        resolution: &mut DatasetResolution,
    ) {
        let mut used: BTreeSet<usize> = assignment.iter().flatten().copied().collect();
        let margin = self.config.ambiguity_margin;

        for pos in 0..obs.len() {
            let Some(group) = assignment[pos] else {
                continue;
            };
            let Some(chosen) = edges[pos].iter().find(|e| e.group == group) else {
                continue;
            };
            let alternative = edges[pos]
                .iter()
                .filter(|e| e.group != group)
                .filter(|e| e.strength.level == chosen.strength.level)
                .filter(|e| (e.strength.distance - chosen.strength.distance).abs() <= margin)
                .min_by(|a, b| a.cost.cmp(&b.cost).then(a.group.cmp(&b.group)));

            let mut markers = Markers::default();
            let mut primary = chosen;
            let mut note = None;

            if let Some(alt) = alternative {
                let free = !used.contains(&alt.group);
                let monotone = {
                    let before = assignment[..pos].iter().flatten().max();
                    let after = assignment[pos + 1..].iter().flatten().min();
                    before.map_or(true, |&b| alt.group > b) && after.map_or(true, |&a| alt.group < a)
                };
                match self.tie_break(groups, obs[pos], chosen, alt) {
                    TieBreak::Chosen(reason) => note = Some(reason),
                    TieBreak::Alternative(reason) if free && monotone => {
                        used.remove(&group);
                        used.insert(alt.group);
                        assignment[pos] = Some(alt.group);
                        primary = alt;
                        note = Some(reason);
                    }
                    TieBreak::Alternative(_) => note = Some("unique_fit"),
                    TieBreak::Unresolved if !free => note = Some("unique_fit"),
                    TieBreak::Unresolved => {
                        match self.config.ambiguity_policy {
                            AmbiguityPolicy::MultiplyAssign => {
                                markers.multiply_assigned = true;
                                used.insert(alt.group);
                                resolution.placements.push(Placement {
                                    obs: obs[pos],
                                    group: alt.group,
                                    markers,
                                    strength: alt.strength.clone(),
                                });
                                note = Some("multiply_assigned");
                            }
                            AmbiguityPolicy::BestUncertain => {
                                markers.uncertain_placement = true;
                                note = Some("uncertain");
                            }
                        }
                        let o = self.arena.obs(obs[pos]);
                        let inconclusive = chosen.strength.spin_parity == JpiRelation::Unknown
                            || alt.strength.spin_parity == JpiRelation::Unknown;
                        if o.spin_parity.is_some() && inconclusive {
                            resolution.deferred.push(obs[pos]);
                        }
                    }
                }
            }

            if let (Some(reason), Some(c)) = (note, component_of[pos]) {
                resolution.proofs[c]
                    .tie_breaks
                    .push(format!("{}: {reason}", self.arena.obs(obs[pos]).energy_text));
            }
            resolution.placements.push(Placement {
                obs: obs[pos],
                group: primary.group,
                markers,
                strength: primary.strength.clone(),
            });
        }
    }

    /// Cascade evidence first, then tighter average residual.
    fn tie_break(&self, groups: &GroupSet, obs: ObsId, chosen: &Edge, alt: &Edge) -> TieBreak {
        match chosen
            .strength
            .consistent_gammas
            .cmp(&alt.strength.consistent_gammas)
        {
            Ordering::Greater => return TieBreak::Chosen("cascade"),
            Ordering::Less => return TieBreak::Alternative("cascade"),
            Ordering::Equal => {}
        }

        let residual = |g: usize| groups.get(g).and_then(|group| self.average_residual(obs, group));
        let (Some(a), Some(b)) = (residual(chosen.group), residual(alt.group)) else {
            return TieBreak::Unresolved;
        };
        if (a - b).abs() <= 1e-9 {
            TieBreak::Unresolved
        } else if a < b {
            TieBreak::Chosen("average_residual")
        } else {
            TieBreak::Alternative("average_residual")
        }
    }

    /// Mean energy difference between `obs` and the group's other members.
    fn average_residual(&self, obs: ObsId, group: &CanonicalGroup) -> Option<f64> {
        let energy = self.arena.obs(obs).energy.as_ref()?;
        let residuals: Vec<f64> = group
            .members
            .iter()
            .filter(|m| m.obs != obs)
            .filter_map(|m| self.arena.obs(m.obs).energy.as_ref())
            .filter_map(|q| energy.residual(q))
            .collect();
        if residuals.is_empty() {
            return None;
        }
        Some(residuals.iter().sum::<f64>() / residuals.len() as f64)
    }
}

/// Interleaved components can still cross: keep the earlier placement and
/// leave any later one at or below it unmatched.
fn uncross(assignment: &mut [Option<usize>], obs: &[ObsId], scope: &str, dataset_id: &str) {
    let mut last: Option<usize> = None;
    for (pos, slot) in assignment.iter_mut().enumerate() {
        let Some(group) = *slot else {
            continue;
        };
        if last.is_some_and(|l| group <= l) {
            debug!("{scope}: '{dataset_id}' obs {} would cross group {group}, left unmatched", obs[pos].0);
            *slot = None;
        } else {
            last = Some(group);
        }
    }
}

enum TieBreak {
    Chosen(&'static str),
    Alternative(&'static str),
    Unresolved,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Member;
    use crate::strength::{Consistency, MatchParams};
    use nuclink_core::{DatasetRecord, GammaRecord, LevelRecord, ObservationInput};

    fn build(datasets: Vec<Vec<LevelRecord>>) -> Arena {
        let datasets = datasets
            .into_iter()
            .enumerate()
            .map(|(i, levels)| DatasetRecord::new(&format!("DS{i}"), &format!("{i}"), levels))
            .collect();
        Arena::build(&ObservationInput {
            nuclide: None,
            datasets,
        })
        .unwrap()
    }

    fn levels(energies: &[&str]) -> Vec<LevelRecord> {
        energies.iter().map(|e| LevelRecord::new(e, "")).collect()
    }

    fn evaluator(arena: &Arena, tolerance: f64) -> Evaluator<'_> {
        Evaluator::new(
            arena,
            MatchParams {
                tolerance,
                n_sigma: 3.0,
                rescue_factor: 2.0,
                use_spin_parity: true,
            },
            Consistency::GammaCascade {
                tolerance: 0.5,
                n_sigma: 3.0,
            },
        )
    }

    fn seeded(arena: &Arena) -> GroupSet {
        let mut set = GroupSet::new();
        for &id in &arena.dataset(DatasetIdx(0)).levels {
            set.insert_unmatched(arena, Member::new(arena, id));
        }
        set
    }

    fn resolve(arena: &Arena, set: &GroupSet, tolerance: f64, config: &ResolverConfig) -> DatasetResolution {
        let eval = evaluator(arena, tolerance);
        let resolver = Resolver::new(arena, &eval, config, "levels");
        resolver.resolve_dataset(set, DatasetIdx(1), &arena.dataset(DatasetIdx(1)).levels)
    }

    fn primary_groups(resolution: &DatasetResolution) -> Vec<(ObsId, usize)> {
        let mut out: Vec<(ObsId, usize)> = resolution
            .placements
            .iter()
            .map(|p| (p.obs, p.group))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn one_to_one_by_energy() {
        let arena = build(vec![levels(&["100.0", "200.0"]), levels(&["100.2", "199.9"])]);
        let set = seeded(&arena);
        let res = resolve(&arena, &set, 1.0, &ResolverConfig::default());
        assert_eq!(primary_groups(&res), vec![(ObsId(2), 0), (ObsId(3), 1)]);
        assert!(res.unmatched.is_empty());
        assert_eq!(res.proofs.len(), 2);
        assert!(res.placements.iter().all(|p| p.markers.is_clear()));
    }

    #[test]
    fn far_observation_stays_unmatched() {
        let arena = build(vec![levels(&["500.0"]), levels(&["520.0"])]);
        let set = seeded(&arena);
        let res = resolve(&arena, &set, 10.0, &ResolverConfig::default());
        assert!(res.placements.is_empty());
        assert_eq!(res.unmatched, vec![ObsId(1)]);
        assert!(res.proofs.is_empty());
    }

    #[test]
    fn group_holding_the_dataset_is_excluded() {
        let arena = build(vec![levels(&["100.0"]), levels(&["100.1", "100.3"])]);
        let mut set = seeded(&arena);
        set.add_member(&arena, 0, Member::new(&arena, ObsId(1))).unwrap();
        let eval = evaluator(&arena, 1.0);
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&arena, &eval, &config, "levels");
        let res = resolver.resolve_dataset(&set, DatasetIdx(1), &[ObsId(2)]);
        assert!(res.placements.is_empty());
        assert_eq!(res.unmatched, vec![ObsId(2)]);
    }

    #[test]
    fn gamma_cascade_beats_closer_energy() {
        let arena = build(vec![
            vec![
                LevelRecord::new("1000.0", "")
                    .with_gamma(GammaRecord::new("300.0", ""))
                    .with_gamma(GammaRecord::new("450.0", "")),
                LevelRecord::new("1004.0", ""),
            ],
            vec![LevelRecord::new("1003.5", "")
                .with_gamma(GammaRecord::new("300.1", ""))
                .with_gamma(GammaRecord::new("450.2", ""))],
        ]);
        let set = seeded(&arena);
        let res = resolve(&arena, &set, 5.0, &ResolverConfig::default());
        assert_eq!(res.placements.len(), 1);
        assert_eq!(res.placements[0].group, 0);
        assert_eq!(res.placements[0].strength.strategy, "cascade");
    }

    #[test]
    fn unbroken_tie_is_multiply_assigned_and_deferred() {
        let arena = build(vec![
            levels(&["100.0", "101.0"]),
            vec![LevelRecord::new("100.5", "").with_spin_parity("2+")],
        ]);
        let set = seeded(&arena);
        let res = resolve(&arena, &set, 2.0, &ResolverConfig::default());
        assert_eq!(primary_groups(&res), vec![(ObsId(2), 0), (ObsId(2), 1)]);
        assert!(res.placements.iter().all(|p| p.markers.multiply_assigned));
        assert_eq!(res.deferred, vec![ObsId(2)]);
        assert_eq!(res.proofs[0].num_equivalent_solutions, 2);
        assert_eq!(res.proofs[0].ambiguity_reason, Some(AmbiguityReason::TiedSolutions));
        assert_eq!(res.proofs[0].tie_breaks, vec!["100.5: multiply_assigned".to_string()]);
    }

    #[test]
    fn best_uncertain_policy_keeps_one_placement() {
        let arena = build(vec![levels(&["100.0", "101.0"]), levels(&["100.5"])]);
        let set = seeded(&arena);
        let config = ResolverConfig {
            ambiguity_policy: AmbiguityPolicy::BestUncertain,
            ..ResolverConfig::default()
        };
        let res = resolve(&arena, &set, 2.0, &config);
        assert_eq!(res.placements.len(), 1);
        assert!(res.placements[0].markers.uncertain_placement);
        assert!(res.deferred.is_empty());
    }

    #[test]
    fn tie_resolved_by_average_residual() {
        // Group at 100.0 also holds 100.4 from a third dataset; group at
        // 101.0 holds 101.9. Both anchors sit 0.5 away.
        let arena = build(vec![
            levels(&["100.0", "101.0"]),
            levels(&["100.5"]),
            levels(&["100.4", "101.9"]),
        ]);
        let mut set = seeded(&arena);
        set.add_member(&arena, 0, Member::new(&arena, ObsId(3))).unwrap();
        set.add_member(&arena, 1, Member::new(&arena, ObsId(4))).unwrap();
        let res = resolve(&arena, &set, 2.0, &ResolverConfig::default());
        assert_eq!(primary_groups(&res), vec![(ObsId(2), 0)]);
        assert!(res.placements[0].markers.is_clear());
        assert_eq!(res.proofs[0].tie_breaks, vec!["100.5: average_residual".to_string()]);
    }

    fn with_jp(levels: &[(&str, &str)]) -> Vec<LevelRecord> {
        levels
            .iter()
            .map(|(e, jp)| LevelRecord::new(e, "").with_spin_parity(jp))
            .collect()
    }

    #[test]
    fn separate_components_do_not_cross() {
        // Spin-parity splits the candidates into two components whose
        // individual optima would swap the energy order.
        let arena = build(vec![
            with_jp(&[("99.9", "0-"), ("100.3", "2+")]),
            with_jp(&[("100.0", "2+"), ("100.2", "0-")]),
        ]);
        let set = seeded(&arena);
        let res = resolve(&arena, &set, 1.0, &ResolverConfig::default());
        assert_eq!(res.proofs.len(), 2);
        assert_eq!(primary_groups(&res), vec![(ObsId(2), 1)]);
        assert_eq!(res.unmatched, vec![ObsId(3)]);
    }

    #[test]
    fn interleaved_components_leave_the_crossing_member_unmatched() {
        let arena = build(vec![
            with_jp(&[("99.9", "2+"), ("100.3", "0-")]),
            with_jp(&[("99.0", "2+"), ("100.1", "0-"), ("100.2", "2+")]),
        ]);
        let set = seeded(&arena);
        let res = resolve(&arena, &set, 1.0, &ResolverConfig::default());
        assert_eq!(primary_groups(&res), vec![(ObsId(3), 1)]);
        assert_eq!(res.unmatched, vec![ObsId(2), ObsId(4)]);
    }

    #[test]
    fn uncross_keeps_the_earliest_placement() {
        let obs: Vec<ObsId> = (0..4).map(ObsId).collect();
        let mut assignment = vec![Some(2), Some(1), None, Some(3)];
        uncross(&mut assignment, &obs, "levels", "DS1");
        assert_eq!(assignment, vec![Some(2), None, None, Some(3)]);
    }

    fn ladder(offset: f64) -> Vec<LevelRecord> {
        (0..10)
            .map(|i| LevelRecord::new(&format!("{:.1}", 100.0 + 10.0 * i as f64 + offset), ""))
            .collect()
    }

    #[test]
    fn large_component_is_bisected() {
        let arena = build(vec![ladder(0.0), ladder(0.2)]);
        let set = seeded(&arena);
        let config = ResolverConfig {
            split_limit: 4,
            ..ResolverConfig::default()
        };
        let res = resolve(&arena, &set, 15.0, &config);
        assert_eq!(res.proofs.len(), 1);
        assert!(res.proofs[0].bisected);
        let got = primary_groups(&res);
        let expected: Vec<(ObsId, usize)> = (0..10).map(|i| (ObsId(10 + i as u32), i)).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn node_cap_still_yields_valid_assignment() {
        let arena = build(vec![ladder(0.0), ladder(0.2)]);
        let set = seeded(&arena);
        let config = ResolverConfig {
            max_nodes: 1,
            split_limit: 100,
            ..ResolverConfig::default()
        };
        let res = resolve(&arena, &set, 15.0, &config);
        assert!(res.proofs[0].cap_hit);
        assert_eq!(res.proofs[0].ambiguity_reason, Some(AmbiguityReason::SearchCapHit));
        assert_eq!(res.placements.len(), 10);
        let groups: BTreeSet<usize> = res.placements.iter().map(|p| p.group).collect();
        assert_eq!(groups.len(), 10);
    }

    #[test]
    fn ambiguity_reason_table() {
        assert_eq!(ambiguity_reason(1, false), None);
        assert_eq!(ambiguity_reason(3, false), Some(AmbiguityReason::TiedSolutions));
        assert_eq!(ambiguity_reason(1, true), Some(AmbiguityReason::SearchCapHit));
        assert_eq!(ambiguity_reason(2, true), Some(AmbiguityReason::TiedAndCapHit));
    }
}
