use serde::{Deserialize, Serialize};

use crate::averaging::{AveragedField, AveragingMode};
use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupingConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub levels: LevelMatchConfig,
    #[serde(default)]
    pub gammas: GammaMatchConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub averaging: AveragingConfig,
}

fn default_name() -> String {
    "grouping".into()
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            levels: LevelMatchConfig::default(),
            gammas: GammaMatchConfig::default(),
            resolver: ResolverConfig::default(),
            averaging: AveragingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Levels + Gammas
// ---------------------------------------------------------------------------

/// Energy matching for levels (keV).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelMatchConfig {
    #[serde(default = "default_level_tolerance")]
    pub tolerance: f64,
    /// Observations further apart than `tolerance` still compare when
    /// within this many combined standard deviations.
    #[serde(default = "default_n_sigma")]
    pub n_sigma: f64,
    /// Widening of the energy window granted to cascade-rescued matches.
    #[serde(default = "default_rescue_factor")]
    pub rescue_factor: f64,
}

fn default_level_tolerance() -> f64 {
    1.0
}

fn default_n_sigma() -> f64 {
    3.0
}

fn default_rescue_factor() -> f64 {
    2.0
}

impl Default for LevelMatchConfig {
    fn default() -> Self {
        Self {
            tolerance: default_level_tolerance(),
            n_sigma: default_n_sigma(),
            rescue_factor: default_rescue_factor(),
        }
    }
}

/// Energy matching for gamma transitions (keV).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GammaMatchConfig {
    #[serde(default = "default_gamma_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_n_sigma")]
    pub n_sigma: f64,
}

fn default_gamma_tolerance() -> f64 {
    0.5
}

impl Default for GammaMatchConfig {
    fn default() -> Self {
        Self {
            tolerance: default_gamma_tolerance(),
            n_sigma: default_n_sigma(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Place an unresolvable observation in both candidate groups.
    #[default]
    MultiplyAssign,
    /// Keep only the best placement, marked uncertain.
    BestUncertain,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// Observations + groups above which a component is bisected.
    #[serde(default = "default_split_limit")]
    pub split_limit: usize,
    /// Search node budget per component.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    /// Normalized distance difference below which two placements tie.
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,
    #[serde(default)]
    pub ambiguity_policy: AmbiguityPolicy,
}

fn default_split_limit() -> usize {
    24
}

fn default_max_nodes() -> usize {
    200_000
}

fn default_ambiguity_margin() -> f64 {
    0.1
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            split_limit: default_split_limit(),
            max_nodes: default_max_nodes(),
            ambiguity_margin: default_ambiguity_margin(),
            ambiguity_policy: AmbiguityPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Averaging hand-off
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AveragingConfig {
    #[serde(default = "default_true")]
    pub exclude_multiply_assigned: bool,
    #[serde(default)]
    pub min_weight: f64,
    #[serde(default)]
    pub mode: AveragingMode,
    #[serde(default = "default_fields")]
    pub fields: Vec<AveragedField>,
}

fn default_true() -> bool {
    true
}

fn default_fields() -> Vec<AveragedField> {
    vec![AveragedField::Energy]
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            exclude_multiply_assigned: true,
            min_weight: 0.0,
            mode: AveragingMode::default(),
            fields: default_fields(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl GroupingConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: GroupingConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ReconError::ConfigValidation(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };

        positive("levels.tolerance", self.levels.tolerance)?;
        positive("levels.n_sigma", self.levels.n_sigma)?;
        positive("gammas.tolerance", self.gammas.tolerance)?;
        positive("gammas.n_sigma", self.gammas.n_sigma)?;

        if !(self.levels.rescue_factor >= 1.0) {
            return Err(ReconError::ConfigValidation(format!(
                "levels.rescue_factor must be at least 1, got {}",
                self.levels.rescue_factor
            )));
        }

        if self.resolver.split_limit < 2 {
            return Err(ReconError::ConfigValidation(format!(
                "resolver.split_limit must be at least 2, got {}",
                self.resolver.split_limit
            )));
        }

        if self.resolver.max_nodes == 0 {
            return Err(ReconError::ConfigValidation(
                "resolver.max_nodes must be at least 1".into(),
            ));
        }

        let margin = self.resolver.ambiguity_margin;
        if !(0.0..=1.0).contains(&margin) {
            return Err(ReconError::ConfigValidation(format!(
                "resolver.ambiguity_margin must be within [0, 1], got {margin}"
            )));
        }

        if !(self.averaging.min_weight >= 0.0) {
            return Err(ReconError::ConfigValidation(format!(
                "averaging.min_weight must not be negative, got {}",
                self.averaging.min_weight
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
name = "Ni-60 adopted levels"

[levels]
tolerance = 1.5
n_sigma = 2.5
rescue_factor = 3.0

[gammas]
tolerance = 0.3

[resolver]
split_limit = 12
max_nodes = 5000
ambiguity_margin = 0.05
ambiguity_policy = "best_uncertain"

[averaging]
exclude_multiply_assigned = false
min_weight = 0.02
mode = "unweighted"
fields = ["energy", "intensity", "half_life"]
"#;

    #[test]
    fn parse_full() {
        let config = GroupingConfig::from_toml(FULL).unwrap();
        assert_eq!(config.name, "Ni-60 adopted levels");
        assert_eq!(config.levels.tolerance, 1.5);
        assert_eq!(config.levels.n_sigma, 2.5);
        assert_eq!(config.gammas.tolerance, 0.3);
        assert_eq!(config.gammas.n_sigma, 3.0);
        assert_eq!(config.resolver.split_limit, 12);
        assert_eq!(config.resolver.ambiguity_policy, AmbiguityPolicy::BestUncertain);
        assert!(!config.averaging.exclude_multiply_assigned);
        assert_eq!(config.averaging.mode, AveragingMode::Unweighted);
        assert_eq!(config.averaging.fields.len(), 3);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = GroupingConfig::from_toml("").unwrap();
        assert_eq!(config.name, "grouping");
        assert_eq!(config.levels.tolerance, 1.0);
        assert_eq!(config.gammas.tolerance, 0.5);
        assert_eq!(config.resolver.split_limit, 24);
        assert_eq!(config.resolver.ambiguity_policy, AmbiguityPolicy::MultiplyAssign);
        assert!(config.averaging.exclude_multiply_assigned);
        assert_eq!(config.averaging.fields, vec![AveragedField::Energy]);
    }

    #[test]
    fn reject_typo_in_policy() {
        let input = r#"
[resolver]
ambiguity_policy = "multiply_asign"
"#;
        assert!(GroupingConfig::from_toml(input).is_err());
    }

    #[test]
    fn reject_unknown_key() {
        let input = r#"
[levels]
tolerence = 2.0
"#;
        let err = GroupingConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn reject_non_positive_tolerance() {
        let input = r#"
[gammas]
tolerance = 0.0
"#;
        let err = GroupingConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("gammas.tolerance"));
    }

    #[test]
    fn reject_small_split_limit() {
        let input = r#"
[resolver]
split_limit = 1
"#;
        let err = GroupingConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("split_limit"));
    }

    #[test]
    fn reject_margin_out_of_range() {
        let input = r#"
[resolver]
ambiguity_margin = 1.5
"#;
        let err = GroupingConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("ambiguity_margin"));
    }
}
