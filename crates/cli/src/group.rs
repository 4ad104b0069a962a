//! `nuclink group` and `nuclink validate`.

use std::path::{Path, PathBuf};

use log::info;
use nuclink_recon::{GroupingConfig, GroupingResult, ReconError};

use crate::exit_codes::{recon_exit_code, EXIT_GROUP_AMBIGUOUS, EXIT_GROUP_IO, EXIT_USAGE};
use crate::CliError;

fn group_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn engine_err(err: ReconError) -> CliError {
    let code = recon_exit_code(&err);
    let hint = match &err {
        ReconError::MultipleReference { .. } => {
            Some("flag at most one dataset with \"reference\": true".to_string())
        }
        ReconError::ConfigParse(_) => Some("check section and key names; unknown keys are rejected".to_string()),
        _ => None,
    };
    CliError { code, message: err.to_string(), hint }
}

fn read_text(path: &Path, what: &str) -> Result<String, CliError> {
    std::fs::read_to_string(path)
        .map_err(|e| group_err(EXIT_USAGE, format!("cannot read {what} {}: {e}", path.display())))
}

fn load_config(path: Option<&Path>) -> Result<GroupingConfig, CliError> {
    match path {
        Some(path) => GroupingConfig::from_toml(&read_text(path, "config")?).map_err(engine_err),
        None => Ok(GroupingConfig::default()),
    }
}

pub fn cmd_group(
    input_path: PathBuf,
    config_path: Option<PathBuf>,
    json_output: bool,
    output_file: Option<PathBuf>,
    strict: bool,
) -> Result<(), CliError> {
    let config = load_config(config_path.as_deref())?;
    let input = nuclink_recon::load_input_json(&read_text(&input_path, "input")?).map_err(engine_err)?;
    info!(
        "grouping {} dataset(s) from {} with config '{}'",
        input.datasets.len(),
        input_path.display(),
        config.name
    );

    let result = nuclink_recon::run(&config, &input).map_err(engine_err)?;

    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| group_err(EXIT_GROUP_IO, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| group_err(EXIT_GROUP_IO, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    print_summary(&result);

    let s = &result.summary;
    if strict && (s.multiply_assigned > 0 || s.no_consensus > 0) {
        return Err(group_err(
            EXIT_GROUP_AMBIGUOUS,
            format!(
                "unresolved ambiguity: {} multiply-assigned member(s), {} group(s) without spin-parity consensus",
                s.multiply_assigned, s.no_consensus
            ),
        ));
    }
    Ok(())
}

fn print_summary(result: &GroupingResult) {
    let s = &result.summary;
    let nuclide = result.meta.nuclide.as_deref().unwrap_or("(unnamed)");
    eprintln!(
        "{nuclide}: {} dataset(s), {} level group(s) ({} singleton(s)), {} gamma group(s)",
        result.meta.datasets.len(),
        s.level_groups,
        s.singletons,
        s.gamma_groups,
    );
    eprintln!(
        "members: {} total, {} multiply-assigned, {} uncertain; {} unplaced",
        s.members, s.multiply_assigned, s.uncertain, s.unplaced,
    );
    if s.pruned_groups > 0 || s.refined_placements > 0 || s.no_consensus > 0 {
        eprintln!(
            "refinement: {} pruned group(s), {} placement(s) dropped by spin-parity, {} without consensus",
            s.pruned_groups, s.refined_placements, s.no_consensus,
        );
    }
    if s.bisections > 0 || s.cap_hits > 0 {
        eprintln!(
            "resolver: {} component(s), {} bisected, {} hit the node cap",
            s.components_solved, s.bisections, s.cap_hits,
        );
    }
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(Some(&config_path))?;
    eprintln!(
        "valid: '{}' (levels ±{} keV, gammas ±{} keV, {}σ, split limit {})",
        config.name,
        config.levels.tolerance,
        config.gammas.tolerance,
        config.levels.n_sigma,
        config.resolver.split_limit,
    );
    Ok(())
}
