//! CLI Exit Code Registry
//!
//! Single source of truth for every exit code `nuclink` returns. Scripts
//! rely on these values.
//!
//! # Exit Code Ranges
//!
//! | Range | Domain    | Description                              |
//! |-------|-----------|------------------------------------------|
//! | 0     | Universal | Success                                  |
//! | 1     | Universal | General error (unspecified)              |
//! | 2     | Universal | CLI usage error (bad args, missing file) |
//! | 3-9   | group     | Grouping-specific codes                  |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Map it in `recon_exit_code` if a `ReconError` produces it

use nuclink_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable input path.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Group (3-9)
// =============================================================================

/// Config file failed to parse or validate.
pub const EXIT_GROUP_INVALID_CONFIG: u8 = 3;

/// Input JSON malformed, duplicate dataset ids, or more than one reference.
pub const EXIT_GROUP_INPUT: u8 = 4;

/// Internal invariant broken during grouping.
pub const EXIT_GROUP_RUNTIME: u8 = 5;

/// Cannot write the output file.
pub const EXIT_GROUP_IO: u8 = 6;

/// `--strict`: grouping finished but left unresolved ambiguity.
pub const EXIT_GROUP_AMBIGUOUS: u8 = 7;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_GROUP_INVALID_CONFIG,
        ReconError::InputParse(_)
        | ReconError::DuplicateDataset(_)
        | ReconError::MultipleReference { .. } => EXIT_GROUP_INPUT,
        ReconError::Invariant(_) => EXIT_GROUP_RUNTIME,
        ReconError::Io(_) => EXIT_GROUP_IO,
    }
}
