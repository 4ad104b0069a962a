//! `nuclink-core`: domain values shared by the grouping engine.
//!
//! Measured quantities with ENSDF-style uncertainties, spin-parity
//! constraints, and the serde records an observation store hands over.
//! No matching logic lives here.

pub mod error;
pub mod quantity;
pub mod record;
pub mod spin_parity;

pub use error::ParseError;
pub use quantity::{LimitKind, Quantity, Uncertainty};
pub use record::{DatasetRecord, GammaRecord, HalfLifeRecord, LevelRecord, ObservationInput};
pub use spin_parity::{JpiOption, JpiRelation, Parity, SpinParity};
