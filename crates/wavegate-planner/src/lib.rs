//! Wavegate Planner - Dependency graph resolution
//!
//! Turns a flat list of unit declarations into an immutable [`WavePlan`]:
//! validates the declarations, rejects cycles and wave-ordering violations,
//! and layers the remaining graph into waves. Resolution has no side effects;
//! a plan that fails here never reaches a cluster.
//!
//! ## Usage
//!
//! ```ignore
//! let units = load_units("units.yaml")?
//!     .into_iter()
//!     .map(|decl| decl.into_unit(&RetryPolicy::default()))
//!     .collect();
//! let plan = WaveResolver::new().resolve(units)?;
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

mod dag;
pub mod declaration;
pub mod error;
pub mod resolver;

pub use declaration::{load_units, RetryOverride, UnitDeclaration, UnitsDocument};
pub use error::{PlanError, Result};
pub use resolver::WaveResolver;

pub use wavegate_types::{ValidationError, WavePlan};
