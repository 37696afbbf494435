//! Metric calculators and reducers.
//!
//! [`phed`] and [`reliability`] implement the formula chains, [`aggregate`]
//! the per-segment group-by, [`network`] the system-wide weighted reductions.

pub mod aggregate;
pub mod hourly;
pub mod modes;
pub mod network;
pub mod phed;
pub mod reliability;
pub mod types;
pub mod utility;
