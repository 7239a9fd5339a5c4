//! Domain model for dynamic attribute provisioning.
//!
//! # Responsibility
//! - Define attribute definitions, the closed logical-type table and view
//!   fragment records.
//! - Own the physical identifier grammar.
//!
//! # Invariants
//! - The attribute catalog is the single source of truth; fragments and
//!   physical columns are derived from it.
//! - Definitions are immutable once created.

pub mod attribute;
pub mod naming;
pub mod view;
