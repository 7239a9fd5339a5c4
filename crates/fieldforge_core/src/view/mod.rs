//! Layout fragments and view compilation.
//!
//! # Responsibility
//! - Turn an attribute definition into per-view layout patches.
//! - Merge patches into effective views.
//!
//! # Invariants
//! - Everything here except `manager` is pure over layout text.

pub mod compile;
pub mod fragment;
pub mod layout;
pub mod manager;
