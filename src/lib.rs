//! Terminus Engine: dialogue graph evaluation for branching narrative games.
//!
//! Given a player's accumulated state and a registry of authored dialogue
//! graphs, the engine decides which choices are visible, enabled or locked,
//! computes the state transition a selected choice causes, and explores the
//! content graph offline to prove no player can be stranded.

pub mod core;
pub mod schema;
