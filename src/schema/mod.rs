pub mod character;
pub mod condition;
pub mod graph;
pub mod patterns;
pub mod state;
