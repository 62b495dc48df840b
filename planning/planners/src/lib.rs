//! Online planner over compiled probabilistic temporal problems.
//!
//! The crate wires these pieces together:
//! - [`mdp`]: the stochastic transition system built on a ground problem;
//! - [`stn`]: the simple temporal network tracking committed actions;
//! - [`heuristics`]: reward estimators, chiefly the temporal relaxed
//!   planning graph;
//! - [`search`]: the Monte-Carlo tree search;
//! - [`solver`]: the outer planning loop, committing one action per step.

pub mod heuristics;
pub mod mdp;
pub mod search;
pub mod solver;
pub mod stn;

/// Reward collected when a transition reaches a goal state.
pub const GOAL_REWARD: f64 = 10.0;

/// Value of a dead end: a state with no applicable action, a violated
/// deadline or unreachable goals. Large enough (in magnitude) to dominate
/// any discounted goal reward, so the search learns to avoid such branches
/// rather than aborting on them.
pub const DEAD_END_PENALTY: f64 = -100.0;
