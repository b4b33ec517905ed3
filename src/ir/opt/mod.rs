//! Block-local optimization passes.
//!
//! All passes preserve SSA form, pseudo-operation links, and the
//! one-terminal invariant. Run order matters: get/set elimination first
//! (it exposes constants), then constant propagation, then dead code
//! elimination, then A32 condition folding.

mod condition_folding;
mod constant_propagation;
mod dead_code_elimination;
mod get_set_elimination;
mod verification;

pub use condition_folding::a32_condition_folding;
pub use constant_propagation::constant_propagation;
pub use dead_code_elimination::dead_code_elimination;
pub use get_set_elimination::{a32_get_set_elimination, a64_get_set_elimination};
pub use verification::verify;
