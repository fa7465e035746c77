pub mod assembler;
pub mod lorebook;
pub mod role;

pub use assembler::{AssembledPrompt, PromptInputs, TokenStats, assemble};
pub use lorebook::{LoreBlocks, activate as activate_lore, build_blocks as build_lore_blocks};
pub use role::render_role;
