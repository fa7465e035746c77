pub mod entities;
pub mod error;
pub mod tokens;

pub use entities::*;
pub use error::{DomainError, Result};
pub use tokens::estimate_tokens;
