pub mod dictionary;
pub mod error;
pub mod key_manager;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod session;
pub mod snippet;
pub mod table;
pub mod util;

pub use error::{Error, Result};
