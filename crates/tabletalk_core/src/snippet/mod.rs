//! The snippet engine. Model replies are evaluated against the in-memory
//! table through a small allow-listed expression language instead of being
//! handed to an interpreter; nothing outside the table is reachable from a
//! snippet.

pub mod eval;
pub mod parser;

pub use eval::run_snippet;

/// The well-known name a snippet must bind its computed answer to.
pub const RESULT_NAME: &str = "answer";

/// Drop markdown code-fence lines from a model reply, leaving the snippet
/// body. Models regularly wrap output in ``` fences despite instructions.
pub fn strip_code_fences(reply: &str) -> String {
    reply
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}
