pub mod autofix;
pub mod comment;
pub mod context;
pub mod diff_parser;
pub mod git;
pub mod prompt;
pub mod reconciler;
pub mod review_parser;
