//! Policy-based script safety validation.
//!
//! Each execution policy maps to an ordered regex deny list; a single match
//! denies the script and cites the rule. Scoring and lint heuristics feed
//! the offline validation path.

pub mod lint;
pub mod rules;
pub mod validator;

pub use lint::{lint_script, recommendations_from};
pub use validator::{score_from, SafetyValidator};
