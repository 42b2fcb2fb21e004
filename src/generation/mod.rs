//! SQL Generation
//!
//! The two single-shot LLM steps driven by the retry loop: one produces a
//! candidate query, the other judges it.

pub mod generator;
pub mod validator;

pub use generator::*;
pub use validator::*;
