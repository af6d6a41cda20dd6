//! The Stepwise planning loop.
//!
//! The agent follows a **Plan → Gate → Act → Observe** cycle per turn:
//!
//! 1. **Plan**: ask the model for one JSON decision, given the request,
//!    the unit and tool catalogs and what already happened
//! 2. **Gate**: stop on repeated actions, classify risk, confirm if the
//!    policy says so
//! 3. **Act**: run the unit or tool through the execution harness
//! 4. **Observe**: record the result for the next planning call
//!
//! The turn ends on an answer, a declined confirmation, a repeated action,
//! a terminal error or after `max_steps` planning calls.

pub mod answer_stream;
pub mod author;
pub mod catalog_text;
pub mod codec;
pub mod confirm;
pub mod context;
pub mod decision_cache;
pub mod error;
pub mod history;
pub mod loop_runner;
pub mod output;
pub mod planner;
pub mod risk;
pub mod spinner;

#[cfg(test)]
mod test_support;

pub use answer_stream::AnswerExtractor;
pub use author::{AuthoredUnit, UnitAuthor};
pub use catalog_text::build_unit_catalog;
pub use codec::parse_decision;
pub use confirm::{Confirmer, LineSource, StdinConfirmer};
pub use context::{attach_files, build_planner_prompt, env_context};
pub use decision_cache::DecisionCache;
pub use error::{AuthorError, ContextError, ParseError};
pub use history::{ActionRecord, SessionHistory};
pub use loop_runner::{AgentLoop, TurnOutcome, TurnReport};
pub use output::{JsonWriter, OutputWriter, StepReport, StepStatus, TtyWriter};
pub use planner::{Decider, DecisionRequest};
pub use risk::assess_risk;
pub use spinner::Spinner;
