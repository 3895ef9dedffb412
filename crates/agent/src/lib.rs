//! The agent runtime for Unison.
//!
//! Each agent follows a **decide → act → observe** cycle:
//!
//! 1. **Assemble context** from its profile, committed steps and inbox
//! 2. **Ask the backend** for one structured action
//! 3. **Dispatch** a tool call or a message, or stop on a final answer
//! 4. **Persist** the step and loop back to 1
//!
//! The loop is bounded by `max_iterations`; unparseable responses get a
//! bounded number of re-prompts. A [`Clan`] runs a manager and its members
//! through planning, delegation, execution, collection and synthesis on top
//! of the same loop and a shared [`MessageBus`].

pub mod bus;
pub mod clan;
pub mod context;
pub mod loop_runner;
pub mod outcome;
pub mod response;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bus::MessageBus;
pub use clan::{Assignment, Clan, ClanBuilder, ClanLimits, ClanOutcome, MemberReport, Phase, parse_plan};
pub use loop_runner::{AgentLoop, Turn};
pub use outcome::{AgentOutcome, Failure, FailureReason, Status};
pub use response::{Action, ModelResponse, parse_params, parse_response};
