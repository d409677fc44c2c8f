//! The step loop.
//!
//! One step: snapshot, build the compact prompt, ask the executor for an
//! action, parse it against the strict grammar, execute it through the
//! backend, re-snapshot through the captcha gate, then evaluate the
//! step's verifications. A step is ok when every required verification
//! passed; vision fallback gets one coordinate-based retry when the
//! budget allows.

pub mod action;
pub mod errors;
pub mod executor;
pub mod prompt;
pub mod step_loop;

pub use action::{parse_action, Action};
pub use errors::AgentError;
pub use executor::{Executor, ExecutorReply, ScriptedExecutor, VisionExecutor};
pub use prompt::{DefaultPromptBuilder, PromptBuilder, PromptInputs, PromptPair};
pub use step_loop::{RunReport, StepAgent, StepAgentConfig, StepReport, StepSpec, StepVerification};
