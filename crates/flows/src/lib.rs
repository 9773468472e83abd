pub mod builtin;
pub mod context;
pub mod expr;
pub mod loader;
pub mod model;
pub mod template;
pub mod validate;

pub use model::{Action, Condition, FlowDefinition, FlowModule, OnError, RetryPolicy, State, StateKind};
