pub mod catalog;
pub mod executor;
pub mod executors;
mod machine;
pub mod runs;
pub mod runtime;

pub use catalog::FlowCatalog;
pub use executor::{ExecError, ExecOutcome, Executor, ExecutorRegistry, TurnContext};
pub use runs::{FlowRun, FlowRunStep, RunStatus, RunStore};
pub use runtime::{FlowEngine, TurnOutcome};
