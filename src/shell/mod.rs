pub mod runner;
pub mod tool;

pub use runner::{RunOptions, RunOutcome, ShellRunner};
pub use tool::{ExecOutcome, TmuxTool};
