//! UI module for consistent CLI output
//!
//! Uses `cliclack` for interactive output with automatic fallback to
//! plain text in CI/non-interactive environments.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_error, outro_success, remark, section, step_info, step_ok_detail,
    step_warn_hint,
};
pub use progress::{StageProgress, TaskSpinner};
pub use prompts::confirm;
