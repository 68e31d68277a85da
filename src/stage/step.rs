//! Build steps executed by every non-production stage, in fixed order

use std::fmt;

/// One step of the stage state machine.
///
/// Order is fixed: inputs land before dependencies install, source lands
/// after, so a source-only edit re-runs from `CopySource` while the
/// dependency layer replays from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CopyInputs,
    InstallDeps,
    CopySource,
    InstallProject,
}

impl Step {
    pub const SEQUENCE: [Step; 4] = [
        Step::CopyInputs,
        Step::InstallDeps,
        Step::CopySource,
        Step::InstallProject,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::CopyInputs => "copy-inputs",
            Self::InstallDeps => "install-deps",
            Self::CopySource => "copy-source",
            Self::InstallProject => "install-project",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
