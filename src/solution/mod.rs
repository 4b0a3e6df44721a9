//! Execution solutions: the OS/topology-specific command sequences a host
//! runs to install, uninstall or upgrade its agent.
//!
//! A solution is an ordered tree fixed at build time. The dispatcher walks
//! it; it never reorders steps. Nested solutions exist only for relay
//! scenarios, where the outer solution smuggles the target host's own
//! solutions to the jump server.

use serde::{Deserialize, Serialize};

pub mod adapter;
pub mod builder;
pub mod envelope;
pub mod flags;

pub use builder::{build_for_host, BuildContext, SolutionBuilder};

/// Script dialect a solution is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolutionKind {
    Shell,
    Batch,
}

/// Kind of a step within a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Contents are commands to execute in order.
    Commands,
    /// Contents are artifacts to materialize on the host before any later
    /// step runs.
    Dependencies,
}

/// One unit inside a step: a command line or an artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub name: String,
    pub text: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_dir: Option<String>,
    #[serde(default)]
    pub always_download: bool,
    #[serde(default)]
    pub show_description: bool,
}

impl Content {
    pub fn command(name: impl Into<String>, text: impl Into<String>, description: impl Into<String>) -> Self {
        Content {
            name: name.into(),
            text: text.into(),
            description: description.into(),
            child_dir: None,
            always_download: false,
            show_description: true,
        }
    }

    pub fn dependency(
        name: impl Into<String>,
        source: impl Into<String>,
        child_dir: Option<String>,
        always_download: bool,
    ) -> Self {
        Content {
            name: name.into(),
            text: source.into(),
            description: String::new(),
            child_dir,
            always_download,
            show_description: false,
        }
    }
}

/// Ordered group of contents of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    pub description: String,
    pub contents: Vec<Content>,
}

impl Step {
    pub fn commands(description: impl Into<String>, contents: Vec<Content>) -> Self {
        Step {
            kind: StepKind::Commands,
            description: description.into(),
            contents,
        }
    }

    pub fn dependencies(description: impl Into<String>, contents: Vec<Content>) -> Self {
        Step {
            kind: StepKind::Dependencies,
            description: description.into(),
            contents,
        }
    }
}

/// Complete command sequence for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSolution {
    pub kind: SolutionKind,
    pub description: String,
    pub steps: Vec<Step>,
    /// Populated only for relay solutions: the target host's own
    /// solutions, carried verbatim inside the outer run command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_target_solutions: Vec<ExecutionSolution>,
}

impl ExecutionSolution {
    pub fn new(kind: SolutionKind, description: impl Into<String>) -> Self {
        ExecutionSolution {
            kind,
            description: description.into(),
            steps: Vec::new(),
            nested_target_solutions: Vec::new(),
        }
    }

    /// All contents of Commands steps, in step order.
    pub fn command_contents(&self) -> impl Iterator<Item = &Content> {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Commands)
            .flat_map(|s| s.contents.iter())
    }

    /// The final run command of the solution, if any.
    pub fn run_command(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.kind == StepKind::Commands)
            .and_then(|s| s.contents.last())
            .map(|c| c.text.as_str())
    }
}
