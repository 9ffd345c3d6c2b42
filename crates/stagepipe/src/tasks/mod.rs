//! Task dependency graph across the three processing layers.

pub mod graph;
pub mod schedule;

pub use graph::{LayerSummary, NoopScheduler, SchedulerBackend, TaskCounts, TaskGraph, TaskOverview};

use serde::Serialize;

/// Processing layer a task belongs to. Layers are ordered by how far the
/// data has travelled: raw ingest, cleaned, reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskLayer {
    Bronze,
    Silver,
    Gold,
}

impl TaskLayer {
    pub const ALL: [TaskLayer; 3] = [TaskLayer::Bronze, TaskLayer::Silver, TaskLayer::Gold];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskLayer::Bronze => "BRONZE",
            TaskLayer::Silver => "SILVER",
            TaskLayer::Gold => "GOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BRONZE" => Some(TaskLayer::Bronze),
            "SILVER" => Some(TaskLayer::Silver),
            "GOLD" => Some(TaskLayer::Gold),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution state of one task node.
///
/// `Scheduled` is reported by the external scheduler (a run is pending) and
/// is never the target of a direct command; it reaches the graph only via
/// `observe_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Started,
    Suspended,
    Scheduled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Started => "STARTED",
            TaskState::Suspended => "SUSPENDED",
            TaskState::Scheduled => "SCHEDULED",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schedulable unit of work.
///
/// A node with a predecessor runs when the predecessor finishes; it has no
/// schedule of its own and rejects direct start/stop commands. A root node
/// (no predecessor) is driven by its schedule expression.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub layer: TaskLayer,
    pub name: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<String>,
}

impl TaskNode {
    /// A root node suspended at registration time.
    pub fn root(layer: TaskLayer, name: &str, schedule: &str) -> Self {
        Self {
            layer,
            name: name.to_string(),
            state: TaskState::Suspended,
            schedule: Some(schedule.to_string()),
            predecessor: None,
        }
    }

    /// A node triggered by completion of `predecessor`.
    pub fn dependent(layer: TaskLayer, name: &str, predecessor: &str) -> Self {
        Self {
            layer,
            name: name.to_string(),
            state: TaskState::Suspended,
            schedule: None,
            predecessor: Some(predecessor.to_string()),
        }
    }
}
