//! In-memory task registry with predecessor gating.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::{schedule, TaskLayer, TaskNode, TaskState};
use crate::error::TaskError;

/// Seam to the external scheduler that actually runs tasks. The graph keeps
/// the authoritative dependency model; the backend receives the effects.
pub trait SchedulerBackend: Send + Sync {
    fn resume(&self, node: &TaskNode) -> Result<(), String>;
    fn suspend(&self, node: &TaskNode) -> Result<(), String>;
    fn set_schedule(&self, node: &TaskNode, expression: &str) -> Result<(), String>;
}

/// Backend that accepts every command without side effects. Default for
/// tests and for deployments where the scheduler is driven elsewhere.
#[derive(Debug, Default)]
pub struct NoopScheduler;

impl SchedulerBackend for NoopScheduler {
    fn resume(&self, _node: &TaskNode) -> Result<(), String> {
        Ok(())
    }

    fn suspend(&self, _node: &TaskNode) -> Result<(), String> {
        Ok(())
    }

    fn set_schedule(&self, _node: &TaskNode, _expression: &str) -> Result<(), String> {
        Ok(())
    }
}

/// State counts for a set of tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub started: usize,
    pub suspended: usize,
    pub scheduled: usize,
}

impl TaskCounts {
    fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Started => self.started += 1,
            TaskState::Suspended => self.suspended += 1,
            TaskState::Scheduled => self.scheduled += 1,
        }
    }
}

/// Tasks of one layer with their state counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    pub layer: TaskLayer,
    pub tasks: Vec<TaskNode>,
    pub counts: TaskCounts,
}

/// The full graph grouped by layer, with aggregate counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOverview {
    pub layers: Vec<LayerSummary>,
    pub totals: TaskCounts,
}

/// Registry of task nodes keyed by `(layer, name)`.
///
/// Commands on predecessor-controlled nodes are rejected here before the
/// backend ever sees them; the predecessor's completion is the only thing
/// that runs such a node.
pub struct TaskGraph {
    nodes: Mutex<BTreeMap<(TaskLayer, String), TaskNode>>,
    backend: Arc<dyn SchedulerBackend>,
}

impl TaskGraph {
    pub fn new(backend: Arc<dyn SchedulerBackend>) -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            backend,
        }
    }

    /// Adds or replaces a node. Root nodes must carry a well-formed
    /// schedule expression.
    pub fn register(&self, node: TaskNode) -> Result<(), TaskError> {
        let node = match (&node.predecessor, &node.schedule) {
            (None, Some(expr)) => {
                let normalized = schedule::validate(expr)?;
                TaskNode {
                    schedule: Some(normalized),
                    ..node
                }
            }
            (None, None) => {
                return Err(TaskError::InvalidState {
                    name: node.name,
                    reason: "a root task needs a schedule expression".to_string(),
                })
            }
            // Predecessor-driven nodes carry no schedule of their own.
            (Some(_), _) => TaskNode {
                schedule: None,
                ..node
            },
        };

        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        log::debug!("Registered task {} in {} layer", node.name, node.layer);
        nodes.insert((node.layer, node.name.clone()), node);
        Ok(())
    }

    /// Returns a copy of one node.
    pub fn get(&self, layer: TaskLayer, name: &str) -> Result<TaskNode, TaskError> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes
            .get(&(layer, name.to_string()))
            .cloned()
            .ok_or_else(|| TaskError::NotFound {
                layer: layer.to_string(),
                name: name.to_string(),
            })
    }

    /// Resumes a root node. No-op success when already STARTED; fails with
    /// `PredecessorControlled` for dependent nodes.
    pub fn start(&self, layer: TaskLayer, name: &str) -> Result<TaskNode, TaskError> {
        self.command(layer, name, TaskState::Started)
    }

    /// Suspends a root node. No-op success when already SUSPENDED.
    pub fn stop(&self, layer: TaskLayer, name: &str) -> Result<TaskNode, TaskError> {
        self.command(layer, name, TaskState::Suspended)
    }

    fn command(
        &self,
        layer: TaskLayer,
        name: &str,
        target: TaskState,
    ) -> Result<TaskNode, TaskError> {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let node = nodes
            .get_mut(&(layer, name.to_string()))
            .ok_or_else(|| TaskError::NotFound {
                layer: layer.to_string(),
                name: name.to_string(),
            })?;

        if let Some(pred) = &node.predecessor {
            return Err(TaskError::PredecessorControlled {
                name: node.name.clone(),
                predecessor: pred.clone(),
            });
        }
        if node.state == target {
            return Ok(node.clone());
        }

        match target {
            TaskState::Started => self.backend.resume(node).map_err(TaskError::External)?,
            TaskState::Suspended => self.backend.suspend(node).map_err(TaskError::External)?,
            TaskState::Scheduled => unreachable!("SCHEDULED is never a command target"),
        }
        node.state = target;
        log::info!("Task {} ({} layer) is now {}", node.name, layer, target);
        Ok(node.clone())
    }

    /// Replaces a root node's schedule. The node must be SUSPENDED so the
    /// backend never sees a schedule swap on a live task.
    pub fn update_schedule(
        &self,
        layer: TaskLayer,
        name: &str,
        expression: &str,
    ) -> Result<TaskNode, TaskError> {
        let normalized = schedule::validate(expression)?;

        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let node = nodes
            .get_mut(&(layer, name.to_string()))
            .ok_or_else(|| TaskError::NotFound {
                layer: layer.to_string(),
                name: name.to_string(),
            })?;

        if let Some(pred) = &node.predecessor {
            return Err(TaskError::PredecessorControlled {
                name: node.name.clone(),
                predecessor: pred.clone(),
            });
        }
        if node.state != TaskState::Suspended {
            return Err(TaskError::InvalidState {
                name: node.name.clone(),
                reason: format!("schedule is only editable while SUSPENDED, task is {}", node.state),
            });
        }

        self.backend
            .set_schedule(node, &normalized)
            .map_err(TaskError::External)?;
        node.schedule = Some(normalized);
        log::info!("Task {} ({} layer) rescheduled", node.name, layer);
        Ok(node.clone())
    }

    /// Records a state reported by the scheduler backend, including the
    /// transient SCHEDULED state that direct commands can never set.
    pub fn observe_state(
        &self,
        layer: TaskLayer,
        name: &str,
        state: TaskState,
    ) -> Result<(), TaskError> {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let node = nodes
            .get_mut(&(layer, name.to_string()))
            .ok_or_else(|| TaskError::NotFound {
                layer: layer.to_string(),
                name: name.to_string(),
            })?;
        node.state = state;
        Ok(())
    }

    /// All nodes of one layer, sorted by name.
    pub fn list(&self, layer: TaskLayer) -> Vec<TaskNode> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes
            .values()
            .filter(|n| n.layer == layer)
            .cloned()
            .collect()
    }

    /// Every layer with its tasks and counts, plus aggregate counts.
    pub fn list_all(&self) -> TaskOverview {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let mut totals = TaskCounts::default();
        let mut layers = Vec::with_capacity(TaskLayer::ALL.len());

        for layer in TaskLayer::ALL {
            let tasks: Vec<TaskNode> = nodes
                .values()
                .filter(|n| n.layer == layer)
                .cloned()
                .collect();
            let mut counts = TaskCounts::default();
            for task in &tasks {
                counts.add(task.state);
                totals.add(task.state);
            }
            layers.push(LayerSummary {
                layer,
                tasks,
                counts,
            });
        }

        TaskOverview { layers, totals }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that counts calls and can be told to fail.
    #[derive(Default)]
    struct RecordingBackend {
        resumes: AtomicUsize,
        suspends: AtomicUsize,
        reschedules: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl SchedulerBackend for RecordingBackend {
        fn resume(&self, _node: &TaskNode) -> Result<(), String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err("backend unavailable".to_string());
            }
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn suspend(&self, _node: &TaskNode) -> Result<(), String> {
            self.suspends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_schedule(&self, _node: &TaskNode, _expression: &str) -> Result<(), String> {
            self.reschedules.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn graph_with_backend() -> (TaskGraph, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        (TaskGraph::new(backend.clone()), backend)
    }

    fn seed(graph: &TaskGraph) {
        graph
            .register(TaskNode::root(TaskLayer::Bronze, "LOAD_RAW", "5 MINUTE"))
            .unwrap();
        graph
            .register(TaskNode::dependent(TaskLayer::Silver, "CLEAN", "LOAD_RAW"))
            .unwrap();
        graph
            .register(TaskNode::dependent(TaskLayer::Gold, "REPORT", "CLEAN"))
            .unwrap();
    }

    #[test]
    fn test_register_rejects_root_without_schedule() {
        let (graph, _) = graph_with_backend();
        let node = TaskNode {
            layer: TaskLayer::Bronze,
            name: "LOAD_RAW".to_string(),
            state: TaskState::Suspended,
            schedule: None,
            predecessor: None,
        };
        assert!(matches!(
            graph.register(node),
            Err(TaskError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_register_validates_schedule() {
        let (graph, _) = graph_with_backend();
        let node = TaskNode::root(TaskLayer::Bronze, "LOAD_RAW", "whenever");
        assert!(matches!(
            graph.register(node),
            Err(TaskError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_start_stop_root() {
        let (graph, backend) = graph_with_backend();
        seed(&graph);

        let node = graph.start(TaskLayer::Bronze, "LOAD_RAW").unwrap();
        assert_eq!(node.state, TaskState::Started);
        assert_eq!(backend.resumes.load(Ordering::SeqCst), 1);

        // Idempotent: second start succeeds without another backend call.
        graph.start(TaskLayer::Bronze, "LOAD_RAW").unwrap();
        assert_eq!(backend.resumes.load(Ordering::SeqCst), 1);

        let node = graph.stop(TaskLayer::Bronze, "LOAD_RAW").unwrap();
        assert_eq!(node.state, TaskState::Suspended);
        assert_eq!(backend.suspends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dependent_nodes_reject_commands() {
        let (graph, backend) = graph_with_backend();
        seed(&graph);

        for op in [TaskGraph::start, TaskGraph::stop] {
            let result = op(&graph, TaskLayer::Silver, "CLEAN");
            assert!(matches!(
                result,
                Err(TaskError::PredecessorControlled { .. })
            ));
        }
        let result = graph.update_schedule(TaskLayer::Silver, "CLEAN", "5 MINUTE");
        assert!(matches!(
            result,
            Err(TaskError::PredecessorControlled { .. })
        ));
        assert_eq!(backend.resumes.load(Ordering::SeqCst), 0);
        assert_eq!(backend.suspends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backend_failure_leaves_state_untouched() {
        let (graph, backend) = graph_with_backend();
        seed(&graph);
        backend.fail.store(true, Ordering::SeqCst);

        let result = graph.start(TaskLayer::Bronze, "LOAD_RAW");
        assert!(matches!(result, Err(TaskError::External(_))));
        assert_eq!(
            graph.get(TaskLayer::Bronze, "LOAD_RAW").unwrap().state,
            TaskState::Suspended
        );
    }

    #[test]
    fn test_update_schedule_requires_suspended() {
        let (graph, backend) = graph_with_backend();
        seed(&graph);

        graph.start(TaskLayer::Bronze, "LOAD_RAW").unwrap();
        let result = graph.update_schedule(
            TaskLayer::Bronze,
            "LOAD_RAW",
            "USING CRON 0 6 * * * UTC",
        );
        assert!(matches!(result, Err(TaskError::InvalidState { .. })));

        graph.stop(TaskLayer::Bronze, "LOAD_RAW").unwrap();
        let node = graph
            .update_schedule(TaskLayer::Bronze, "LOAD_RAW", "USING CRON 0 6 * * * UTC")
            .unwrap();
        assert_eq!(node.schedule.as_deref(), Some("USING CRON 0 6 * * * UTC"));
        assert_eq!(backend.reschedules.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_schedule_rejects_malformed() {
        let (graph, _) = graph_with_backend();
        seed(&graph);
        let result = graph.update_schedule(TaskLayer::Bronze, "LOAD_RAW", "0 6 * * *");
        assert!(matches!(result, Err(TaskError::InvalidSchedule { .. })));
    }

    #[test]
    fn test_missing_node() {
        let (graph, _) = graph_with_backend();
        let result = graph.start(TaskLayer::Gold, "NOPE");
        assert!(matches!(result, Err(TaskError::NotFound { .. })));
    }

    #[test]
    fn test_observe_state_sets_scheduled() {
        let (graph, _) = graph_with_backend();
        seed(&graph);

        graph
            .observe_state(TaskLayer::Bronze, "LOAD_RAW", TaskState::Scheduled)
            .unwrap();
        assert_eq!(
            graph.get(TaskLayer::Bronze, "LOAD_RAW").unwrap().state,
            TaskState::Scheduled
        );
    }

    #[test]
    fn test_list_all_counts() {
        let (graph, _) = graph_with_backend();
        seed(&graph);
        graph.start(TaskLayer::Bronze, "LOAD_RAW").unwrap();
        graph
            .observe_state(TaskLayer::Gold, "REPORT", TaskState::Scheduled)
            .unwrap();

        let overview = graph.list_all();
        assert_eq!(overview.layers.len(), 3);
        assert_eq!(
            overview.totals,
            TaskCounts {
                started: 1,
                suspended: 1,
                scheduled: 1,
            }
        );

        let bronze = &overview.layers[0];
        assert_eq!(bronze.layer, TaskLayer::Bronze);
        assert_eq!(bronze.counts.started, 1);
        assert_eq!(bronze.tasks.len(), 1);
    }
}
