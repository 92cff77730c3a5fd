//! DAG pipeline engine: validation, topological ordering, and execution of
//! a directed acyclic graph of plugin-tool invocations with
//! predecessor-output merging and structured observability.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::CoreError;
use crate::execution::tool_runner::ToolRunner;
use crate::plugin::JsonMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub plugin_id: String,
    pub tool_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_node: String,
    pub to_node: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub entry_nodes: Vec<String>,
    pub output_nodes: Vec<String>,
}

/// Declared input/output types and capabilities for one pipeline node's
/// tool, used only by [`Pipeline::validate_types`].
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub plugin_id: String,
    pub tool_id: String,
    pub input_types: Vec<String>,
    pub output_types: Vec<String>,
    pub capabilities: Vec<String>,
}

impl Pipeline {
    fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            adjacency.entry(node.id.as_str()).or_default();
        }
        for edge in &self.edges {
            adjacency
                .entry(edge.from_node.as_str())
                .or_default()
                .push(edge.to_node.as_str());
        }
        adjacency
    }

    /// Reports every validation failure rather than stopping at the first;
    /// a pipeline is valid iff the returned list is empty.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let ids = self.node_ids();

        for entry in &self.entry_nodes {
            if !ids.contains(entry.as_str()) {
                errors.push(format!("entry node '{entry}' is not a known node"));
            }
        }
        for output in &self.output_nodes {
            if !ids.contains(output.as_str()) {
                errors.push(format!("output node '{output}' is not a known node"));
            }
        }
        for edge in &self.edges {
            if !ids.contains(edge.from_node.as_str()) {
                errors.push(format!("edge references unknown node '{}'", edge.from_node));
            }
            if !ids.contains(edge.to_node.as_str()) {
                errors.push(format!("edge references unknown node '{}'", edge.to_node));
            }
        }

        if let Some(cycle_node) = self.find_cycle() {
            errors.push(format!("cycle detected involving node '{cycle_node}'"));
        }

        let unreachable = self.unreachable_nodes();
        for node in unreachable {
            errors.push(format!("node '{node}' is not reachable from any entry node"));
        }

        errors
    }

    fn find_cycle(&self) -> Option<String> {
        let adjacency = self.adjacency();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: HashSet<&str> = HashSet::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            visited: &mut HashSet<&'a str>,
            stack: &mut HashSet<&'a str>,
        ) -> Option<&'a str> {
            if stack.contains(node) {
                return Some(node);
            }
            if visited.contains(node) {
                return None;
            }
            visited.insert(node);
            stack.insert(node);
            if let Some(successors) = adjacency.get(node) {
                for &successor in successors {
                    if let Some(cycle) = visit(successor, adjacency, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.remove(node);
            None
        }

        for node in self.nodes.iter().map(|n| n.id.as_str()) {
            if !visited.contains(node) {
                if let Some(cycle) = visit(node, &adjacency, &mut visited, &mut stack) {
                    return Some(cycle.to_string());
                }
            }
        }
        None
    }

    fn unreachable_nodes(&self) -> Vec<String> {
        let adjacency = self.adjacency();
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.entry_nodes.iter().map(|s| s.as_str()).collect();
        while let Some(node) = queue.pop_front() {
            if reachable.insert(node) {
                if let Some(successors) = adjacency.get(node) {
                    for &successor in successors {
                        queue.push_back(successor);
                    }
                }
            }
        }
        self.nodes
            .iter()
            .map(|n| n.id.clone())
            .filter(|id| !reachable.contains(id.as_str()))
            .collect()
    }

    /// Kahn's algorithm. Ties are broken by node-definition order, which is
    /// deterministic within a run but not a contract callers should rely on
    /// beyond "predecessors precede successors."
    pub fn topological_order(&self) -> Result<Vec<String>, CoreError> {
        let mut in_degree: HashMap<&str, usize> = self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(edge.to_node.as_str()) {
                *degree += 1;
            }
        }
        let adjacency = self.adjacency();

        let mut ready: VecDeque<&str> = self
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_front() {
            order.push(node.to_string());
            if let Some(successors) = adjacency.get(node) {
                for &successor in successors {
                    if let Some(degree) = in_degree.get_mut(successor) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push_back(successor);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(CoreError::validation("pipeline", "cannot compute topological order: cycle present"));
        }
        Ok(order)
    }

    fn predecessors(&self, node_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to_node == node_id)
            .map(|e| e.from_node.as_str())
            .collect()
    }

    /// Runs every node in topological order, merging predecessor outputs
    /// into each node's payload (last-wins on key conflicts), and returns
    /// the initial input overlaid with every node's output in the same
    /// order. Aborts and propagates on the first node failure — no partial
    /// result is ever returned.
    pub async fn execute(
        &self,
        tool_runner: &ToolRunner,
        initial_input: JsonMap,
    ) -> Result<JsonMap, CoreError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let order = self.topological_order()?;
        let pipeline_started = Instant::now();

        info!(
            pipeline_id = %self.id,
            run_id = %run_id,
            entry_nodes = ?self.entry_nodes,
            output_nodes = ?self.output_nodes,
            node_count = self.nodes.len(),
            "pipeline_started"
        );

        let mut outputs: HashMap<String, JsonMap> = HashMap::new();

        for (step_index, node_id) in order.iter().enumerate() {
            let node = self
                .nodes
                .iter()
                .find(|n| &n.id == node_id)
                .expect("topological_order only yields known node ids");
            let predecessors = self.predecessors(node_id);

            let mut payload = initial_input.clone();
            for predecessor in &predecessors {
                if let Some(predecessor_output) = outputs.get(*predecessor) {
                    for (key, value) in predecessor_output {
                        payload.insert(key.clone(), value.clone());
                    }
                }
            }

            info!(
                node_id = %node.id,
                plugin_id = %node.plugin_id,
                tool_id = %node.tool_id,
                step_index,
                predecessors = ?predecessors,
                "pipeline_node_started"
            );

            let node_started = Instant::now();
            let mime_type = payload
                .get("mime_type")
                .and_then(|v| v.as_str())
                .unwrap_or("application/octet-stream")
                .to_string();
            let result = tool_runner
                .execute(&node.plugin_id, &node.tool_id, payload, &mime_type)
                .await;
            let node_duration_ms = node_started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    info!(
                        node_id = %node.id,
                        duration_ms = node_duration_ms,
                        output_keys = ?output.keys().collect::<Vec<_>>(),
                        "pipeline_node_completed"
                    );
                    outputs.insert(node.id.clone(), output);
                }
                Err(e) => {
                    error!(
                        node_id = %node.id,
                        duration_ms = node_duration_ms,
                        error_type = error_type_name(&e),
                        error_message = %e,
                        "pipeline_node_failed"
                    );
                    let pipeline_duration_ms = pipeline_started.elapsed().as_millis() as u64;
                    error!(
                        pipeline_id = %self.id,
                        run_id = %run_id,
                        duration_ms = pipeline_duration_ms,
                        error_type = error_type_name(&e),
                        error_message = %e,
                        "pipeline_failed"
                    );
                    return Err(e);
                }
            }
        }

        let mut result = initial_input;
        for node_id in &order {
            if let Some(output) = outputs.get(node_id) {
                for (key, value) in output {
                    result.insert(key.clone(), value.clone());
                }
            }
        }

        let pipeline_duration_ms = pipeline_started.elapsed().as_millis() as u64;
        info!(
            pipeline_id = %self.id,
            run_id = %run_id,
            duration_ms = pipeline_duration_ms,
            node_count = self.nodes.len(),
            "pipeline_completed"
        );

        Ok(result)
    }

    /// For every edge, the producer's declared output types must intersect
    /// the consumer's declared input types. Returns one diagnostic string
    /// per mismatching edge; an empty list means the pipeline type-checks.
    pub fn validate_types(&self, metadata: &HashMap<String, ToolMetadata>) -> Vec<String> {
        let mut diagnostics = Vec::new();
        for edge in &self.edges {
            let producer = metadata.get(&edge.from_node);
            let consumer = metadata.get(&edge.to_node);
            match (producer, consumer) {
                (Some(producer), Some(consumer)) => {
                    let compatible = producer
                        .output_types
                        .iter()
                        .any(|t| consumer.input_types.contains(t));
                    if !compatible {
                        diagnostics.push(format!(
                            "type mismatch on edge {} -> {}: outputs {:?} do not intersect inputs {:?}",
                            edge.from_node, edge.to_node, producer.output_types, consumer.input_types
                        ));
                    }
                }
                _ => diagnostics.push(format!(
                    "type mismatch on edge {} -> {}: missing tool metadata",
                    edge.from_node, edge.to_node
                )),
            }
        }
        diagnostics
    }
}

fn error_type_name(error: &CoreError) -> &'static str {
    match error {
        CoreError::Authentication { .. } => "Authentication",
        CoreError::Authorization { .. } => "Authorization",
        CoreError::Validation { .. } => "Validation",
        CoreError::PluginNotFound { .. } => "PluginNotFound",
        CoreError::PluginLoad { .. } => "PluginLoad",
        CoreError::PluginExecution { .. } => "PluginExecution",
        CoreError::InputValidation { .. } => "InputValidation",
        CoreError::OutputValidation { .. } => "OutputValidation",
        CoreError::JobNotFound { .. } => "JobNotFound",
        CoreError::JobCancellation { .. } => "JobCancellation",
        CoreError::JobExecution { .. } => "JobExecution",
        CoreError::MessageDelivery { .. } => "MessageDelivery",
        CoreError::ExternalService { .. } => "ExternalService",
        CoreError::Transport { .. } => "Transport",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::EchoPlugin;
    use crate::registry::PluginRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn linear_pipeline() -> Pipeline {
        Pipeline {
            id: "p1".to_string(),
            name: "linear".to_string(),
            nodes: vec![
                Node { id: "a".to_string(), plugin_id: "alpha".to_string(), tool_id: "detect".to_string() },
                Node { id: "b".to_string(), plugin_id: "beta".to_string(), tool_id: "detect".to_string() },
            ],
            edges: vec![Edge { from_node: "a".to_string(), to_node: "b".to_string() }],
            entry_nodes: vec!["a".to_string()],
            output_nodes: vec!["b".to_string()],
        }
    }

    #[test]
    fn valid_linear_pipeline_has_no_errors() {
        assert!(linear_pipeline().validate().is_empty());
    }

    #[test]
    fn cycle_is_detected() {
        let mut pipeline = linear_pipeline();
        pipeline.edges.push(Edge { from_node: "b".to_string(), to_node: "a".to_string() });
        let errors = pipeline.validate();
        assert!(errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn unreachable_node_is_flagged() {
        let mut pipeline = linear_pipeline();
        pipeline.nodes.push(Node { id: "c".to_string(), plugin_id: "gamma".to_string(), tool_id: "detect".to_string() });
        let errors = pipeline.validate();
        assert!(errors.iter().any(|e| e.contains("not reachable")));
    }

    #[test]
    fn topological_order_respects_edges() {
        let order = linear_pipeline().topological_order().unwrap();
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn execute_merges_predecessor_outputs_last_wins() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(Arc::new(
            EchoPlugin::new("alpha", vec!["detect".to_string()])
                .with_canned_result(json!({"stage": "a"}).as_object().unwrap().clone()),
        ));
        registry.register(Arc::new(
            EchoPlugin::new("beta", vec!["detect".to_string()])
                .with_canned_result(json!({"stage": "b"}).as_object().unwrap().clone()),
        ));
        let tool_runner = ToolRunner::new(registry);
        let pipeline = linear_pipeline();
        let input = json!({"artifact": "bytes", "stage": "initial"}).as_object().unwrap().clone();
        let result = pipeline.execute(&tool_runner, input).await.unwrap();
        assert_eq!(result.get("stage").unwrap(), "b");
    }

    #[test]
    fn validate_types_flags_incompatible_edge() {
        let pipeline = linear_pipeline();
        let mut metadata = HashMap::new();
        metadata.insert(
            "a".to_string(),
            ToolMetadata {
                plugin_id: "alpha".to_string(),
                tool_id: "detect".to_string(),
                input_types: vec!["image".to_string()],
                output_types: vec!["detections".to_string()],
                capabilities: vec![],
            },
        );
        metadata.insert(
            "b".to_string(),
            ToolMetadata {
                plugin_id: "beta".to_string(),
                tool_id: "detect".to_string(),
                input_types: vec!["video".to_string()],
                output_types: vec!["detections".to_string()],
                capabilities: vec![],
            },
        );
        let diagnostics = pipeline.validate_types(&metadata);
        assert_eq!(diagnostics.len(), 1);
    }
}
