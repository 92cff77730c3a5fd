//! Loads pipeline descriptors from a directory of JSON files at startup
//! and serves lookup by id.

use std::collections::HashMap;
use std::path::Path;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::pipeline::Pipeline;

/// In-memory table of loaded pipelines. Absent lookups return `None`
/// rather than an error; callers at the API boundary translate that into
/// a "not found" response.
pub struct PipelineRegistry {
    pipelines: RwLock<HashMap<String, Pipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// Reads every `*.json` file in `dir`, parses it as a [`Pipeline`], and
    /// registers it if validation passes. Invalid descriptors are logged
    /// and skipped rather than aborting the load.
    pub async fn load_directory(&self, dir: &Path) -> std::io::Result<usize> {
        let mut loaded = 0;
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Pipeline>(&contents) {
                Ok(pipeline) => {
                    let errors = pipeline.validate();
                    if errors.is_empty() {
                        self.register(pipeline).await;
                        loaded += 1;
                    } else {
                        warn!(path = %path.display(), ?errors, "pipeline descriptor failed validation, skipping");
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "pipeline descriptor is not valid JSON"),
            }
        }
        info!(loaded, dir = %dir.display(), "pipeline registry loaded");
        Ok(loaded)
    }

    pub async fn register(&self, pipeline: Pipeline) {
        self.pipelines.write().await.insert(pipeline.id.clone(), pipeline);
    }

    pub async fn get(&self, id: &str) -> Option<Pipeline> {
        self.pipelines.read().await.get(id).cloned()
    }

    pub async fn list_ids(&self) -> Vec<String> {
        self.pipelines.read().await.keys().cloned().collect()
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Edge, Node};
    use std::io::Write;

    fn sample_pipeline(id: &str) -> Pipeline {
        Pipeline {
            id: id.to_string(),
            name: "sample".to_string(),
            nodes: vec![Node { id: "a".to_string(), plugin_id: "alpha".to_string(), tool_id: "detect".to_string() }],
            edges: vec![],
            entry_nodes: vec!["a".to_string()],
            output_nodes: vec!["a".to_string()],
        }
    }

    #[tokio::test]
    async fn register_then_get_roundtrips() {
        let registry = PipelineRegistry::new();
        registry.register(sample_pipeline("p1")).await;
        assert!(registry.get("p1").await.is_some());
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn loads_valid_descriptors_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = sample_pipeline("from-disk");
        let mut file = std::fs::File::create(dir.path().join("p1.json")).unwrap();
        file.write_all(serde_json::to_string(&pipeline).unwrap().as_bytes()).unwrap();

        let registry = PipelineRegistry::new();
        let loaded = registry.load_directory(dir.path()).await.unwrap();
        assert_eq!(loaded, 1);
        assert!(registry.get("from-disk").await.is_some());
    }

    #[tokio::test]
    async fn skips_invalid_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();

        let registry = PipelineRegistry::new();
        let loaded = registry.load_directory(dir.path()).await.unwrap();
        assert_eq!(loaded, 0);
    }
}
