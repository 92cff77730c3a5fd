//! Enforces that `PluginHandler::run_tool` is invoked from exactly one
//! call site in the entire workspace: `ToolRunner::execute`. Any other
//! `.run_tool(` call, in either crate's source tree, is a bug — a layer
//! has reached past the execution chain straight to a plugin handler.

use std::fs;
use std::path::{Path, PathBuf};

fn collect_rust_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name == "target" {
                continue;
            }
            collect_rust_files(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

#[test]
fn run_tool_is_called_from_exactly_one_non_test_site() {
    let workspace_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("forgesyte-core has a workspace parent");

    let mut files = Vec::new();
    collect_rust_files(&workspace_root.join("forgesyte-core").join("src"), &mut files);
    collect_rust_files(&workspace_root.join("forgesyte-server").join("src"), &mut files);

    let mut call_sites = Vec::new();
    for file in &files {
        let contents = fs::read_to_string(file).unwrap();
        for (line_number, line) in contents.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            if line.contains(".run_tool(") {
                call_sites.push(format!("{}:{}", file.display(), line_number + 1));
            }
        }
    }

    let non_definition_sites: Vec<&String> = call_sites
        .iter()
        .filter(|site| !site.contains("execution/tool_runner.rs"))
        .collect();

    assert_eq!(
        non_definition_sites.len(),
        0,
        "run_tool must only be called from ToolRunner::execute, found additional call sites: {non_definition_sites:?}"
    );
}
