//! `FOLDER` connector: products are JSON files dropped in an inbox folder,
//! results are written to an outbox folder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::plugin::{ConnectorPlugin, ExportRequest, ExportResult, Product};
use crate::plugin::{ParamKind, ParamSpec};

pub const IMPORTED_FOLDER: &str = "imported";
pub const RESULT_FILE: &str = "result.json";

/// A product file holds one product or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProductFile {
    Many(Vec<Product>),
    One(Box<Product>),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportManifest {
    pub request_id: u64,
    pub order_guid: String,
    pub product_guid: String,
    pub status: String,
    pub remark: String,
    pub rejected: bool,
    pub files: Vec<String>,
}

pub struct FolderConnector;

fn required_dir(params: &BTreeMap<String, String>, key: &str) -> Result<PathBuf, String> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| format!("The '{key}' parameter is not defined"))
}

fn read_inbox(inbox: &Path) -> Result<Vec<(PathBuf, Vec<Product>)>, String> {
    let entries = std::fs::read_dir(inbox)
        .map_err(|e| format!("Cannot read inbox {}: {e}", inbox.display()))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();

    let mut parsed = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = std::fs::read_to_string(&path).map_err(|e| format!("{name}: {e}"))?;
        let products = match serde_json::from_str::<ProductFile>(&data)
            .map_err(|e| format!("Invalid product file {name}: {e}"))?
        {
            ProductFile::Many(list) => list,
            ProductFile::One(p) => vec![*p],
        };
        parsed.push((path, products));
    }
    Ok(parsed)
}

impl ConnectorPlugin for FolderConnector {
    fn code(&self) -> &'static str {
        "FOLDER"
    }

    fn label(&self) -> &'static str {
        "Local folder"
    }

    fn description(&self) -> &'static str {
        "Imports JSON product files from a folder and writes results to another one"
    }

    fn help(&self) -> &'static str {
        "Each .json file in the inbox holds a product or a list of products. Imported files \
         are moved to the 'imported' subfolder. Results are written to \
         <outbox>/<order guid>-<product guid>/."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("inbox", "Inbox folder", ParamKind::Text, true).max_length(255),
            ParamSpec::new("outbox", "Outbox folder", ParamKind::Text, true).max_length(255),
        ]
    }

    fn import_commands(&self, params: &BTreeMap<String, String>) -> Result<Vec<Product>, String> {
        let inbox = required_dir(params, "inbox")?;
        let parsed = read_inbox(&inbox)?;
        if parsed.is_empty() {
            return Ok(Vec::new());
        }

        let imported = inbox.join(IMPORTED_FOLDER);
        std::fs::create_dir_all(&imported)
            .map_err(|e| format!("Cannot create {}: {e}", imported.display()))?;

        let mut products = Vec::new();
        for (path, batch) in parsed {
            if let Some(name) = path.file_name() {
                std::fs::rename(&path, imported.join(name))
                    .map_err(|e| format!("Cannot move {}: {e}", path.display()))?;
            }
            tracing::debug!(file = %path.display(), count = batch.len(), "product file imported");
            products.extend(batch);
        }
        Ok(products)
    }

    fn export_result(&self, params: &BTreeMap<String, String>, request: &ExportRequest) -> ExportResult {
        let outbox = match required_dir(params, "outbox") {
            Ok(dir) => dir,
            Err(e) => return ExportResult::failed("Export failed", e),
        };
        let target = outbox.join(format!("{}-{}", request.order_guid, request.product_guid));

        let mut files = Vec::new();
        if let Some(src) = request.output_dir.as_ref().filter(|d| d.is_dir()) {
            if let Err(e) = crate::io::copy_dir_contents(src, &target) {
                return ExportResult::failed("Could not copy the output files", e.to_string());
            }
            match crate::io::list_files(src) {
                Ok(list) => files = list.iter().map(|p| p.to_string_lossy().into_owned()).collect(),
                Err(e) => return ExportResult::failed("Could not list the output files", e.to_string()),
            }
        }

        let manifest = ExportManifest {
            request_id: request.request_id,
            order_guid: request.order_guid.clone(),
            product_guid: request.product_guid.clone(),
            status: if request.rejected { "rejected" } else { "processed" }.to_string(),
            remark: request.remark.clone(),
            rejected: request.rejected,
            files,
        };
        let written = serde_json::to_vec_pretty(&manifest)
            .map_err(crate::error::ExtractError::from)
            .and_then(|data| crate::io::atomic_write(&target.join(RESULT_FILE), &data));
        match written {
            Ok(()) => ExportResult::ok(format!("Result written to {}", target.display())),
            Err(e) => ExportResult::failed("Could not write the result", e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(dir: &Path) -> BTreeMap<String, String> {
        let mut p = BTreeMap::new();
        p.insert("inbox".into(), dir.join("in").display().to_string());
        p.insert("outbox".into(), dir.join("out").display().to_string());
        p
    }

    #[test]
    fn imports_single_and_list_files_then_moves_them() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("in");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(
            inbox.join("a.json"),
            r#"{"order_label":"A","perimeter":"POINT(0 0)"}"#,
        )
        .unwrap();
        std::fs::write(
            inbox.join("b.json"),
            r#"[{"order_label":"B1"},{"order_label":"B2"}]"#,
        )
        .unwrap();
        std::fs::write(inbox.join("notes.txt"), "ignored").unwrap();

        let products = FolderConnector.import_commands(&params(dir.path())).unwrap();
        let labels: Vec<&str> = products.iter().map(|p| p.order_label.as_str()).collect();
        assert_eq!(labels, vec!["A", "B1", "B2"]);
        assert!(inbox.join("imported/a.json").is_file());
        assert!(!inbox.join("a.json").exists());
        assert!(inbox.join("notes.txt").exists());

        // Nothing left to import.
        assert!(FolderConnector.import_commands(&params(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn malformed_file_fails_whole_import() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("in");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("a.json"), r#"{"order_label":"A"}"#).unwrap();
        std::fs::write(inbox.join("broken.json"), "{not json").unwrap();

        let err = FolderConnector.import_commands(&params(dir.path())).unwrap_err();
        assert!(err.contains("broken.json"), "{err}");
        assert!(inbox.join("a.json").exists());
    }

    #[test]
    fn missing_inbox_parameter() {
        let err = FolderConnector.import_commands(&BTreeMap::new()).unwrap_err();
        assert!(err.contains("inbox"));
    }

    #[test]
    fn export_copies_files_and_writes_manifest() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("data/u1/output");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("plan.pdf"), b"pdf").unwrap();

        let request = ExportRequest {
            request_id: 7,
            order_label: "ORD".into(),
            order_guid: "o1".into(),
            product_label: "Plan".into(),
            product_guid: "p1".into(),
            remark: "Voir annexe".into(),
            rejected: false,
            output_dir: Some(output),
            external_url: None,
            parameters: serde_json::json!({}),
        };
        let result = FolderConnector.export_result(&params(dir.path()), &request);
        assert!(result.success, "{result:?}");

        let target = dir.path().join("out/o1-p1");
        assert!(target.join("plan.pdf").is_file());
        let manifest: ExportManifest =
            serde_json::from_str(&std::fs::read_to_string(target.join(RESULT_FILE)).unwrap())
                .unwrap();
        assert_eq!(manifest.request_id, 7);
        assert_eq!(manifest.status, "processed");
        assert_eq!(manifest.files, vec!["plan.pdf"]);
    }

    #[test]
    fn export_rejected_without_output() {
        let dir = TempDir::new().unwrap();
        let request = ExportRequest {
            request_id: 8,
            order_label: String::new(),
            order_guid: "o2".into(),
            product_label: String::new(),
            product_guid: "p2".into(),
            remark: "Hors périmètre".into(),
            rejected: true,
            output_dir: None,
            external_url: None,
            parameters: serde_json::json!({}),
        };
        let result = FolderConnector.export_result(&params(dir.path()), &request);
        assert!(result.success);
        let data = std::fs::read_to_string(dir.path().join("out/o2-p2").join(RESULT_FILE)).unwrap();
        assert!(data.contains("\"rejected\": true"));
    }
}
