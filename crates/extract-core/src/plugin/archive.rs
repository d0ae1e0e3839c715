use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::EmailSettings;
use crate::notify::Mailer;

use super::fields::fill_path;
use super::{ParamKind, ParamSpec, TaskProcessor, TaskRequest, TaskResult};

/// Copies the output folder to an archive location built from request fields.
pub struct ArchivePlugin;

impl TaskProcessor for ArchivePlugin {
    fn code(&self) -> &'static str {
        "ARCHIVE"
    }

    fn label(&self) -> &'static str {
        "Archive"
    }

    fn description(&self) -> &'static str {
        "Copies the produced files to an archive folder"
    }

    fn help(&self) -> &'static str {
        "The path may contain {ORDERLABEL}, {ORDERGUID}, {PRODUCTLABEL}, {PRODUCTGUID}, {CLIENT}, \
         {CLIENTGUID}, {ORGANISM}, {ORGANISMGUID}, {TIERS}, {TIERSGUID} and {STARTDATE}."
    }

    fn picto_class(&self) -> &'static str {
        "fa-archive"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("path", "Archive path", ParamKind::Text, true).max_length(255)]
    }

    fn execute(
        &self,
        request: &TaskRequest,
        params: &BTreeMap<String, String>,
        _email: &EmailSettings,
        _mailer: &dyn Mailer,
    ) -> TaskResult {
        let Some(template) = params.get("path").filter(|p| !p.trim().is_empty()) else {
            return TaskResult::error("The archive path is not defined", "-1");
        };
        let dest = PathBuf::from(fill_path(template, &request.request));

        let Some(src) = request.output_dir.as_ref().filter(|d| d.is_dir()) else {
            return TaskResult::error("The source folder does not exist", "-1");
        };

        tracing::debug!(src = %src.display(), dest = %dest.display(), "archiving output");
        match crate::io::copy_dir_contents(src, &dest) {
            Ok(count) => TaskResult::success(format!(
                "{count} file(s) archived to {}",
                dest.display()
            )),
            Err(e) => TaskResult::error(format!("Archiving failed: {e}"), "-1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryMailer;
    use crate::plugin::tests::{params, sample_request};
    use crate::plugin::TaskStatus;
    use tempfile::TempDir;

    #[test]
    fn copies_output_to_templated_path() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("req/output");
        std::fs::create_dir_all(out.join("shp")).unwrap();
        std::fs::write(out.join("plan.pdf"), b"%PDF").unwrap();
        std::fs::write(out.join("shp/parcels.shp"), b"shp").unwrap();

        let mut req = sample_request();
        req.output_dir = Some(out);
        let template = format!("{}/archive/{{ORGANISM}}/{{ORDERLABEL}}", dir.path().display());

        let result = ArchivePlugin.execute(
            &req,
            &params(&[("path", &template)]),
            &EmailSettings::default(),
            &MemoryMailer::new(),
        );
        assert_eq!(result.status, TaskStatus::Success, "{}", result.message);

        let dest = dir.path().join("archive/Commune_d'Yverdon/ORD-42");
        assert!(dest.join("plan.pdf").is_file());
        assert!(dest.join("shp/parcels.shp").is_file());
    }

    #[test]
    fn missing_source_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut req = sample_request();
        req.output_dir = Some(dir.path().join("nope"));
        let result = ArchivePlugin.execute(
            &req,
            &params(&[("path", "/tmp/archive")]),
            &EmailSettings::default(),
            &MemoryMailer::new(),
        );
        assert_eq!(result.status, TaskStatus::Error);
        assert!(result.message.contains("source folder"));
    }
}
