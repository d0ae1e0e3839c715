use std::collections::BTreeMap;

use crate::config::EmailSettings;
use crate::notify::Mailer;

use super::{param_flag, ParamKind, ParamSpec, TaskProcessor, TaskRequest, TaskResult};

/// Sets or appends a remark addressed to the customer.
pub struct RemarkPlugin;

impl TaskProcessor for RemarkPlugin {
    fn code(&self) -> &'static str {
        "REMARK"
    }

    fn label(&self) -> &'static str {
        "Remark"
    }

    fn description(&self) -> &'static str {
        "Adds a predefined remark to the request"
    }

    fn help(&self) -> &'static str {
        "The remark is appended to the existing one on a new line, unless overwrite is checked."
    }

    fn picto_class(&self) -> &'static str {
        "fa-comment-o"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("remark", "Remark", ParamKind::Multitext, true).max_length(4000),
            ParamSpec::new("overwrite", "Overwrite the existing remark", ParamKind::Boolean, false),
        ]
    }

    fn execute(
        &self,
        request: &TaskRequest,
        params: &BTreeMap<String, String>,
        _email: &EmailSettings,
        _mailer: &dyn Mailer,
    ) -> TaskResult {
        let new_remark = params.get("remark").map(String::as_str).unwrap_or_default();
        let current = &request.request.remark;
        let remark = if param_flag(params, "overwrite") || current.is_empty() {
            new_remark.to_string()
        } else {
            format!("{current}\r\n{new_remark}")
        };
        TaskResult::success("Remark added").with_request_data(remark, request.request.rejected)
    }
}
