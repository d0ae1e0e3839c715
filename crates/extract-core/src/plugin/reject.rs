use std::collections::BTreeMap;

use crate::config::EmailSettings;
use crate::notify::Mailer;

use super::{ParamKind, ParamSpec, TaskProcessor, TaskRequest, TaskResult};

/// Cancels the request with a remark explaining why.
pub struct RejectPlugin;

impl TaskProcessor for RejectPlugin {
    fn code(&self) -> &'static str {
        "REJECT"
    }

    fn label(&self) -> &'static str {
        "Reject"
    }

    fn description(&self) -> &'static str {
        "Rejects the request and skips the remaining tasks"
    }

    fn help(&self) -> &'static str {
        "The remark is mandatory and is sent to the customer with the rejection."
    }

    fn picto_class(&self) -> &'static str {
        "fa-ban"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("remark", "Remark", ParamKind::Multitext, true).max_length(4000)]
    }

    fn execute(
        &self,
        _request: &TaskRequest,
        params: &BTreeMap<String, String>,
        _email: &EmailSettings,
        _mailer: &dyn Mailer,
    ) -> TaskResult {
        match params.get("remark").filter(|r| !r.trim().is_empty()) {
            Some(remark) => TaskResult::success("Request rejected").with_request_data(remark.clone(), true),
            None => TaskResult::error("No rejection remark is defined", "-1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryMailer;
    use crate::plugin::tests::{params, sample_request};
    use crate::plugin::TaskStatus;

    #[test]
    fn rejects_with_remark() {
        let result = RejectPlugin.execute(
            &sample_request(),
            &params(&[("remark", "Hors canton")]),
            &EmailSettings::default(),
            &MemoryMailer::new(),
        );
        assert_eq!(result.status, TaskStatus::Success);
        let data = result.request_data.unwrap();
        assert!(data.rejected);
        assert_eq!(data.remark, "Hors canton");
    }

    #[test]
    fn blank_remark_is_an_error() {
        let result = RejectPlugin.execute(
            &sample_request(),
            &params(&[("remark", "  ")]),
            &EmailSettings::default(),
            &MemoryMailer::new(),
        );
        assert_eq!(result.status, TaskStatus::Error);
        assert_eq!(result.error_code, "-1");
        assert!(result.request_data.is_none());
    }
}
