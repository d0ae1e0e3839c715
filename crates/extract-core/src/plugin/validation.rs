use std::collections::BTreeMap;

use crate::config::EmailSettings;
use crate::notify::Mailer;

use super::{ParamKind, ParamSpec, TaskProcessor, TaskRequest, TaskResult};

/// Holds the request until an operator validates or rejects it.
pub struct ValidationPlugin;

impl TaskProcessor for ValidationPlugin {
    fn code(&self) -> &'static str {
        "VALIDATION"
    }

    fn label(&self) -> &'static str {
        "Operator validation"
    }

    fn description(&self) -> &'static str {
        "Puts the request in standby until an operator validates it"
    }

    fn help(&self) -> &'static str {
        "The listed message templates are offered to the operator when validating or rejecting."
    }

    fn picto_class(&self) -> &'static str {
        "fa-check-square-o"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("valid_msgs", "Validation messages", ParamKind::Remarks, false),
            ParamSpec::new("reject_msgs", "Rejection messages", ParamKind::Remarks, false),
        ]
    }

    fn execute(
        &self,
        _request: &TaskRequest,
        _params: &BTreeMap<String, String>,
        _email: &EmailSettings,
        _mailer: &dyn Mailer,
    ) -> TaskResult {
        TaskResult::standby("Waiting for an operator to validate the request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryMailer;
    use crate::plugin::tests::sample_request;
    use crate::plugin::TaskStatus;

    #[test]
    fn always_waits_for_an_operator() {
        let result = ValidationPlugin.execute(
            &sample_request(),
            &BTreeMap::new(),
            &EmailSettings::default(),
            &MemoryMailer::new(),
        );
        assert_eq!(result.status, TaskStatus::Standby);
        assert!(result.request_data.is_none());
    }
}
