use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::EmailSettings;
use crate::notify::{Email, Mailer};

use super::fields::fill_text;
use super::{ParamKind, ParamSpec, TaskProcessor, TaskRequest, TaskResult};

static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();

fn address_re() -> &'static Regex {
    ADDRESS_RE.get_or_init(|| {
        Regex::new(r"^[^@\s,;]+@[^@\s,;]+\.[A-Za-z]{2,}$").expect("address pattern is valid")
    })
}

fn is_valid_address(address: &str) -> bool {
    address_re().is_match(address)
}

/// Split a `,`/`;` separated list and keep the well-formed addresses.
pub fn parse_addresses(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|a| {
            let ok = is_valid_address(a);
            if !ok && !a.is_empty() {
                tracing::warn!(address = a, "invalid e-mail address dropped");
            }
            ok
        })
        .map(str::to_string)
        .collect()
}

/// Sends a notification built from request fields.
pub struct EmailPlugin;

impl TaskProcessor for EmailPlugin {
    fn code(&self) -> &'static str {
        "EMAIL"
    }

    fn label(&self) -> &'static str {
        "E-mail notification"
    }

    fn description(&self) -> &'static str {
        "Sends an e-mail to the given addresses"
    }

    fn help(&self) -> &'static str {
        "Subject and body may contain request fields such as {orderLabel} or {client}, and \
         parameters as {parameters.KEY}."
    }

    fn picto_class(&self) -> &'static str {
        "fa-envelope-o"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("to", "Recipients", ParamKind::Email, true).max_length(5000),
            ParamSpec::new("subject", "Subject", ParamKind::Text, true).max_length(1000),
            ParamSpec::new("body", "Body", ParamKind::Multitext, true).max_length(5000),
        ]
    }

    fn execute(
        &self,
        request: &TaskRequest,
        params: &BTreeMap<String, String>,
        email: &EmailSettings,
        mailer: &dyn Mailer,
    ) -> TaskResult {
        if !email.enabled {
            tracing::warn!(request = request.request.id, "e-mail notifications are off");
            return TaskResult::success("Notifications are off, no e-mail sent");
        }

        let to = parse_addresses(params.get("to").map(String::as_str).unwrap_or_default());
        if to.is_empty() {
            return TaskResult::error("No valid recipient address", "-1");
        }

        let subject = fill_text(params.get("subject").map(String::as_str).unwrap_or_default(), &request.request);
        let body = fill_text(params.get("body").map(String::as_str).unwrap_or_default(), &request.request);
        let message = Email::new(email, to.clone(), &subject, &body);

        match mailer.send(&message) {
            Ok(()) => TaskResult::success(format!("E-mail sent to {} recipient(s)", to.len())),
            Err(e) => TaskResult::error(format!("The e-mail could not be sent: {e}"), "-1"),
        }
    }
}
