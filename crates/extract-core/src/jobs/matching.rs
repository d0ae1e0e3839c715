use serde::Serialize;
use uuid::Uuid;

use super::JobContext;
use crate::connector::Connector;
use crate::error::Result;
use crate::history::SYSTEM_USER;
use crate::matching::match_rules;
use crate::paths::{INPUT_FOLDER, OUTPUT_FOLDER};
use crate::request::Request;
use crate::state::State;
use crate::types::RequestStatus;

#[derive(Debug, Default, Serialize)]
pub struct MatchingOutcome {
    pub matched: usize,
    pub unmatched: usize,
}

/// Route every imported request to the process of the first matching rule.
pub fn run_matching(ctx: &JobContext) -> Result<MatchingOutcome> {
    let mut outcome = MatchingOutcome::default();
    for mut request in Request::list_by_status(&ctx.root, RequestStatus::Imported)? {
        let connector = match Connector::load(&ctx.root, request.connector_id) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(request = request.id, error = %e, "request left unmatched");
                continue;
            }
        };

        match match_rules(&request, &connector.rules) {
            Some(rule) => {
                let folder = Uuid::new_v4().to_string();
                let input = format!("{folder}/{INPUT_FOLDER}");
                let output = format!("{folder}/{OUTPUT_FOLDER}");
                crate::io::ensure_dir(&ctx.data_root.join(&input))?;
                crate::io::ensure_dir(&ctx.data_root.join(&output))?;

                request.folder_in = Some(input);
                request.folder_out = Some(output);
                request.process_id = Some(rule.process_id);
                request.status = RequestStatus::Ongoing;
                request.tasknum = Some(1);
                request.save(&ctx.root)?;
                outcome.matched += 1;
                tracing::info!(request = request.id, rule = rule.id, process = rule.process_id, "request matched");
            }
            None => {
                request.status = RequestStatus::Unmatched;
                request.save(&ctx.root)?;
                outcome.unmatched += 1;
                tracing::info!(request = request.id, "no rule matched");
                if let Err(e) = ctx.notifier.unmatched(&request, &connector.name) {
                    tracing::warn!(request = request.id, error = %e, "could not notify administrators");
                }
            }
        }
        State::log_event(&ctx.root, Some(request.id), "match", SYSTEM_USER, request.status.as_str())?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Harness, PRODUCT};
    use super::super::run_import;
    use super::*;

    #[test]
    fn matched_request_gets_folders_and_process() {
        let h = Harness::new();
        let process = h.process(&[("VALIDATION", &[])]);
        let mut connector = h.folder_connector();
        connector
            .add_rule(h.root(), "client == 'nobody'", process.id, true)
            .unwrap();
        connector
            .add_rule(h.root(), "perimeter intersects POINT(5 5)", process.id, true)
            .unwrap();
        connector.save(h.root()).unwrap();
        h.drop_product("a.json", PRODUCT);
        run_import(&h.ctx, connector.id).unwrap();

        let outcome = run_matching(&h.ctx).unwrap();
        assert_eq!(outcome.matched, 1);

        let request = &Request::list(h.root()).unwrap()[0];
        assert_eq!(request.status, RequestStatus::Ongoing);
        assert_eq!(request.process_id, Some(process.id));
        assert_eq!(request.tasknum, Some(1));
        assert!(request.input_dir(&h.ctx.data_root).unwrap().is_dir());
        assert!(request.output_dir(&h.ctx.data_root).unwrap().is_dir());
    }

    #[test]
    fn no_rule_leaves_request_unmatched_and_tells_admins() {
        let h = Harness::new();
        let connector = h.folder_connector();
        h.drop_product("a.json", PRODUCT);
        run_import(&h.ctx, connector.id).unwrap();

        let outcome = run_matching(&h.ctx).unwrap();
        assert_eq!(outcome.unmatched, 1);
        let request = &Request::list(h.root()).unwrap()[0];
        assert_eq!(request.status, RequestStatus::Unmatched);
        assert!(request.folder_out.is_none());
        assert_eq!(h.recipients(), vec![vec!["admin@example.ch".to_string()]]);
    }
}
