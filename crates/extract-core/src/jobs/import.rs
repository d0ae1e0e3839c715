use serde::Serialize;

use super::JobContext;
use crate::connector::Connector;
use crate::error::{ExtractError, Result};
use crate::history::{HistoryRecord, SYSTEM_USER};
use crate::request::Request;
use crate::state::State;
use crate::types::{HistoryStatus, RequestStatus};

pub const IMPORT_LABEL: &str = "Import";
const NO_GEOMETRY: &str = "The imported product has no geographic perimeter";

#[derive(Debug, Default, Serialize)]
pub struct ImportOutcome {
    pub connector_id: u64,
    /// Requests created, including the ones without perimeter.
    pub imported: usize,
    pub invalid: usize,
    /// Set when the connector could not fetch its products.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetch the products of one connector and store them as requests.
pub fn run_import(ctx: &JobContext, connector_id: u64) -> Result<ImportOutcome> {
    let mut connector = Connector::load(&ctx.root, connector_id)?;
    let plugin = ctx
        .connectors
        .get(&connector.code)
        .ok_or_else(|| ExtractError::PluginNotFound(connector.code.clone()))?;

    let mut outcome = ImportOutcome {
        connector_id,
        ..Default::default()
    };

    let products = match plugin.import_commands(&connector.parameters) {
        Ok(products) => products,
        Err(message) => {
            let notify = connector.record_import_failure(&message);
            connector.save(&ctx.root)?;
            tracing::warn!(connector = connector_id, error = %message, "import failed");
            if notify {
                if let Err(e) = ctx.notifier.import_failed(&connector, &message) {
                    tracing::warn!(connector = connector_id, error = %e, "could not notify administrators");
                }
            }
            outcome.error = Some(message);
            return Ok(outcome);
        }
    };

    connector.record_import_success();
    connector.save(&ctx.root)?;

    for product in &products {
        let request = Request::create(&ctx.root, Request::from_product(connector_id, product))?;
        let mut record = HistoryRecord::new(
            request.id,
            1,
            0,
            IMPORT_LABEL,
            HistoryStatus::Ongoing,
            SYSTEM_USER,
        );
        if request.status == RequestStatus::ImportFail {
            record.set_to_error(NO_GEOMETRY)?;
            outcome.invalid += 1;
        } else {
            record.finish(SYSTEM_USER);
        }
        ctx.history.update(&record)?;
        outcome.imported += 1;

        State::log_event(&ctx.root, Some(request.id), "import", SYSTEM_USER, request.status.as_str())?;
        if request.status == RequestStatus::ImportFail {
            if let Err(e) = ctx.notifier.invalid_product(&request, &connector.name) {
                tracing::warn!(request = request.id, error = %e, "could not notify administrators");
            }
        }
    }

    if outcome.imported > 0 {
        tracing::info!(
            connector = connector_id,
            imported = outcome.imported,
            invalid = outcome.invalid,
            "products imported"
        );
    }
    Ok(outcome)
}

/// Import every active connector once.
pub fn run_imports(ctx: &JobContext) -> Result<Vec<ImportOutcome>> {
    let mut outcomes = Vec::new();
    for connector in Connector::list(&ctx.root)?.into_iter().filter(|c| c.active) {
        match run_import(ctx, connector.id) {
            Ok(o) => outcomes.push(o),
            Err(e) => {
                tracing::warn!(connector = connector.id, error = %e, "import skipped");
                outcomes.push(ImportOutcome {
                    connector_id: connector.id,
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Harness, PRODUCT};
    use super::*;

    #[test]
    fn products_become_requests_with_import_history() {
        let h = Harness::new();
        let connector = h.folder_connector();
        h.drop_product("a.json", PRODUCT);
        h.drop_product("b.json", r#"{"order_label": "NO-GEOM"}"#);

        let outcome = run_import(&h.ctx, connector.id).unwrap();
        assert_eq!(outcome.imported, 2);
        assert_eq!(outcome.invalid, 1);

        let requests = Request::list(h.root()).unwrap();
        assert_eq!(requests[0].status, RequestStatus::Imported);
        assert_eq!(requests[1].status, RequestStatus::ImportFail);

        let ok = h.ctx.history.for_request(requests[0].id).unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!((ok[0].step, ok[0].process_step), (1, 0));
        assert_eq!(ok[0].status, HistoryStatus::Finished);

        let failed = h.ctx.history.last_for(requests[1].id).unwrap().unwrap();
        assert_eq!(failed.status, HistoryStatus::Error);

        // Only the admin hears about the invalid product.
        assert_eq!(h.recipients(), vec![vec!["admin@example.ch".to_string()]]);

        let reloaded = Connector::load(h.root(), connector.id).unwrap();
        assert!(reloaded.last_import_date.is_some());
        assert!(!reloaded.is_in_error());
    }

    #[test]
    fn failing_connector_notifies_after_retries() {
        let h = Harness::new();
        let mut connector = h.folder_connector();
        connector.maximum_retries = 1;
        connector
            .parameters
            .insert("inbox".into(), h.root().join("missing").display().to_string());
        connector.save(h.root()).unwrap();

        let first = run_import(&h.ctx, connector.id).unwrap();
        assert!(first.error.is_some());
        assert!(h.mailer.sent().is_empty());

        run_import(&h.ctx, connector.id).unwrap();
        assert_eq!(h.mailer.sent().len(), 1);
        assert!(Connector::load(h.root(), connector.id).unwrap().is_in_error());

        // Same error again: no new mail.
        run_import(&h.ctx, connector.id).unwrap();
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[test]
    fn unknown_connector_plugin_is_an_error() {
        let h = Harness::new();
        let c = Connector::create(h.root(), Connector::new("EASYSDI", "Remote")).unwrap();
        assert!(matches!(
            run_import(&h.ctx, c.id),
            Err(ExtractError::PluginNotFound(_))
        ));
        let all = run_imports(&h.ctx).unwrap();
        assert!(all[0].error.is_some());
    }
}
