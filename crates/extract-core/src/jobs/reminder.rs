use chrono::{DateTime, Duration, Utc};

use super::JobContext;
use crate::error::Result;
use crate::request::Request;
use crate::types::RequestStatus;

/// Remind operators of requests left in standby. Returns the number of reminders sent.
pub fn run_reminders(ctx: &JobContext, now: DateTime<Utc>) -> Result<usize> {
    let days = ctx.config.standby_reminder_days;
    if days == 0 {
        return Ok(0);
    }
    let limit = Duration::days(i64::from(days));

    let mut sent = 0;
    for mut request in Request::list_by_status(&ctx.root, RequestStatus::Standby)? {
        let due = request
            .last_reminder
            .map_or(true, |last| now - last >= limit);
        if !due {
            continue;
        }
        match ctx.notifier.standby_reminder(&request) {
            Ok(true) => {
                request.last_reminder = Some(now);
                request.save(&ctx.root)?;
                sent += 1;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(request = request.id, error = %e, "reminder not sent"),
        }
    }
    if sent > 0 {
        tracing::info!(count = sent, "standby reminders sent");
    }
    Ok(sent)
}
