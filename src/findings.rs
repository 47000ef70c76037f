use std::time::Duration;

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::{
    client::{graphql_errors, ApiClient},
    error::ApiError,
    pagination::{envelope_page, paginate},
};

pub const QUERY_NAME: &str = "SonraiAPIQuery";

/// Fields the UI grabs for an export.
const EXPORT_FIELDS: &str = "\
      resourceName
      severityNumeric
      title
      policy { alertingLevelNumeric }
      ticketType
      firstSeen
      lastSeen
      createdBy
      account
      assignedTo
      createdDate
      transitionedBy
      transitionDate
      lastModified
      status
      swimlanes { title }
      swimlaneSRNs
      srn";

/// Query-screen URL parameters that never become filter terms.
const NON_FILTER_KEYS: &[&str] =
    &["dateType", "startDate", "endDate", "relativeDate", "sortDirection", "sortColumn", "pageIndex"];

/// Paginated findings query; the filter travels as a first-class variable,
/// never interpolated into the query text.
fn tickets_query(export_fields: bool) -> String {
    let fields = if export_fields { EXPORT_FIELDS } else { "      srn" };
    format!(
        "query Tickets($limit: Long, $offset: Long, $where: TicketFilter, $includeRisk: Boolean) {{\n\
         \x20 Tickets(where: $where) {{\n\
         \x20   globalCount\n\
         \x20   count\n\
         \x20   items(limit: $limit, offset: $offset, includeRisk: $includeRisk) {{\n{fields}\n\
         \x20   }}\n\
         \x20 }}\n\
         }}"
    )
}

/// Build a structured where-clause from a ticket-screen URL.
///
/// Every query parameter except the date/sort/paging controls becomes an
/// `IN_LIST` term; the date controls collapse into one `BETWEEN` term keyed
/// by the `dateType` field. The result is a plain JSON value handed to the
/// API through the `$where` variable.
pub fn filter_from_screen_url(raw: &str) -> Result<Value, ApiError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ApiError::Config(format!("invalid ticket screen URL: {e}")))?;

    // Group repeated keys, preserving first-seen order.
    let mut params: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in url.query_pairs() {
        match params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value.into_owned()),
            None => params.push((key.into_owned(), vec![value.into_owned()])),
        }
    }

    let lookup = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.first())
            .cloned()
    };

    let mut filter = Map::new();

    if let Some(date_field) = lookup("dateType") {
        let (start, end) = match (lookup("startDate"), lookup("endDate")) {
            (Some(start), Some(end)) => (start, end),
            _ => match lookup("relativeDate") {
                Some(days) => {
                    let days: f64 = days.parse().map_err(|_| {
                        ApiError::Config(format!("relativeDate must be a number of days, got {days:?}"))
                    })?;
                    let now = Utc::now();
                    let start = now - ChronoDuration::seconds((days * 86_400.0) as i64);
                    (
                        start.to_rfc3339_opts(SecondsFormat::Micros, true),
                        now.to_rfc3339_opts(SecondsFormat::Micros, true),
                    )
                }
                None => {
                    return Err(ApiError::Config(
                        "date filter needs startDate+endDate or relativeDate".into(),
                    ))
                }
            },
        };
        debug!("using start date {start} and end date {end}");
        filter.insert(date_field, json!({"op": "BETWEEN", "values": [start, end]}));
    }

    for (key, values) in &params {
        if NON_FILTER_KEYS.contains(&key.as_str()) {
            continue;
        }
        filter.insert(key.clone(), json!({"op": "IN_LIST", "values": values}));
    }

    Ok(Value::Object(filter))
}

/// Fetch every finding matching the filter, page by page.
pub async fn fetch_findings(
    client: &mut ApiClient,
    where_clause: Value,
    include_risk: bool,
    export_fields: bool,
    page_size: u64,
    use_progress: bool,
) -> Result<Vec<Value>, ApiError> {
    let progress = if use_progress {
        let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed_precise}]")
            .expect("progress bar style template should compile");
        let pb = ProgressBar::new_spinner().with_style(style).with_message("Fetching findings");
        pb.enable_steady_tick(Duration::from_millis(500));
        pb
    } else {
        ProgressBar::hidden()
    };

    let query = tickets_query(export_fields);
    let variables = json!({ "where": where_clause, "includeRisk": include_risk });
    let items = paginate(client, &query, QUERY_NAME, &variables, page_size, |body| {
        envelope_page(body, "/data/Tickets")
    })
    .await;
    progress.finish_and_clear();

    let items = items?;
    info!("total number of findings from query: {}", items.len());
    Ok(items)
}

/// Pull the srn field out of fetched finding items.
pub fn srns(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.get("srn").and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// SRN of the user behind the current token.
pub async fn current_user_srn(client: &mut ApiClient) -> Result<String, ApiError> {
    let body = client
        .execute("{ SonraiCurrentUsers { items { srn } } }", json!({}), QUERY_NAME)
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    body.pointer("/data/SonraiCurrentUsers/items/0/srn")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::Malformed("current user response carried no srn".into()))
}

/// Translate an email address to a user SRN; unknown addresses are fatal
/// since there is nobody to assign to.
pub async fn user_srn_by_email(client: &mut ApiClient, email: &str) -> Result<String, ApiError> {
    let body = client
        .execute("{ SonraiUsers { count items { email srn } } }", json!({}), QUERY_NAME)
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    body.pointer("/data/SonraiUsers/items")
        .and_then(Value::as_array)
        .and_then(|users| {
            users.iter().find(|user| user.get("email").and_then(Value::as_str) == Some(email))
        })
        .and_then(|user| user.get("srn").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| ApiError::Config(format!("email address {email} not found in SonraiUsers")))
}

const COMMENT_MUTATION: &str = "\
mutation CreateTicketCommentBulk($requests: [CreateTicketCommentRequestInput]) {
  CreateTicketCommentBulk(input: {requests: $requests}) {
    results {
      ticketComment { srn }
      success
      error
    }
  }
}";

/// Add the same comment to every finding, batched.
pub async fn add_comment(
    client: &mut ApiClient,
    finding_srns: &[String],
    comment: &str,
    batch_size: usize,
) -> Result<(), ApiError> {
    let user_srn = current_user_srn(client).await?;
    debug!("comment user SRN = {user_srn}");
    let mut done = 0usize;
    for chunk in finding_srns.chunks(batch_size.max(1)) {
        let requests: Vec<Value> = chunk
            .iter()
            .map(|srn| json!({"ticketSrn": srn, "createdBy": user_srn, "body": comment}))
            .collect();
        let body = client
            .execute(COMMENT_MUTATION, json!({ "requests": requests }), QUERY_NAME)
            .await?;
        if let Some(errors) = graphql_errors(&body) {
            return Err(ApiError::GraphQl(errors));
        }
        done += chunk.len();
        debug!("added comments to findings {done} / {}", finding_srns.len());
    }
    info!("comments were added to {done} findings");
    Ok(())
}

const ASSIGN_MUTATION: &str = "\
mutation AssignTicketBulk($requests: [AssignTicketRequestInput]) {
  AssignTicketBulk(input: {requests: $requests}) {
    results {
      ticketSrn
      success
      error
    }
  }
}";

/// Assign every finding to the user behind `email`, batched.
pub async fn assign(
    client: &mut ApiClient,
    finding_srns: &[String],
    email: &str,
    batch_size: usize,
) -> Result<(), ApiError> {
    let user_srn = user_srn_by_email(client, email).await?;
    for chunk in finding_srns.chunks(batch_size.max(1)) {
        let requests: Vec<Value> =
            chunk.iter().map(|srn| json!({"ticketSrn": srn, "userSrn": user_srn})).collect();
        let body = client
            .execute(ASSIGN_MUTATION, json!({ "requests": requests }), QUERY_NAME)
            .await?;
        if let Some(errors) = graphql_errors(&body) {
            return Err(ApiError::GraphQl(errors));
        }
    }
    info!("assigned {} findings to {email} ({user_srn})", finding_srns.len());
    Ok(())
}

/// Status transitions the bulk API supports. A closed set: the mutation
/// field is chosen by match, never assembled from user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketAction {
    Close,
    Reopen,
    RiskAccept,
    Snooze,
}

impl TicketAction {
    pub fn mutation_field(&self) -> &'static str {
        match self {
            TicketAction::Close => "CloseTickets",
            TicketAction::Reopen => "ReopenTickets",
            TicketAction::RiskAccept => "AcceptRiskTickets",
            TicketAction::Snooze => "SnoozeTickets",
        }
    }
}

fn status_mutation(action: TicketAction) -> String {
    let field = action.mutation_field();
    match action {
        TicketAction::Snooze => format!(
            "mutation updateTicketStatus($srns: [String], $snoozedUntil: DateTime) {{\n\
             \x20 {field}(input: {{srns: $srns}}, snoozedUntil: $snoozedUntil) {{\n\
             \x20   successCount\n\
             \x20   failureCount\n\
             \x20 }}\n\
             }}"
        ),
        _ => format!(
            "mutation updateTicketStatus($srns: [String]) {{\n\
             \x20 {field}(input: {{srns: $srns}}) {{\n\
             \x20   successCount\n\
             \x20   failureCount\n\
             \x20 }}\n\
             }}"
        ),
    }
}

/// Date `days` days from today, for SnoozeTickets.
pub fn snooze_until(days: i64) -> String {
    let date = Utc::now().date_naive() + ChronoDuration::days(days);
    date.to_string()
}

/// Apply a status transition to every finding, batched. Returns the
/// aggregate (success, failure) counts the mutations reported.
pub async fn update_status(
    client: &mut ApiClient,
    finding_srns: &[String],
    action: TicketAction,
    snooze_days: Option<i64>,
    batch_size: usize,
) -> Result<(u64, u64), ApiError> {
    let mutation = status_mutation(action);
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    for chunk in finding_srns.chunks(batch_size.max(1)) {
        let mut variables = json!({ "srns": chunk });
        if action == TicketAction::Snooze {
            let days = snooze_days
                .ok_or_else(|| ApiError::Config("snooze requires a number of days".into()))?;
            let until = snooze_until(days);
            debug!("snooze until date set to {until}");
            variables["snoozedUntil"] = json!(until);
        }
        let body = client.execute(&mutation, variables, QUERY_NAME).await?;
        if let Some(errors) = graphql_errors(&body) {
            return Err(ApiError::GraphQl(errors));
        }
        let pointer = format!("/data/{}", action.mutation_field());
        succeeded += body
            .pointer(&format!("{pointer}/successCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        failed += body
            .pointer(&format!("{pointer}/failureCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
    }

    info!(
        "performed action {} on {} findings ({succeeded} succeeded, {failed} failed)",
        action.mutation_field(),
        finding_srns.len()
    );
    Ok((succeeded, failed))
}
