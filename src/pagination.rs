use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    client::{graphql_errors, ApiClient},
    error::ApiError,
};

/// Page-level retry budget, separate from the executor's transport retries.
/// Covers transient faults a completed HTTP exchange can still produce, such
/// as a malformed partial body.
const MAX_PAGE_ATTEMPTS: u32 = 10;

/// One page extracted from a response envelope.
#[derive(Debug, Default)]
pub struct Page {
    /// Items in server order.
    pub items: Vec<Value>,
    /// Grand total across all pages, when the endpoint reports one.
    /// Endpoints that don't leave this `None` and terminate on a short page.
    pub total: Option<u64>,
}

/// Which condition ends the loop. Picked once from the first page and then
/// used consistently — mixing the two signals mid-run would be ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    /// Stop once the accumulated count reaches the reported grand total.
    GrandTotal(u64),
    /// Stop on the first page shorter than the requested page size.
    ShortPage,
}

/// Fetch every page of a list-shaped query and return the items in order.
///
/// `base_variables` must be a JSON object; `limit` and `offset` are merged
/// into it for each page, with the offset advancing by `page_size` after
/// every successful page. Items accumulate in page order; no deduplication
/// or sorting happens here.
///
/// Each page runs through [`ApiClient::execute`] with its own transport
/// retry budget; on top of that, transient page faults are retried up to
/// [`MAX_PAGE_ATTEMPTS`] times with a long backoff. Exhausting that budget
/// aborts the whole operation — partial results are discarded, not returned.
/// A GraphQL `errors` array also aborts immediately: the query itself is
/// wrong, and retrying will not fix it.
pub async fn paginate<F>(
    client: &mut ApiClient,
    query: &str,
    query_name: &str,
    base_variables: &Value,
    page_size: u64,
    extract: F,
) -> Result<Vec<Value>, ApiError>
where
    F: Fn(&Value) -> Result<Page, ApiError>,
{
    let mut items: Vec<Value> = Vec::new();
    let mut offset = 0u64;
    let mut termination: Option<Termination> = None;
    let page_retry_delay = client.config().page_retry_delay;

    loop {
        let mut variables = base_variables.clone();
        let map = variables
            .as_object_mut()
            .ok_or_else(|| ApiError::Config("pagination variables must be a JSON object".into()))?;
        map.insert("limit".into(), json!(page_size));
        map.insert("offset".into(), json!(offset));
        debug!("querying {page_size} results, offset: {offset}");

        let mut attempt = 0u32;
        let page = loop {
            attempt += 1;
            match fetch_page(client, query, query_name, &variables, &extract).await {
                Ok(page) => break page,
                Err(err @ (ApiError::Malformed(_) | ApiError::MaxRetries { .. })) => {
                    if attempt >= MAX_PAGE_ATTEMPTS {
                        return Err(ApiError::MaxRetries {
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    warn!("page fetch failed ({err}), waiting {page_retry_delay:?} then retrying ({attempt})");
                    sleep(page_retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        let fetched = page.items.len() as u64;
        if termination.is_none() {
            termination = Some(match page.total {
                Some(total) => Termination::GrandTotal(total),
                None => Termination::ShortPage,
            });
        }
        items.extend(page.items);
        debug!("accumulated {} items", items.len());

        let done = match termination {
            Some(Termination::GrandTotal(total)) => items.len() as u64 >= total || fetched == 0,
            Some(Termination::ShortPage) | None => fetched < page_size,
        };
        if done {
            break;
        }
        offset += page_size;
    }

    Ok(items)
}

async fn fetch_page<F>(
    client: &mut ApiClient,
    query: &str,
    query_name: &str,
    variables: &Value,
    extract: &F,
) -> Result<Page, ApiError>
where
    F: Fn(&Value) -> Result<Page, ApiError>,
{
    let body = client.execute(query, variables.clone(), query_name).await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    extract(&body)
}

/// Extract a `{ count, globalCount, items }` envelope found at `pointer`
/// (a JSON pointer such as `/data/Tickets`). The shared shape of the
/// list-returning endpoints this tool collection talks to.
pub fn envelope_page(body: &Value, pointer: &str) -> Result<Page, ApiError> {
    let envelope = body
        .pointer(pointer)
        .ok_or_else(|| ApiError::Malformed(format!("response carried no {pointer} envelope")))?;
    let items = envelope
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::Malformed(format!("{pointer} envelope carried no items array")))?
        .clone();
    let total = envelope.get("globalCount").and_then(Value::as_u64);
    Ok(Page { items, total })
}
