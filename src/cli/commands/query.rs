use std::{fs, io::Write, path::PathBuf};

use clap::{Args, ValueHint};
use serde_json::Value;
use tracing::info;

use crate::{
    cli::{commands::output::OutputArgs, GlobalArgs},
    client::graphql_errors,
    error::ApiError,
    pagination::{paginate, Page},
    reporter,
};

/// Default query when no file is given: the 200 highest-severity findings.
const DEFAULT_QUERY: &str = "\
query SonraiAPITicketsDefaultQuery {
  Tickets {
    items(limit: 200) {
      srn
      createdDate
      resourceName
      policy { title }
      severityNumeric
      severityCategory
    }
  }
}";

/// `sonraictl query`
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// File containing the GraphQL query to execute
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// JSON object passed as the GraphQL query variables
    #[arg(long, short = 'V', value_name = "VARS", default_value = "{}")]
    pub vars: String,

    /// query-name tag sent for server-side observability
    #[arg(long, short = 'n', value_name = "NAME", default_value = "DefaultAPIQuery")]
    pub name: String,

    /// Print only the first items array, one JSON object per line
    #[arg(long, short = 'l')]
    pub items_only: bool,

    /// Fetch all pages with this page size; the query must declare
    /// $limit and $offset variables
    #[arg(long, value_name = "PAGE_SIZE")]
    pub paginate: Option<u64>,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub async fn run(args: &QueryArgs, global: &GlobalArgs) -> Result<(), ApiError> {
    // Validate the variables before any network activity.
    let variables: Value = serde_json::from_str(&args.vars).map_err(|_| {
        ApiError::Config(format!(
            "argument passed to --vars is not valid JSON; \
             valid JSON on the command line looks like '{{\"key\": \"value\"}}'"
        ))
    })?;
    if !variables.is_object() {
        return Err(ApiError::Config("--vars must be a JSON object".into()));
    }

    let query = match &args.file {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("unable to read query file {}: {e}", path.display())))?
            .trim()
            .to_string(),
        None => DEFAULT_QUERY.to_string(),
    };

    let mut client = super::build_client(global)?;
    info!("using query name {}", args.name);

    let writer = args.output.get_writer()?;
    if let Some(page_size) = args.paginate {
        let items =
            paginate(&mut client, &query, &args.name, &variables, page_size, first_envelope_page)
                .await?;
        return reporter::write_items(writer, args.output.format, &items)
            .map_err(|e| ApiError::Malformed(e.to_string()));
    }

    let body = client.execute(&query, variables, &args.name).await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }

    if args.items_only {
        let items = first_items_array(&body)
            .ok_or_else(|| ApiError::Malformed("response carried no items array".into()))?;
        write_jsonl(writer, items)?;
    } else {
        write_body(writer, &args.output, &body)?;
    }
    Ok(())
}

/// Extract the first `{ count?/globalCount?, items }` envelope under `data`.
/// Endpoints disagree on naming: `globalCount` is a grand total where
/// present, and bare `count` is the grand total on the search endpoints
/// that paginate this way.
fn first_envelope_page(body: &Value) -> Result<Page, ApiError> {
    let envelope = body
        .get("data")
        .and_then(Value::as_object)
        .and_then(|data| data.values().find(|v| v.get("items").is_some()))
        .ok_or_else(|| ApiError::Malformed("response carried no paginated envelope".into()))?;
    let items = envelope
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ApiError::Malformed("envelope items was not an array".into()))?;
    let total = envelope
        .get("globalCount")
        .or_else(|| envelope.get("count"))
        .and_then(Value::as_u64);
    Ok(Page { items, total })
}

/// Depth-first search for the first `items` array anywhere under `data`.
fn first_items_array(body: &Value) -> Option<&Vec<Value>> {
    fn walk(value: &Value) -> Option<&Vec<Value>> {
        let map = value.as_object()?;
        if let Some(items) = map.get("items").and_then(Value::as_array) {
            return Some(items);
        }
        map.values().find_map(walk)
    }
    walk(body.get("data")?)
}

fn write_jsonl(mut writer: Box<dyn std::io::Write>, items: &[Value]) -> Result<(), ApiError> {
    for item in items {
        serde_json::to_writer(&mut writer, item)
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        writeln!(writer)?;
    }
    Ok(())
}

fn write_body(
    mut writer: Box<dyn std::io::Write>,
    output: &OutputArgs,
    body: &Value,
) -> Result<(), ApiError> {
    use crate::cli::commands::output::ExportFormat;
    match output.format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, body)
                .map_err(|e| ApiError::Malformed(e.to_string()))?;
            writeln!(writer)?;
            Ok(())
        }
        ExportFormat::Csv => {
            let items = first_items_array(body)
                .ok_or_else(|| ApiError::Malformed("CSV output needs an items array".into()))?;
            reporter::write_items(writer, ExportFormat::Csv, items)
                .map_err(|e| ApiError::Malformed(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_items_array_walks_past_wrapper_keys() {
        let body = json!({
            "data": {"Tickets": {"count": 1, "items": [{"srn": "a"}]}}
        });
        assert_eq!(first_items_array(&body).unwrap().len(), 1);

        let nested = json!({
            "data": {"ExecuteSavedQuery": {"Query": {"count": 2, "items": [{}, {}]}}}
        });
        assert_eq!(first_items_array(&nested).unwrap().len(), 2);

        assert!(first_items_array(&json!({"data": {}})).is_none());
    }

    #[test]
    fn first_envelope_prefers_global_count_over_count() {
        let body = json!({
            "data": {"Tickets": {"count": 100, "globalCount": 1234, "items": []}}
        });
        let page = first_envelope_page(&body).unwrap();
        assert_eq!(page.total, Some(1234));

        let search = json!({
            "data": {"Search": {"count": 42, "items": []}}
        });
        assert_eq!(first_envelope_page(&search).unwrap().total, Some(42));
    }
}
