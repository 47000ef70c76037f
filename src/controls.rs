use serde_json::{json, Value};
use tracing::info;

use crate::{
    client::{graphql_errors, ApiClient},
    error::ApiError,
    findings::QUERY_NAME,
};

const CLOUD_HIERARCHY_QUERY: &str = "\
query getCloudHierarchyList($filters: CloudHierarchyFilter) {
  CloudHierarchyList(where: $filters) {
    items {
      resourceId
      scope
    }
  }
}";

const CLOUD_SERVICES_QUERY: &str = "\
query getCloudServices($filters: CloudServiceFilter) {
  CloudServices(where: $filters) {
    items(orderBy: {sensitivePermissionCount: {order: DESC}}) {
      name
      status {
        status
      }
      controlKey
    }
  }
}";

const DISABLE_SERVICE_MUTATION: &str = "\
mutation disableService($input: ServiceActionInput!) {
  DisableService(input: $input) {
    success
    __typename
  }
}";

const PROTECT_SERVICE_MUTATION: &str = "\
mutation protectService($input: ProtectActionInput!) {
  ProtectService(input: $input) {
    success
    __typename
  }
}";

/// A cloud service control and its key, as listed for one account scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub name: String,
    pub control_key: String,
}

/// Resolve the permission-firewall scope string for a cloud account.
pub async fn get_scope(client: &mut ApiClient, account_id: &str) -> Result<String, ApiError> {
    let filters = json!({
        "purpleEnabled": {"op": "EQ", "value": true},
        "entryType": {"op": "NEQ", "value": "managementAccount"},
        "active": {"op": "EQ", "value": true},
    });
    let body = client
        .execute(CLOUD_HIERARCHY_QUERY, json!({ "filters": filters }), QUERY_NAME)
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }

    body.pointer("/data/CloudHierarchyList/items")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find(|item| {
                item.get("resourceId").and_then(Value::as_str) == Some(account_id)
            })
        })
        .and_then(|item| item.get("scope").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| ApiError::Config(format!("scope not found for account {account_id}")))
}

/// Cloud services for a scope, partitioned into (disabled, protected) by
/// their control status.
pub async fn controls_by_status(
    client: &mut ApiClient,
    scope: &str,
) -> Result<(Vec<Control>, Vec<Control>), ApiError> {
    let filters = json!({ "scope": {"op": "EQ", "value": scope} });
    let body = client
        .execute(CLOUD_SERVICES_QUERY, json!({ "filters": filters }), QUERY_NAME)
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }

    let items = body
        .pointer("/data/CloudServices/items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut disabled = Vec::new();
    let mut protected = Vec::new();
    for service in &items {
        let status = service
            .pointer("/status/status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let control = Control {
            name: service.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            control_key: service
                .get("controlKey")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        match status.as_str() {
            "disabled" => disabled.push(control),
            "protected" => protected.push(control),
            _ => {}
        }
    }
    Ok((disabled, protected))
}

/// Disable one control on a scope.
pub async fn disable_control(
    client: &mut ApiClient,
    control_key: &str,
    scope: &str,
    dry_run: bool,
) -> Result<(), ApiError> {
    if dry_run {
        info!("[DRY RUN] would disable {control_key} on scope {scope}");
        return Ok(());
    }
    let input = json!({ "controlKey": control_key, "scope": scope });
    let body = client
        .execute(DISABLE_SERVICE_MUTATION, json!({ "input": input }), QUERY_NAME)
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    let success = body
        .pointer("/data/DisableService/success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    info!("disabled {control_key} on {scope}: {success}");
    Ok(())
}

/// Protect one control on a scope. No exempted identities are carried over;
/// exemptions are scope-local and must be re-granted on the target.
pub async fn protect_control(
    client: &mut ApiClient,
    control_key: &str,
    scope: &str,
    dry_run: bool,
) -> Result<(), ApiError> {
    if dry_run {
        info!("[DRY RUN] would protect {control_key} on scope {scope}");
        return Ok(());
    }
    let input = json!({
        "controlKey": control_key,
        "scope": scope,
        "identities": [],
        "ssoActorIds": [],
    });
    let body = client
        .execute(PROTECT_SERVICE_MUTATION, json!({ "input": input }), QUERY_NAME)
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    let success = body
        .pointer("/data/ProtectService/success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    info!("protected {control_key} on {scope}: {success}");
    Ok(())
}

/// Replay the source account's disabled and protected controls onto the
/// target account.
pub async fn migrate(
    client: &mut ApiClient,
    source_account: &str,
    target_account: &str,
    dry_run: bool,
) -> Result<(), ApiError> {
    info!("retrieving scopes for accounts");
    let source_scope = get_scope(client, source_account).await?;
    let target_scope = get_scope(client, target_account).await?;
    info!("source scope: {source_scope}");
    info!("target scope: {target_scope}");

    info!("fetching disabled and protected services from the source account");
    let (disabled, protected) = controls_by_status(client, &source_scope).await?;
    if disabled.is_empty() && protected.is_empty() {
        info!("no disabled or protected services found in the source account");
        return Ok(());
    }
    info!("found {} disabled and {} protected controls to migrate", disabled.len(), protected.len());

    for control in &disabled {
        info!("disabling {} ({}) in the target account", control.name, control.control_key);
        disable_control(client, &control.control_key, &target_scope, dry_run).await?;
    }
    for control in &protected {
        info!("protecting {} ({}) in the target account", control.name, control.control_key);
        protect_control(client, &control.control_key, &target_scope, dry_run).await?;
    }
    Ok(())
}
