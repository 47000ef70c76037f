use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    client::{graphql_errors, ApiClient},
    error::ApiError,
    findings::QUERY_NAME,
};

/// Marker planted in generated swimlane descriptions. Membership updates
/// refuse to touch swimlanes that don't carry it, so hand-built swimlanes
/// are never rewritten by the sync.
const TEMPLATE_MARKER: &str = "SonraiSwimlaneTemplate";

/// Template swimlanes are found by this title prefix.
const TEMPLATE_TITLE_TAG: &str = "~Sonrai";

const SWIMLANES_QUERY: &str = "\
query swimlanes($where: SwimlaneFilter) {
  Swimlanes(where: $where) {
    count
    items(limit: 1000) {
      srn
      title
      description
      tags
      resourceIds
      accounts
    }
  }
}";

const CREATE_SWIMLANE_MUTATION: &str = "\
mutation createSwimlane($swimlane: SwimlaneCreator!) {
  CreateSwimlane(value: $swimlane) {
    srn
    title
  }
}";

const UPDATE_SWIMLANE_MUTATION: &str = "\
mutation updateSwimlane($srn: String!, $value: SwimlaneUpdater!) {
  UpdateSwimlane(srn: $srn, value: $value) {
    srn
  }
}";

/// Which swimlane membership list a template maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipKind {
    /// `resourceIds`; matched values are wrapped in `*` wildcards.
    ResourceIds,
    /// `accounts`; matched values are used verbatim.
    Accounts,
}

/// A swimlane template, decoded from the tags of a `~Sonrai`-titled
/// swimlane. Tag keys are wrapped `*key=value*` except `app_tag_name`,
/// whose trailing `*` is a meaningful wildcard and is kept.
#[derive(Debug, Clone)]
pub struct SwimlaneTemplate {
    pub title: String,
    pub swimlane_prefix: String,
    pub sonrai_env: String,
    pub app_tag_name: String,
    pub env_tag_name: String,
    pub env_type: String,
    pub cloud_type: String,
    pub search_resource_type: String,
    pub search_return_field: String,
    pub membership: MembershipKind,
    pub default_importance: i64,
    pub max_per_template: Option<u64>,
}

impl SwimlaneTemplate {
    /// Decode a template from a swimlane item. Missing required tags are a
    /// configuration error on the tenant side.
    pub fn from_item(item: &Value) -> Result<Self, ApiError> {
        let title = item
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tags = item
            .get("tags")
            .and_then(Value::as_array)
            .ok_or_else(|| ApiError::Malformed(format!("template swimlane {title:?} carries no tags")))?;

        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        for tag in tags {
            let Some(tag) = tag.as_str() else { continue };
            let Some((key, value)) = tag.split_once('=') else {
                warn!("skipping malformed template tag {tag:?} on {title:?}");
                continue;
            };
            if key.contains("app_tag_name") {
                // app_tag_name keeps its wildcard; only the leading '*' of
                // the key is decoration.
                fields.insert(key.trim_start_matches('*').to_string(), value.to_string());
            } else {
                fields.insert(
                    key.trim_start_matches('*').to_string(),
                    value.trim_end_matches('*').to_string(),
                );
            }
        }

        let for_errors = title.clone();
        let require = |name: &str| {
            fields.get(name).cloned().ok_or_else(|| {
                ApiError::Config(format!(
                    "template swimlane {for_errors:?} is missing the {name} tag"
                ))
            })
        };

        let membership = match require("swimlane_filter_type")?.chars().next() {
            Some('R') => MembershipKind::ResourceIds,
            Some('A') => MembershipKind::Accounts,
            other => {
                return Err(ApiError::Config(format!(
                    "template swimlane {title:?} has unrecognized swimlane_filter_type {other:?}"
                )))
            }
        };

        Ok(Self {
            swimlane_prefix: require("swimlane_prefix")?,
            sonrai_env: require("sonrai_env")?,
            app_tag_name: require("app_tag_name")?,
            env_tag_name: require("env_tag_name")?,
            env_type: require("env_type")?,
            cloud_type: require("cloud_type")?,
            search_resource_type: require("search_resource_type")?,
            search_return_field: require("search_return_field")?,
            default_importance: fields
                .get("default_importance")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            max_per_template: fields.get("max_per_template").and_then(|v| v.parse().ok()),
            membership,
            title,
        })
    }

    /// Every `env_tag:env_value` pair the template matches on.
    pub fn env_filter(&self) -> Vec<String> {
        let mut out = Vec::new();
        for env_tag in self.env_tag_name.split(',') {
            for env_type in self.env_type.split(',') {
                out.push(format!("{}:{}", env_tag.trim(), env_type.trim()));
            }
        }
        out
    }

    /// The app tag prefix with its wildcard stripped.
    pub fn app_tag_prefix(&self) -> String {
        self.app_tag_name.replace('*', "")
    }

    pub fn swimlane_title(&self, app: &str) -> String {
        format!("{}_{}_{}", self.swimlane_prefix, app.to_lowercase(), self.sonrai_env)
    }
}

/// GraphQL type/field names interpolated into query text must look like
/// identifiers. Everything else travels through variables.
fn ensure_identifier(name: &str) -> Result<(), ApiError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ApiError::Config(format!("{name:?} is not a valid GraphQL identifier")))
    }
}

/// List swimlanes matching a structured filter. Returns (count, items).
pub async fn list(client: &mut ApiClient, filter: Value) -> Result<(u64, Vec<Value>), ApiError> {
    let body = client
        .execute(SWIMLANES_QUERY, json!({ "where": filter }), QUERY_NAME)
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    let count = body.pointer("/data/Swimlanes/count").and_then(Value::as_u64).unwrap_or(0);
    let items = body
        .pointer("/data/Swimlanes/items")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ApiError::Malformed("swimlane response carried no items".into()))?;
    Ok((count, items))
}

/// Create one swimlane from a template for a discovered application value.
/// Returns the new srn.
pub async fn create(
    client: &mut ApiClient,
    template: &SwimlaneTemplate,
    app: &str,
    title: &str,
) -> Result<String, ApiError> {
    let description = format!(
        "{TEMPLATE_MARKER}: created from template {} for applications tagged {}:{} in environments {}",
        template.title,
        template.app_tag_prefix().trim_end_matches(':'),
        app,
        template.sonrai_env,
    );
    let swimlane = json!({
        "title": title,
        "description": description,
        "defaultImportance": template.default_importance,
        "names": [],
        "resourceIds": [],
        "tags": [],
        "accounts": [],
        "preventionEnabled": false,
        "environments": [template.sonrai_env],
    });
    let body = client
        .execute(CREATE_SWIMLANE_MUTATION, json!({ "swimlane": swimlane }), QUERY_NAME)
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    body.pointer("/data/CreateSwimlane/srn")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::Malformed("CreateSwimlane response carried no srn".into()))
}

/// Discover the distinct application tag values behind a template by
/// scanning matching resources' tag sets.
pub async fn discover_app_tags(
    client: &mut ApiClient,
    template: &SwimlaneTemplate,
) -> Result<Vec<String>, ApiError> {
    let resource_type = &template.search_resource_type;
    ensure_identifier(resource_type)?;
    let query = format!(
        "query resources($where: {resource_type}Filter, $appTagPattern: String) {{\n\
         \x20 {resource_type}(where: $where) {{\n\
         \x20   count\n\
         \x20   items {{\n\
         \x20     srn\n\
         \x20     appTag: tagSet @regex(match: $appTagPattern, replace: \"$1\")\n\
         \x20   }}\n\
         \x20 }}\n\
         }}"
    );
    let filter = resource_filter(template, json!({"op": "CONTAINS", "value": template.app_tag_prefix(), "caseSensitive": false}));
    let variables = json!({
        "where": filter,
        "appTagPattern": format!("{}(.*)", template.app_tag_prefix()),
    });
    let body = client.execute(&query, variables, QUERY_NAME).await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    let items = body
        .pointer(&format!("/data/{resource_type}/items"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut apps: Vec<String> = Vec::new();
    for item in &items {
        if let Some(value) = item.pointer("/appTag/0").and_then(Value::as_str) {
            if !apps.iter().any(|a| a == value) {
                apps.push(value.to_string());
            }
        }
    }
    Ok(apps)
}

fn resource_filter(template: &SwimlaneTemplate, app_term: Value) -> Value {
    json!({
        "active": {"value": true},
        "cloudType": {"op": "EQ", "value": template.cloud_type},
        "and": [
            {"tagSet": {"op": "IN_LIST", "values": template.env_filter()}},
            {"tagSet": app_term},
        ],
    })
}

/// Desired membership for one (template, app) pair: the configured return
/// field of every matching resource, wildcard-wrapped for resourceIds.
pub async fn desired_membership(
    client: &mut ApiClient,
    template: &SwimlaneTemplate,
    app: &str,
) -> Result<BTreeSet<String>, ApiError> {
    let resource_type = &template.search_resource_type;
    let return_field = &template.search_return_field;
    ensure_identifier(resource_type)?;
    ensure_identifier(return_field)?;
    let query = format!(
        "query resource($where: {resource_type}Filter) {{\n\
         \x20 {resource_type}(where: $where) {{\n\
         \x20   items {{\n\
         \x20     {return_field}\n\
         \x20   }}\n\
         \x20 }}\n\
         }}"
    );
    let app_pair = format!("{}{}", template.app_tag_prefix(), app);
    let filter = resource_filter(template, json!({"op": "EQ", "value": app_pair, "caseSensitive": false}));
    let body = client.execute(&query, json!({ "where": filter }), QUERY_NAME).await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    let items = body
        .pointer(&format!("/data/{resource_type}/items"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut members = BTreeSet::new();
    for item in &items {
        if let Some(value) = item.get(return_field.as_str()).and_then(Value::as_str) {
            members.insert(match template.membership {
                MembershipKind::ResourceIds => format!("*{value}*"),
                MembershipKind::Accounts => value.to_string(),
            });
        }
    }
    Ok(members)
}

/// Add/remove sets for one membership list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Set arithmetic between what the swimlane holds and what the resource
/// search says it should hold.
pub fn diff_membership(current: &BTreeSet<String>, desired: &BTreeSet<String>) -> MembershipDiff {
    MembershipDiff {
        add: desired.difference(current).cloned().collect(),
        remove: current.difference(desired).cloned().collect(),
    }
}

/// Push a membership diff to a swimlane. Refuses swimlanes that don't carry
/// the template marker in their description.
pub async fn update_membership(
    client: &mut ApiClient,
    swimlane: &Value,
    template: &SwimlaneTemplate,
    app: &str,
) -> Result<bool, ApiError> {
    let srn = swimlane
        .get("srn")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::Malformed("swimlane item carried no srn".into()))?;
    let title = swimlane.get("title").and_then(Value::as_str).unwrap_or(srn);

    let description = swimlane.get("description").and_then(Value::as_str).unwrap_or_default();
    if !description.contains(TEMPLATE_MARKER) {
        warn!("swimlane {title} does not carry {TEMPLATE_MARKER:?} in its description, it will NOT be updated");
        return Ok(false);
    }

    let field = match template.membership {
        MembershipKind::ResourceIds => "resourceIds",
        MembershipKind::Accounts => "accounts",
    };
    let current: BTreeSet<String> = swimlane
        .get(field)
        .and_then(Value::as_array)
        .map(|values| {
            values.iter().filter_map(Value::as_str).map(str::to_string).collect()
        })
        .unwrap_or_default();
    let desired = desired_membership(client, template, app).await?;
    let diff = diff_membership(&current, &desired);
    if diff.is_empty() {
        info!("nothing to do for swimlane {title}");
        return Ok(false);
    }

    info!(
        "updating swimlane {title}: adding {} and removing {} {field}",
        diff.add.len(),
        diff.remove.len()
    );
    let mut value = serde_json::Map::new();
    value.insert(field.to_string(), json!({ "add": diff.add, "remove": diff.remove }));
    let body = client
        .execute(
            UPDATE_SWIMLANE_MUTATION,
            json!({ "srn": srn, "value": Value::Object(value) }),
            QUERY_NAME,
        )
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    Ok(true)
}

/// Knobs for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Cap on swimlanes created in a single run.
    pub max_per_run: u64,
    /// Cap on swimlanes existing in the tenant overall.
    pub max_total: u64,
    /// When false, log what would be created but don't.
    pub create: bool,
    /// When false, log what would be updated but don't.
    pub update: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { max_per_run: 5, max_total: 200, create: true, update: true }
    }
}

/// Template-driven swimlane maintenance: for every `~Sonrai` template, make
/// sure a swimlane exists per discovered application value and that its
/// membership matches the resource search.
pub async fn sync(client: &mut ApiClient, options: &SyncOptions) -> Result<(), ApiError> {
    let (total_count, _) = list(client, json!({})).await?;
    let mut created_this_run = 0u64;

    info!("searching for templated swimlanes");
    let (_, templates) = list(
        client,
        json!({"title": {"op": "CONTAINS", "value": TEMPLATE_TITLE_TAG}}),
    )
    .await?;

    for template_item in &templates {
        let template = match SwimlaneTemplate::from_item(template_item) {
            Ok(t) => t,
            Err(err) => {
                warn!("skipping template: {err}");
                continue;
            }
        };
        info!("processing template {}", template.title);
        let mut created_for_template = 0u64;
        let template_max = template.max_per_template.unwrap_or(options.max_total);

        let apps = discover_app_tags(client, &template).await?;
        info!("found {} unique application tags", apps.len());

        let (existing_count, existing) = list(
            client,
            json!({"and": [
                {"title": {"op": "CONTAINS", "value": template.swimlane_prefix}},
                {"title": {"op": "CONTAINS", "value": template.sonrai_env}},
            ]}),
        )
        .await?;
        debug!("found {existing_count} swimlanes with prefix {}", template.swimlane_prefix);

        for app in &apps {
            let app = app.to_lowercase();
            let title = template.swimlane_title(&app);
            let found = existing.iter().find(|sl| {
                sl.get("title")
                    .and_then(Value::as_str)
                    .map(|t| t.eq_ignore_ascii_case(&title))
                    .unwrap_or(false)
            });

            let target = match found {
                Some(swimlane) => {
                    debug!("swimlane already exists: {title}");
                    Some(swimlane.clone())
                }
                None if !options.create => {
                    info!("would create swimlane {title} (creation disabled)");
                    None
                }
                None => {
                    if total_count + created_this_run >= options.max_total {
                        warn!("maximum number of swimlanes reached, creating no more");
                        return Ok(());
                    }
                    if created_this_run >= options.max_per_run {
                        warn!("maximum number of swimlanes created for this run");
                        return Ok(());
                    }
                    if created_for_template >= template_max {
                        warn!("maximum swimlanes for template {}, moving on", template.title);
                        break;
                    }
                    info!("new swimlane to create: {title}");
                    let srn = create(client, &template, &app, &title).await?;
                    created_this_run += 1;
                    created_for_template += 1;
                    // Freshly created: empty membership, marker in place.
                    Some(json!({
                        "srn": srn,
                        "title": title,
                        "description": format!("{TEMPLATE_MARKER}:"),
                        "resourceIds": [],
                        "accounts": [],
                    }))
                }
            };

            if options.update {
                if let Some(swimlane) = target {
                    update_membership(client, &swimlane, &template, &app).await?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_item() -> Value {
        json!({
            "srn": "srn:swimlane/template",
            "title": "~SonraiTemplate AWS",
            "tags": [
                "*swimlane_prefix=team*",
                "*sonrai_env=prod*",
                "app_tag_name=app:*",
                "*env_tag_name=environment*",
                "*env_type=prod,production*",
                "*cloud_type=aws*",
                "*search_resource_type=Resources*",
                "*search_return_field=srn*",
                "*swimlane_filter_type=R*",
                "*default_importance=7*",
            ],
        })
    }

    #[test]
    fn template_decodes_from_tags() {
        let template = SwimlaneTemplate::from_item(&template_item()).unwrap();
        assert_eq!(template.swimlane_prefix, "team");
        assert_eq!(template.app_tag_name, "app:*");
        assert_eq!(template.app_tag_prefix(), "app:");
        assert_eq!(template.membership, MembershipKind::ResourceIds);
        assert_eq!(template.default_importance, 7);
        assert_eq!(
            template.env_filter(),
            vec!["environment:prod", "environment:production"]
        );
        assert_eq!(template.swimlane_title("Payments"), "team_payments_prod");
    }

    #[test]
    fn missing_required_tag_is_a_config_error() {
        let mut item = template_item();
        item["tags"].as_array_mut().unwrap().retain(|t| !t.as_str().unwrap().contains("cloud_type"));
        assert!(matches!(SwimlaneTemplate::from_item(&item), Err(ApiError::Config(_))));
    }

    #[test]
    fn membership_diff_is_set_arithmetic() {
        let current: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let desired: BTreeSet<String> = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let diff = diff_membership(&current, &desired);
        assert_eq!(diff.add, vec!["d"]);
        assert_eq!(diff.remove, vec!["a"]);
        assert!(!diff.is_empty());
        assert!(diff_membership(&desired, &desired).is_empty());
    }

    #[test]
    fn identifiers_are_validated_before_query_assembly() {
        assert!(ensure_identifier("Resources").is_ok());
        assert!(ensure_identifier("Cloud_Services").is_ok());
        assert!(ensure_identifier("Resources { srn }").is_err());
        assert!(ensure_identifier("").is_err());
    }
}
