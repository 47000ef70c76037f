use std::{fs, path::Path, str::FromStr};

use serde_json::{json, Value};
use tracing::{error, info};

use crate::{
    client::{graphql_errors, ApiClient},
    error::ApiError,
};

/// Tag key used to pair mapped identities.
pub const MAPPING_TAG_KEY: &str = "sonrai-identity-mapping";

/// The identity kinds a mapping file may name. A closed set: each variant
/// maps to one query through [`IdentityKind::lookup`], so an unknown kind is
/// a parse error, not a missing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    GcpGroup,
    GcpUser,
    AzureAdUser,
    AzureServicePrincipal,
    AzureGroup,
    AwsUser,
    AwsRole,
}

impl FromStr for IdentityKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "gcp_group" => Ok(IdentityKind::GcpGroup),
            "gcp_user" => Ok(IdentityKind::GcpUser),
            "azure_ad_user" => Ok(IdentityKind::AzureAdUser),
            "azure_sp" => Ok(IdentityKind::AzureServicePrincipal),
            "azure_group" => Ok(IdentityKind::AzureGroup),
            "aws_user" => Ok(IdentityKind::AwsUser),
            "aws_role" => Ok(IdentityKind::AwsRole),
            other => Err(ApiError::Config(format!("unknown identity kind {other:?}"))),
        }
    }
}

/// One prepared identity lookup: the query text, its bound variables, and
/// the query-name tag the server logs.
#[derive(Debug, Clone)]
pub struct IdentityQuery {
    pub query_name: &'static str,
    pub query: &'static str,
    pub variables: Value,
}

impl IdentityKind {
    /// Dispatch table from kind to lookup query. Azure kinds take a
    /// `tenant:value` pair; everything else takes the bare identifier.
    pub fn lookup(&self, raw: &str) -> Result<IdentityQuery, ApiError> {
        let raw = raw.trim();
        match self {
            IdentityKind::GcpGroup => Ok(IdentityQuery {
                query_name: "GCP GROUP QUERY",
                query: "\
query getGCPGroupSRN($groupName: String) {
  Groups(
    where: {
      srn: {op: CONTAINS, value: $groupName, caseSensitive: false}
      type: {op: EQ, value: GCPGoogleGroup}
    }
  ) {
    count
    items {
      srn
      resourceId
    }
  }
}",
                variables: json!({ "groupName": raw }),
            }),
            IdentityKind::GcpUser => Ok(IdentityQuery {
                query_name: "GCP USER QUERY",
                query: "\
query getGCPUserSRN($userName: String) {
  Users(
    where: {
      active: {op: EQ, value: true}
      type: {op: EQ, value: GCPUser}
      userName: {op: EQ, value: $userName}
    }
  ) {
    count
    items {
      srn
      resourceId
    }
  }
}",
                variables: json!({ "userName": raw }),
            }),
            IdentityKind::AzureAdUser => {
                let (tenant, user) = split_tenant_pair(raw)?;
                Ok(IdentityQuery {
                    query_name: "AZURE AD USER QUERY",
                    query: "\
query getADUserSrn($userName: String, $tenant: String) {
  Users(
    where: {
      active: {op: EQ, value: true}
      type: {op: EQ, value: ActiveDirectoryUser}
      userName: {op: EQ, value: $userName}
      account: {op: EQ, value: $tenant}
    }
  ) {
    count
    items {
      srn
      resourceId
    }
  }
}",
                    variables: json!({ "userName": user, "tenant": tenant }),
                })
            }
            IdentityKind::AzureServicePrincipal => {
                let (tenant, app_id) = split_tenant_pair(raw)?;
                Ok(IdentityQuery {
                    query_name: "AZURE SERVICE PRINCIPAL",
                    query: "\
query getAzureSP($tenantId: String, $appId: String) {
  Users(
    where: {
      active: {op: EQ, value: true}
      type: {op: EQ, value: ServicePrincipal}
      account: {op: EQ, value: $tenantId}
      metadata: {op: CONTAINS, value: $appId}
    }
  ) {
    count
    items {
      resourceId
      srn
    }
  }
}",
                    variables: json!({ "tenantId": tenant, "appId": app_id }),
                })
            }
            IdentityKind::AzureGroup => Ok(IdentityQuery {
                query_name: "AZURE GROUP QUERY",
                query: "\
query getAzureGroup($groupName: String) {
  Groups(
    where: {
      name: {op: EQ, value: $groupName, caseSensitive: false}
      type: {op: EQ, value: ActiveDirectoryGroup}
    }
  ) {
    count
    items {
      srn
      resourceId
    }
  }
}",
                variables: json!({ "groupName": raw }),
            }),
            IdentityKind::AwsUser => Ok(IdentityQuery {
                query_name: "AWS USER QUERY",
                query: "\
query getAWSUserSrn($arn: String) {
  Users(
    where: {
      active: {op: EQ, value: true}
      type: {op: EQ, value: User}
      resourceId: {op: EQ, value: $arn}
    }
  ) {
    count
    items {
      srn
      resourceId
    }
  }
}",
                variables: json!({ "arn": raw }),
            }),
            IdentityKind::AwsRole => Ok(IdentityQuery {
                query_name: "AWS ROLE QUERY",
                query: "\
query getRoleSRN($arn: String) {
  Roles(
    where: {
      resourceId: {op: EQ, value: $arn, caseSensitive: false}
      type: {op: EQ, value: Role}
    }
  ) {
    count
    items {
      srn
      resourceId
    }
  }
}",
                variables: json!({ "arn": raw }),
            }),
        }
    }
}

fn split_tenant_pair(raw: &str) -> Result<(String, String), ApiError> {
    match raw.split_once(':') {
        Some((tenant, value)) if !tenant.is_empty() && !value.is_empty() => {
            Ok((tenant.to_string(), value.to_string()))
        }
        _ => Err(ApiError::Config(format!(
            "Azure identities need a tenant:value pair, got {raw:?}"
        ))),
    }
}

/// A resolved identity: its graph srn and cloud resource id.
#[derive(Debug, Clone)]
pub struct Identity {
    pub srn: String,
    pub resource_id: String,
}

/// Resolve an identity to exactly one graph entry. Zero matches or more
/// than one are both errors — a mapping must be unambiguous.
pub async fn resolve(
    client: &mut ApiClient,
    kind: IdentityKind,
    raw: &str,
) -> Result<Identity, ApiError> {
    let lookup = kind.lookup(raw)?;
    info!("querying identity kind {kind:?} for {raw}");
    let body = client.execute(lookup.query, lookup.variables, lookup.query_name).await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }

    // The envelope key varies (Users/Groups/Roles); take the first one.
    let envelope = body
        .get("data")
        .and_then(Value::as_object)
        .and_then(|data| data.values().next())
        .ok_or_else(|| ApiError::Malformed("identity response carried no data".into()))?;
    let count = envelope.get("count").and_then(Value::as_u64).unwrap_or(0);
    match count {
        0 => Err(ApiError::Config(format!("{kind:?} not found: {raw}"))),
        1 => {
            let item = &envelope["items"][0];
            Ok(Identity {
                srn: item["srn"].as_str().unwrap_or_default().to_string(),
                resource_id: item["resourceId"].as_str().unwrap_or_default().to_string(),
            })
        }
        _ => Err(ApiError::Config(format!("too many {kind:?} matches for {raw}"))),
    }
}

const ADD_TAG_MUTATION: &str = "\
mutation addKey($srn: ID, $key: String, $value: String) {
  AddTag(
    value: {key: $key, value: $value, tagsEntity: {add: [$srn]}}
  ) {
    srn
    key
    value
  }
}";

/// Attach the mapping tag to one resource.
pub async fn add_tag(
    client: &mut ApiClient,
    resource_srn: &str,
    value: &str,
) -> Result<(), ApiError> {
    let variables = json!({ "srn": resource_srn, "key": MAPPING_TAG_KEY, "value": value });
    let body = client.execute(ADD_TAG_MUTATION, variables, "ADD TAG TO RESOURCE").await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    Ok(())
}

const FIND_TAGS_QUERY: &str = "\
query findTags($key: String) {
  Tags(where: {key: {value: $key}}) {
    count
    items {
      srn
      tagsEntity {
        items {
          srn
        }
      }
    }
  }
}";

const DELETE_TAG_MUTATION: &str = "\
mutation deleteTags($srn: ID) {
  DeleteTag(srn: $srn)
}";

/// Delete every existing mapping tag, one DeleteTag per tag srn.
pub async fn reset_mappings(client: &mut ApiClient) -> Result<u64, ApiError> {
    let body = client
        .execute(FIND_TAGS_QUERY, json!({ "key": MAPPING_TAG_KEY }), "Find Tags QUERY")
        .await?;
    if let Some(errors) = graphql_errors(&body) {
        return Err(ApiError::GraphQl(errors));
    }
    let count = body.pointer("/data/Tags/count").and_then(Value::as_u64).unwrap_or(0);
    if count == 0 {
        return Ok(0);
    }

    info!("deleting {count} existing mapping tags");
    let tags = body
        .pointer("/data/Tags/items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut deleted = 0u64;
    for tag in &tags {
        let Some(srn) = tag.get("srn").and_then(Value::as_str) else { continue };
        let body = client
            .execute(DELETE_TAG_MUTATION, json!({ "srn": srn }), "DeleteTag")
            .await?;
        if let Some(errors) = graphql_errors(&body) {
            return Err(ApiError::GraphQl(errors));
        }
        deleted += 1;
    }
    Ok(deleted)
}

/// One line of a mapping file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub source_kind: IdentityKind,
    pub source_id: String,
    pub target_kind: IdentityKind,
    pub target_id: String,
}

/// Parse a mapping CSV: four comma-separated fields per line, `#` comments
/// and blank lines skipped, ill-formed lines reported and skipped.
pub fn parse_mapping_file(path: &Path) -> Result<Vec<Mapping>, ApiError> {
    let content = fs::read_to_string(path)?;
    let mut mappings = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 4 {
            error!("invalid CSV line: {line}");
            continue;
        }
        let (source_kind, target_kind) = match (fields[0].parse(), fields[2].parse()) {
            (Ok(s), Ok(t)) => (s, t),
            _ => {
                error!("invalid identity kind on line: {line}");
                continue;
            }
        };
        mappings.push(Mapping {
            source_kind,
            source_id: fields[1].trim().to_string(),
            target_kind,
            target_id: fields[3].trim().to_string(),
        });
    }
    Ok(mappings)
}

/// Apply every mapping: resolve both sides, then tag both with the target's
/// resource id. Unresolvable lines are logged and skipped rather than
/// aborting the batch. Returns the number of mappings applied.
pub async fn apply_mappings(
    client: &mut ApiClient,
    mappings: &[Mapping],
) -> Result<u64, ApiError> {
    let mut applied = 0u64;
    for mapping in mappings {
        let source = match resolve(client, mapping.source_kind, &mapping.source_id).await {
            Ok(identity) => identity,
            Err(err @ ApiError::Config(_)) => {
                error!("{err}");
                continue;
            }
            Err(err) => return Err(err),
        };
        let target = match resolve(client, mapping.target_kind, &mapping.target_id).await {
            Ok(identity) => identity,
            Err(err @ ApiError::Config(_)) => {
                error!("{err}");
                continue;
            }
            Err(err) => return Err(err),
        };

        // The tag value is the target's resource id on both sides, which is
        // what pairs the two identities up in the graph.
        info!("adding {MAPPING_TAG_KEY}={} to both identities", target.resource_id);
        add_tag(client, &source.srn, &target.resource_id).await?;
        add_tag(client, &target.srn, &target.resource_id).await?;
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_file_vocabulary() {
        assert_eq!("gcp_group".parse::<IdentityKind>().unwrap(), IdentityKind::GcpGroup);
        assert_eq!("aws_role".parse::<IdentityKind>().unwrap(), IdentityKind::AwsRole);
        assert_eq!("azure_sp".parse::<IdentityKind>().unwrap(), IdentityKind::AzureServicePrincipal);
        assert!("okta_user".parse::<IdentityKind>().is_err());
    }

    #[test]
    fn lookups_bind_values_as_variables() {
        let lookup = IdentityKind::AwsRole.lookup("arn:aws:iam::1:role/admin").unwrap();
        assert_eq!(lookup.variables, json!({"arn": "arn:aws:iam::1:role/admin"}));
        assert!(lookup.query.contains("$arn"));
        // The raw value never lands in the query text itself.
        assert!(!lookup.query.contains("arn:aws:iam"));
    }

    #[test]
    fn azure_kinds_require_tenant_pairs() {
        let lookup = IdentityKind::AzureAdUser.lookup("tenant-1:alice@example.com").unwrap();
        assert_eq!(
            lookup.variables,
            json!({"userName": "alice@example.com", "tenant": "tenant-1"})
        );
        assert!(IdentityKind::AzureAdUser.lookup("no-tenant-here").is_err());
        assert!(IdentityKind::AzureServicePrincipal.lookup(":missing").is_err());
    }

    #[test]
    fn mapping_file_skips_comments_and_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.csv");
        fs::write(
            &path,
            "# header comment\n\
             gcp_group,devs@example.com,aws_role,arn:aws:iam::1:role/devs\n\
             only,three,fields\n\
             bad_kind,x,aws_role,y\n\
             \n\
             aws_user,arn:aws:iam::1:user/bob,gcp_user,bob@example.com\n",
        )
        .unwrap();
        let mappings = parse_mapping_file(&path).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].source_kind, IdentityKind::GcpGroup);
        assert_eq!(mappings[1].target_id, "bob@example.com");
    }
}
