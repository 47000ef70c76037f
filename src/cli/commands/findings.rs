use std::{fs, path::PathBuf};

use clap::{ArgGroup, Args, ValueHint};
use serde_json::json;
use tracing::info;

use crate::{
    cli::{commands::output::ExportFormat, GlobalArgs},
    error::ApiError,
    findings::{self, TicketAction},
    pagination::{envelope_page, paginate},
    reporter,
};

/// `sonraictl findings`
///
/// Exactly one action per invocation; status changes also require a comment
/// so the audit trail says why.
#[derive(Args, Debug, Clone)]
#[command(group = ArgGroup::new("source").required(true).args(["file", "url"]))]
#[command(group = ArgGroup::new("action").args(["assign", "close", "reopen", "risk_accept", "snooze", "export"]))]
pub struct FindingsArgs {
    /// File containing the GraphQL findings query to run
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Ticket-screen URL whose filters select the findings. Must be quoted
    #[arg(long, short, value_name = "URL")]
    pub url: Option<String>,

    /// Findings fetched per page and mutated per batch
    #[arg(long, short, default_value_t = 1000)]
    pub limit: u64,

    /// Include risk findings in the query
    #[arg(long = "include-risk", alias = "findings")]
    pub include_risk: bool,

    /// Comment to add. Required for all actions except --export and --assign
    #[arg(long, short, value_name = "TEXT")]
    pub message: Option<String>,

    /// Assign the findings to the user with this email address
    #[arg(long, short, value_name = "EMAIL")]
    pub assign: Option<String>,

    /// Close the findings from the search
    #[arg(long, short)]
    pub close: bool,

    /// Re-open the findings from the search
    #[arg(long, short = 'o', alias = "open")]
    pub reopen: bool,

    /// Risk-accept the findings from the search
    #[arg(long, short)]
    pub risk_accept: bool,

    /// Snooze the findings for this many days
    #[arg(long, short, value_name = "DAYS")]
    pub snooze: Option<i64>,

    /// Export the findings to this file
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub export: Option<PathBuf>,

    /// Export format
    #[arg(long, value_name = "FORMAT", default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,
}

enum Action {
    Comment,
    Assign(String),
    Status(TicketAction, Option<i64>),
    Export(PathBuf),
}

impl FindingsArgs {
    fn action(&self) -> Result<Action, ApiError> {
        let action = if let Some(email) = &self.assign {
            Action::Assign(email.clone())
        } else if self.close {
            Action::Status(TicketAction::Close, None)
        } else if self.reopen {
            Action::Status(TicketAction::Reopen, None)
        } else if self.risk_accept {
            Action::Status(TicketAction::RiskAccept, None)
        } else if let Some(days) = self.snooze {
            Action::Status(TicketAction::Snooze, Some(days))
        } else if let Some(path) = &self.export {
            Action::Export(path.clone())
        } else if self.message.is_some() {
            Action::Comment
        } else {
            return Err(ApiError::Config("provide at least one action".into()));
        };

        // Status transitions need a comment for the audit trail.
        if matches!(action, Action::Status(..)) && self.message.is_none() {
            return Err(ApiError::Config("this action requires a comment (--message)".into()));
        }
        Ok(action)
    }
}

pub async fn run(args: &FindingsArgs, global: &GlobalArgs) -> Result<(), ApiError> {
    let action = args.action()?;
    let mut client = super::build_client(global)?;
    let export_fields = matches!(action, Action::Export(_));
    let batch_size = args.limit.max(1) as usize;

    let items = match (&args.url, &args.file) {
        (Some(url), _) => {
            let filter = findings::filter_from_screen_url(url)?;
            findings::fetch_findings(
                &mut client,
                filter,
                args.include_risk,
                export_fields,
                args.limit,
                global.use_progress(),
            )
            .await?
        }
        (None, Some(path)) => {
            let query = fs::read_to_string(path)
                .map_err(|e| {
                    ApiError::Config(format!("unable to read query file {}: {e}", path.display()))
                })?
                .trim()
                .to_string();
            paginate(&mut client, &query, findings::QUERY_NAME, &json!({}), args.limit, |body| {
                envelope_page(body, "/data/Tickets")
            })
            .await?
        }
        (None, None) => unreachable!("clap enforces the source group"),
    };

    if items.is_empty() {
        info!("no findings found with query, no action will be performed");
        return Ok(());
    }
    let srns = findings::srns(&items);

    match action {
        Action::Comment => {
            let message = args.message.as_deref().unwrap_or_default();
            findings::add_comment(&mut client, &srns, message, batch_size).await?;
        }
        Action::Assign(email) => {
            findings::assign(&mut client, &srns, &email, batch_size).await?;
        }
        Action::Status(ticket_action, snooze_days) => {
            let message = args.message.as_deref().unwrap_or_default();
            findings::add_comment(&mut client, &srns, message, batch_size).await?;
            findings::update_status(&mut client, &srns, ticket_action, snooze_days, batch_size)
                .await?;
        }
        Action::Export(path) => {
            let writer = std::io::BufWriter::new(fs::File::create(&path)?);
            reporter::write_items(writer, args.format, &items)
                .map_err(|e| ApiError::Malformed(e.to_string()))?;
            info!("exported {} findings to {}", items.len(), path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> FindingsArgs {
        FindingsArgs {
            file: None,
            url: Some("https://app.sonraisecurity.com/App/Tickets?status=NEW".into()),
            limit: 1000,
            include_risk: false,
            message: None,
            assign: None,
            close: false,
            reopen: false,
            risk_accept: false,
            snooze: None,
            export: None,
            format: ExportFormat::Json,
        }
    }

    #[test]
    fn no_action_at_all_is_rejected() {
        assert!(matches!(base_args().action(), Err(ApiError::Config(_))));
    }

    #[test]
    fn status_changes_require_a_comment() {
        let mut args = base_args();
        args.close = true;
        assert!(matches!(args.action(), Err(ApiError::Config(_))));
        args.message = Some("closing after remediation".into());
        assert!(matches!(args.action(), Ok(Action::Status(TicketAction::Close, None))));
    }

    #[test]
    fn export_and_assign_do_not_need_a_comment() {
        let mut args = base_args();
        args.export = Some(PathBuf::from("out.json"));
        assert!(matches!(args.action(), Ok(Action::Export(_))));

        let mut args = base_args();
        args.assign = Some("alice@example.com".into());
        assert!(matches!(args.action(), Ok(Action::Assign(_))));
    }

    #[test]
    fn message_alone_is_a_comment_action() {
        let mut args = base_args();
        args.message = Some("triage note".into());
        assert!(matches!(args.action(), Ok(Action::Comment)));
    }

    #[test]
    fn snooze_carries_its_days() {
        let mut args = base_args();
        args.snooze = Some(14);
        args.message = Some("snoozing".into());
        assert!(matches!(args.action(), Ok(Action::Status(TicketAction::Snooze, Some(14)))));
    }
}
