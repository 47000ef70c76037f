use clap::{Args, Subcommand};
use serde_json::json;

use crate::{
    cli::GlobalArgs,
    error::ApiError,
    reporter,
    swimlanes::{self, SyncOptions},
};

/// `sonraictl swimlanes`
#[derive(Subcommand, Debug, Clone)]
pub enum SwimlanesArgs {
    /// List swimlanes, optionally filtered by a title substring
    List(ListArgs),

    /// Create and update swimlanes from `~Sonrai` template swimlanes
    Sync(SyncArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only swimlanes whose title contains this value
    #[arg(long, value_name = "TEXT")]
    pub title: Option<String>,

    #[command(flatten)]
    pub output: crate::cli::commands::output::OutputArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Cap on swimlanes created in this run
    #[arg(long, default_value_t = 5, value_name = "N")]
    pub max_per_run: u64,

    /// Cap on swimlanes existing in the tenant overall
    #[arg(long, default_value_t = 200, value_name = "N")]
    pub max_total: u64,

    /// Log swimlanes that would be created without creating them
    #[arg(long)]
    pub no_create: bool,

    /// Log membership changes without applying them
    #[arg(long)]
    pub no_update: bool,
}

pub async fn run(args: &SwimlanesArgs, global: &GlobalArgs) -> Result<(), ApiError> {
    let mut client = super::build_client(global)?;
    match args {
        SwimlanesArgs::List(list_args) => {
            let filter = match &list_args.title {
                Some(title) => json!({"title": {"op": "CONTAINS", "value": title}}),
                None => json!({}),
            };
            let (_, items) = swimlanes::list(&mut client, filter).await?;
            let writer = list_args.output.get_writer()?;
            reporter::write_items(writer, list_args.output.format, &items)
                .map_err(|e| ApiError::Malformed(e.to_string()))
        }
        SwimlanesArgs::Sync(sync_args) => {
            let options = SyncOptions {
                max_per_run: sync_args.max_per_run,
                max_total: sync_args.max_total,
                create: !sync_args.no_create,
                update: !sync_args.no_update,
            };
            swimlanes::sync(&mut client, &options).await
        }
    }
}
