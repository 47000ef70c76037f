use std::path::PathBuf;

use clap::{Args, ValueHint};
use tracing::info;

use crate::{cli::GlobalArgs, error::ApiError, identity};

/// `sonraictl identity`
#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// CSV file of mappings: source_kind,source_id,target_kind,target_id.
    /// Kinds: gcp_group, gcp_user, azure_ad_user, azure_sp, azure_group,
    /// aws_user, aws_role
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Clear all existing identity-mapping tags before setting new ones
    #[arg(long)]
    pub reset: bool,
}

pub async fn run(args: &IdentityArgs, global: &GlobalArgs) -> Result<(), ApiError> {
    if args.file.is_none() && !args.reset {
        return Err(ApiError::Config("provide a mapping file (--file) and/or --reset".into()));
    }

    let mut client = super::build_client(global)?;

    if args.reset {
        info!("clearing existing mappings");
        let deleted = identity::reset_mappings(&mut client).await?;
        info!("deleted {deleted} mapping tags");
    }

    if let Some(path) = &args.file {
        let mappings = identity::parse_mapping_file(path)?;
        if mappings.is_empty() {
            info!("no mappings found in {}", path.display());
            return Ok(());
        }
        let applied = identity::apply_mappings(&mut client, &mappings).await?;
        info!("applied {applied} of {} mappings", mappings.len());
    }
    Ok(())
}
