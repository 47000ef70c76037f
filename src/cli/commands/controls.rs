use clap::Args;

use crate::{cli::GlobalArgs, controls, error::ApiError};

/// `sonraictl controls`
#[derive(Args, Debug, Clone)]
pub struct ControlsArgs {
    /// Source cloud account ID
    #[arg(long, short)]
    pub source: String,

    /// Target cloud account ID
    #[arg(long, short)]
    pub target: String,

    /// Log actions without executing them
    #[arg(long, alias = "test")]
    pub dry_run: bool,
}

pub async fn run(args: &ControlsArgs, global: &GlobalArgs) -> Result<(), ApiError> {
    let mut client = super::build_client(global)?;
    controls::migrate(&mut client, &args.source, &args.target, args.dry_run).await
}
