use anyhow::{Context, Result};
use sonraictl::{
    cli::{commands, global::Command, CommandLineArgs, GlobalArgs},
    error::ApiError,
};
use tokio::runtime::Builder;
use tracing::error;
use tracing_core::metadata::LevelFilter;
use tracing_subscriber::{
    fmt, prelude::__tracing_subscriber_SubscriberExt, registry, util::SubscriberInitExt,
};

fn main() -> Result<()> {
    let args = CommandLineArgs::parse_args();
    setup_logging(&args.global_args);

    // The execution model is strictly sequential — one request in flight at
    // a time, renewal included — so a single-threaded runtime is enough.
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    if let Err(err) = runtime.block_on(async_main(&args)) {
        error!("{err}");
        std::process::exit(err.exit_code());
    }
    Ok(())
}

async fn async_main(args: &CommandLineArgs) -> Result<(), ApiError> {
    match &args.command {
        Command::Query(query_args) => commands::query::run(query_args, &args.global_args).await,
        Command::Findings(findings_args) => {
            commands::findings::run(findings_args, &args.global_args).await
        }
        Command::Swimlanes(swimlanes_args) => {
            commands::swimlanes::run(swimlanes_args, &args.global_args).await
        }
        Command::Identity(identity_args) => {
            commands::identity::run(identity_args, &args.global_args).await
        }
        Command::Controls(controls_args) => {
            commands::controls::run(controls_args, &args.global_args).await
        }
    }
}

fn setup_logging(global_args: &GlobalArgs) {
    let level = LevelFilter::from_level(global_args.log_level());
    let all_targets = global_args.verbose > 2;

    let filter = if all_targets {
        tracing_subscriber::filter::Targets::new().with_default(LevelFilter::TRACE)
    } else {
        // Per-target filtering; third-party crates stay at ERROR.
        tracing_subscriber::filter::Targets::new()
            .with_default(LevelFilter::ERROR)
            .with_target("sonraictl", level)
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false)
        .without_time();

    registry().with(fmt_layer).with(filter).init();
}
