//! `groupsync prune`

use std::path::PathBuf;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use groupsync_engine::{PruneResult, Pruner, Scope};

use super::{finish, read_list, CommonArgs, RunContext};
use crate::error::{CliError, CliResult};
use crate::output::print_result;

/// Delete synced local groups whose directory group no longer exists
#[derive(Args, Debug, Clone)]
pub struct PruneArgs {
    /// Local group names to consider; all synced groups when omitted
    #[arg(value_name = "NAME")]
    pub names: Vec<String>,

    #[command(flatten)]
    pub common: CommonArgs,

    /// File listing directory identifiers to consider, one per line
    #[arg(long, value_name = "FILE", conflicts_with = "names")]
    pub whitelist: Option<PathBuf>,
}

impl PruneArgs {
    /// Scope selected by the arguments.
    pub fn scope(&self) -> CliResult<Scope> {
        match &self.whitelist {
            Some(path) => {
                let identifiers = read_list(path)?;
                if identifiers.is_empty() {
                    return Err(CliError::Validation(
                        "whitelist names no directory groups".to_string(),
                    ));
                }
                Ok(Scope::Identifiers(identifiers))
            }
            None => Ok(Scope::LocalGroups(self.names.clone())),
        }
    }
}

/// Execute the prune command
pub async fn execute(args: PruneArgs, cancel: CancellationToken) -> CliResult<()> {
    let context = RunContext::from_args(&args.common).await?;
    let result = run(&args, context, cancel).await?;
    print_result(&result, args.common.output)?;
    finish(&result)
}

/// Run a prune against the given collaborators.
pub async fn run(
    args: &PruneArgs,
    context: RunContext,
    cancel: CancellationToken,
) -> CliResult<PruneResult> {
    let scope = args.scope()?;
    info!(scope = %scope, confirm = args.common.confirm, "Starting prune");

    let pruner = Pruner::new(context.directory, context.store, context.config)?
        .confirmed(args.common.confirm)
        .with_cancellation(cancel);
    Ok(pruner.prune(&scope).await?)
}
