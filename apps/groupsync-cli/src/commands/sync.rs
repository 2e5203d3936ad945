//! `groupsync sync`

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;

use groupsync_engine::{FilterSet, Scope, SyncEngine, SyncResult};

use super::{finish, read_list, CommonArgs, RunContext};
use crate::error::{CliError, CliResult};
use crate::output::print_result;

/// How GROUP arguments and the whitelist are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SourceType {
    /// Directory group identifiers
    #[default]
    Ldap,
    /// Names of local groups previously synced from the directory
    Openshift,
}

/// Sync directory groups into the local group store
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Groups to sync: directory identifiers, or local names with --type=openshift
    #[arg(value_name = "GROUP")]
    pub groups: Vec<String>,

    #[command(flatten)]
    pub common: CommonArgs,

    /// File listing groups to sync, one per line
    #[arg(long, value_name = "FILE")]
    pub whitelist: Option<PathBuf>,

    /// File listing directory identifiers to skip, one per line
    #[arg(long, value_name = "FILE")]
    pub blacklist: Option<PathBuf>,

    /// How to interpret GROUP arguments and the whitelist
    #[arg(long = "type", value_enum, default_value_t = SourceType::Ldap)]
    pub source: SourceType,
}

impl SyncArgs {
    /// Scope and filter selected by the arguments.
    pub fn scope_and_filter(&self) -> CliResult<(Scope, FilterSet)> {
        let mut filter = FilterSet::new();
        if let Some(path) = &self.blacklist {
            filter = filter.with_blacklist(read_list(path)?);
        }
        let listed = match &self.whitelist {
            Some(path) => read_list(path)?,
            None => Vec::new(),
        };

        let scope = match self.source {
            SourceType::Ldap => {
                filter = filter.with_whitelist(listed);
                if self.groups.is_empty() {
                    Scope::AllDirectoryGroups
                } else {
                    Scope::Identifiers(self.groups.clone())
                }
            }
            SourceType::Openshift => {
                if self.whitelist.is_some() && listed.is_empty() && self.groups.is_empty() {
                    return Err(CliError::Validation(
                        "whitelist names no local groups".to_string(),
                    ));
                }
                let mut names = self.groups.clone();
                names.extend(listed);
                Scope::LocalGroups(names)
            }
        };
        Ok((scope, filter))
    }
}

/// Execute the sync command
pub async fn execute(args: SyncArgs, cancel: CancellationToken) -> CliResult<()> {
    let context = RunContext::from_args(&args.common).await?;
    let result = run(&args, context, cancel).await?;
    print_result(&result, args.common.output)?;
    finish(&result)
}

/// Run a sync against the given collaborators.
pub async fn run(
    args: &SyncArgs,
    context: RunContext,
    cancel: CancellationToken,
) -> CliResult<SyncResult> {
    let (scope, filter) = args.scope_and_filter()?;
    info!(scope = %scope, confirm = args.common.confirm, "Starting sync");

    let engine = SyncEngine::new(context.directory, context.store, context.config)?
        .with_filter(filter)
        .confirmed(args.common.confirm)
        .with_cancellation(cancel);
    Ok(engine.sync(&scope).await?)
}
