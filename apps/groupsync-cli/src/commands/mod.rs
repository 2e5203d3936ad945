//! CLI command implementations

pub mod prune;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use tracing::debug;

use groupsync_directory::prelude::*;
use groupsync_engine::{RunResult, SyncConfig};
use groupsync_ldap::LdapDirectory;

use crate::config::SyncConfigFile;
use crate::error::{CliError, CliResult};
use crate::output::OutputFormat;
use crate::store::FileGroupStore;

/// Options shared by `sync` and `prune`.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Path to the YAML sync config
    #[arg(long, value_name = "FILE")]
    pub sync_config: PathBuf,

    /// Apply changes; without this flag the run only reports them
    #[arg(long)]
    pub confirm: bool,

    /// Path to the JSON group store
    #[arg(long, value_name = "FILE", default_value = "groups.json")]
    pub store: PathBuf,

    /// Output format
    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Per-operation timeout in seconds (overrides timeoutSeconds)
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Groups processed in parallel (overrides concurrency)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl CommonArgs {
    /// Apply command-line overrides on top of the file config.
    pub fn apply_overrides(&self, mut config: SyncConfig) -> CliResult<SyncConfig> {
        if let Some(secs) = self.timeout {
            config.timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Collaborators and settings a command runs with.
pub struct RunContext {
    pub directory: Arc<dyn DirectoryQuery>,
    pub store: Arc<dyn GroupStore>,
    pub config: SyncConfig,
}

impl RunContext {
    /// Build the LDAP directory and file store from the command options.
    pub async fn from_args(args: &CommonArgs) -> CliResult<Self> {
        let file = SyncConfigFile::load(&args.sync_config)?;
        let ldap = file.ldap_config()?;
        let config = args.apply_overrides(file.sync_config()?)?;
        debug!(ldap = ?ldap, store = %args.store.display(), "Loaded sync config");

        let directory = LdapDirectory::new(ldap)?;
        let store = FileGroupStore::open(&args.store).await?;
        Ok(Self {
            directory: Arc::new(directory),
            store: Arc::new(store),
            config,
        })
    }
}

/// Read an identifier list file, as used for `--whitelist` and `--blacklist`.
pub(crate) fn read_list(path: &Path) -> CliResult<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CliError::Io(format!("cannot read {}: {}", path.display(), e)))?;
    Ok(groupsync_engine::parse_identifier_list(&content))
}

/// Turn a finished run into the command's exit status.
pub(crate) fn finish(result: &RunResult) -> CliResult<()> {
    if result.run_failed() {
        return Err(CliError::RunFailed {
            failed: result.failed().count(),
        });
    }
    Ok(())
}
