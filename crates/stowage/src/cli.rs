//! Clap derive structures for the `stowage` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

use stowage_core::{Backend, JoinMode};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// stowage -- pull a remote JSON collection into a store and query it
#[derive(Debug, Parser)]
#[command(
    name = "stowage",
    version,
    about = "Fetch, sort, filter and join remote JSON collections",
    long_about = "Syncs a remote JSON collection into an in-memory store, optionally\n\
        crawling linked sub-resources, then sorts, filters, joins or persists\n\
        the records and prints them.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration profile to use
    #[arg(long, short = 'p', env = "STOWAGE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format [default: `defaults.output` from config, else table]
    #[arg(
        long = "output",
        short = 'o',
        env = "STOWAGE_OUTPUT",
        value_name = "FORMAT",
        global = true
    )]
    pub output_flag: Option<OutputFormat>,

    /// Effective output format, settled by [`GlobalOpts::resolve_output`].
    #[arg(skip)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', env = "STOWAGE_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides the profile)
    #[arg(long, env = "STOWAGE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

impl GlobalOpts {
    /// Settle `output`: the flag wins, then the configured default. An
    /// unrecognised configured value falls back to a table.
    pub fn resolve_output(&mut self, configured: &str) {
        self.output = self.output_flag.clone().unwrap_or_else(|| {
            <OutputFormat as ValueEnum>::from_str(configured, true).unwrap_or_else(|_| {
                tracing::warn!(configured, "unknown output format in config, using table");
                OutputFormat::Table
            })
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one key per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackendArg {
    /// JSON files in the data directory
    Local,
    /// In-memory, gone when the process exits
    Session,
    /// Embedded database file
    Database,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Local => Backend::Local,
            BackendArg::Session => Backend::Session,
            BackendArg::Database => Backend::Database,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum JoinModeArg {
    #[default]
    Inner,
    Left,
    Right,
}

impl From<JoinModeArg> for JoinMode {
    fn from(arg: JoinModeArg) -> Self {
        match arg {
            JoinModeArg::Inner => JoinMode::Inner,
            JoinModeArg::Left => JoinMode::Left,
            JoinModeArg::Right => JoinMode::Right,
        }
    }
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sync a collection and print its records
    #[command(alias = "f")]
    Fetch(FetchArgs),

    /// Sync two collections and join them on a field
    #[command(alias = "j")]
    Join(JoinArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared store arguments ───────────────────────────────────────────

/// Store options shared by `fetch` and `join`.
#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Field used as the record key
    #[arg(long)]
    pub key: Option<String>,

    /// Path unwrapping the response body, e.g. "data.items"
    #[arg(long)]
    pub source: Option<String>,

    /// Crawl arrays and links into nested stores
    #[arg(long, short = 'r')]
    pub retrieve: bool,

    /// Crawl depth limit (implies --retrieve)
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Fields never crawled
    #[arg(long, value_delimiter = ',')]
    pub ignore: Vec<String>,

    /// Fetch over JSONP using this callback parameter
    #[arg(long)]
    pub callback: Option<String>,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(long, short = 'H')]
    pub header: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  FETCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Collection URI (defaults to the profile's uri)
    pub uri: Option<String>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Sort query, e.g. "age desc, name"
    #[arg(long, short = 's')]
    pub sort: Option<String>,

    /// Filter expression, e.g. "age>=50" or "name~ada" (repeatable, AND-ed)
    #[arg(long = "where", short = 'w')]
    pub filters: Vec<String>,

    /// Case-insensitive search; comma-separated needles are OR-ed
    #[arg(long)]
    pub find: Option<String>,

    /// Only print records matching this selector ("key", "a,b,3")
    #[arg(long)]
    pub get: Option<String>,

    /// Id the store is registered and persisted under
    #[arg(long, default_value = "stowage")]
    pub id: String,

    /// Mirror the synced store into a backend
    #[arg(long)]
    pub save: Option<BackendArg>,

    /// Load the store from a backend instead of syncing
    #[arg(long, conflicts_with = "save")]
    pub restore: Option<BackendArg>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  JOIN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Left collection URI
    pub left: String,

    /// Right collection URI
    pub right: String,

    /// Field both collections are matched on
    #[arg(long)]
    pub on: String,

    /// Join mode
    #[arg(long, short = 'm', default_value = "inner")]
    pub mode: JoinModeArg,

    #[command(flatten)]
    pub store: StoreArgs,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the resolved configuration
    Show,

    /// Write a starter config file
    Init {
        /// Profile to create
        #[arg(long, default_value = "default")]
        name: String,

        /// Collection URI for the profile
        #[arg(long)]
        uri: Option<String>,

        /// Field used as the record key
        #[arg(long)]
        key: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List configured profiles
    Profiles,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn output_flag_beats_configured_default() {
        let mut cli = Cli::try_parse_from(["stowage", "config", "path"]).unwrap();
        cli.global.resolve_output("json");
        assert_eq!(cli.global.output, OutputFormat::Json);

        cli.global.resolve_output("nonsense");
        assert_eq!(cli.global.output, OutputFormat::Table);

        let mut cli = Cli::try_parse_from(["stowage", "-o", "plain", "config", "path"]).unwrap();
        cli.global.resolve_output("yaml");
        assert_eq!(cli.global.output, OutputFormat::Plain);
    }
}
