//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::storage::config::CliOverrides;

/// RB Sigma Hub - mirror Kiwify data into the local cache.
#[derive(Parser, Debug)]
#[command(name = "sigmahub")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Config file (default: platform config dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Override the remote API base URL
    #[arg(long, value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Override the cache database path
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_path: Option<PathBuf>,

    /// Log level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }

    /// Config overrides carried by the global and command flags.
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        let (page_size, bind) = match &self.command {
            Commands::Sync(args) => (args.page_size, None),
            Commands::Serve(args) => (None, args.bind.clone()),
            _ => (None, None),
        };
        CliOverrides {
            config_path: self.config.clone(),
            base_url: self.base_url.clone(),
            page_size,
            cache_path: self.cache_path.clone(),
            bind,
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect or refresh the remote access token
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Reconcile remote records into the cache
    Sync(SyncArgs),

    /// Compare the remote against the cache and report drift
    Doctor(DoctorArgs),

    /// Fetch a remote resource without touching the cache
    Fetch(FetchArgs),

    /// Run the admin HTTP server
    Serve(ServeArgs),
}

/// `auth` subcommands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum AuthCommand {
    /// Show cached token metadata (acquires a token first)
    Status,
    /// Force a token refresh
    Refresh,
}

/// Date bounds shared by `sync` and `doctor`.
#[derive(Args, Debug, Clone, Default)]
pub struct RangeArgs {
    /// Range start (YYYY-MM-DD or RFC 3339, inclusive)
    #[arg(long, value_name = "DATE")]
    pub start: Option<String>,

    /// Range end (YYYY-MM-DD or RFC 3339, exclusive)
    #[arg(long, value_name = "DATE")]
    pub end: Option<String>,
}

/// Arguments for the `sync` command.
#[derive(Parser, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    /// Resource to sync (repeatable; default: products and sales)
    #[arg(long = "resource", value_name = "NAME")]
    pub resources: Vec<String>,

    /// Continue from the stored watermark
    #[arg(long)]
    pub resume: bool,

    /// Record a watermark after each page
    #[arg(long)]
    pub persist: bool,

    /// Stop after this many seconds and report the next cursor
    #[arg(long, value_name = "SECONDS")]
    pub budget_secs: Option<u64>,

    /// Page size override
    #[arg(long, value_name = "N")]
    pub page_size: Option<u32>,
}

/// Arguments for the `doctor` command.
#[derive(Parser, Debug)]
pub struct DoctorArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    /// Resource to check
    #[arg(long, value_name = "NAME", default_value = "sales")]
    pub resource: String,

    /// Re-sync every flagged record after the check
    #[arg(long)]
    pub repair: bool,
}

/// Arguments for the `fetch` command.
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// What to fetch
    #[arg(value_enum)]
    pub kind: FetchKind,

    /// Record id (sale, product, withdrawal) or legal entity id (balances)
    pub id: Option<String>,

    /// Page number for list fetches
    #[arg(long, default_value = "1")]
    pub page: u32,

    /// Page size for list fetches
    #[arg(long, value_name = "N")]
    pub page_size: Option<u32>,
}

/// Remote resources reachable through `fetch`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchKind {
    Sale,
    Product,
    Products,
    Balances,
    Withdrawal,
    Withdrawals,
    Account,
}

impl FetchKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Product => "product",
            Self::Products => "products",
            Self::Balances => "balances",
            Self::Withdrawal => "withdrawal",
            Self::Withdrawals => "withdrawals",
            Self::Account => "account",
        }
    }
}

/// Arguments for the `serve` command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address (default from config)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,
}

/// Output format options.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Human,
    /// JSON output
    Json,
}
