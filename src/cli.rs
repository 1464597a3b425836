use clap::{Args, Parser, Subcommand, ValueEnum};

/// annot - memoized annotation engine
///
/// Runs annotation definitions ("quests") over posts, caching every result
/// together with the definitions it depended on.
#[derive(Parser, Debug)]
#[command(name = "annot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Memoized annotation engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Annotate edits with a quest, serving cached results when valid
    Run(RunArgs),

    /// Render a quest's template without executing it
    Render(RunArgs),

    /// Inspect the loaded definitions
    Quests(QuestsArgs),

    /// Print the latest stored result per post
    Export(ExportArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

/// Configuration shared by every command that opens a context
#[derive(Args, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path
    #[arg(short = 'c', long, env = "ANNOT_CONFIG")]
    pub config: Option<String>,

    /// Record store (memory://, rocksdb://<path>, http(s)://<sparql dataset>)
    #[arg(long, env = "ANNOT_STORE_URL")]
    pub store_url: Option<String>,

    /// Copy every SPARQL update into this directory
    #[arg(long, env = "ANNOT_DUMP_DIR")]
    pub dump_dir: Option<String>,

    /// Directory of <name>_<major>_<minor>.yaml definitions
    #[arg(long, env = "ANNOT_QUEST_DIR")]
    pub quest_dir: Option<String>,

    /// Mastodon-compatible API base for remote posts
    #[arg(long, env = "ANNOT_SOURCE_URL")]
    pub source_url: Option<String>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, env = "ANNOT_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Cache behaviour and argument overrides
#[derive(Args, Debug, Clone, Default)]
pub struct CacheArgs {
    /// Do not read stored results
    #[arg(long)]
    pub no_read: bool,

    /// Do not store new results
    #[arg(long)]
    pub no_write: bool,

    /// Neither read nor store
    #[arg(long, conflicts_with = "only_cache")]
    pub no_cache: bool,

    /// Never execute; missing results print as None
    #[arg(long)]
    pub only_cache: bool,

    /// Override for one name, e.g. `humor_1:temperature=0.5`
    #[arg(long = "args", value_name = "QUEST:KEY=VALUE")]
    pub args: Vec<String>,

    /// Override for every quest declaring the key, e.g. `model=gpt-4o`
    #[arg(long = "args-global", value_name = "KEY=VALUE")]
    pub args_global: Vec<String>,

    /// Ignore override keys a quest does not declare instead of failing
    #[arg(long)]
    pub lenient: bool,
}

/// Edits a quest is applied to
#[derive(Args, Debug, Clone, Default)]
pub struct InputArgs {
    /// Remote post, optionally at a point in time: ID or ID@2024-01-31T12:00:00Z
    #[arg(long = "edit", value_name = "ID[@TIME]")]
    pub edits: Vec<String>,

    /// Local file used as post content
    #[arg(long = "edit-file", value_name = "PATH")]
    pub files: Vec<String>,

    /// Literal post content
    #[arg(long = "text", value_name = "TEXT")]
    pub texts: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Quest name (humor, humor_1, humor_1_2 or humor_latest)
    pub quest: String,

    #[command(flatten)]
    pub inputs: InputArgs,

    #[command(flatten)]
    pub cache: CacheArgs,

    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct QuestsArgs {
    #[command(subcommand)]
    pub command: QuestsCommand,
}

#[derive(Subcommand, Debug)]
pub enum QuestsCommand {
    /// List concrete definitions with their digests
    List {
        #[command(flatten)]
        common: CommonConfigArgs,
    },
    /// Show which definition a name resolves to
    Resolve {
        name: String,

        #[command(flatten)]
        common: CommonConfigArgs,
    },
}

#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Quest base name
    pub quest: String,

    /// Only results of this major version
    #[arg(long)]
    pub major: Option<u32>,

    /// Only results of this minor version
    #[arg(long, requires = "major")]
    pub minor: Option<u32>,

    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file (discovered when omitted)
        path: Option<String>,
    },
    /// Print an example configuration file
    Generate,
    /// Show effective configuration (merged from all sources)
    Show {
        #[command(flatten)]
        common: CommonConfigArgs,

        #[command(flatten)]
        cache: CacheArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "annot",
            "run",
            "humor_1",
            "--text",
            "hello",
            "--edit",
            "109@2024-01-31T12:00:00Z",
            "--no-write",
            "--args",
            "humor_1:temperature=0.5",
            "--store-url",
            "memory://",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.quest, "humor_1");
        assert_eq!(args.inputs.texts, vec!["hello"]);
        assert_eq!(args.inputs.edits, vec!["109@2024-01-31T12:00:00Z"]);
        assert!(args.cache.no_write);
        assert!(!args.cache.no_read);
        assert_eq!(args.cache.args, vec!["humor_1:temperature=0.5"]);
        assert_eq!(args.common.store_url.as_deref(), Some("memory://"));
        assert_eq!(args.format, OutputFormat::Text);
    }

    #[test]
    fn test_no_cache_conflicts_with_only_cache() {
        let result = Cli::try_parse_from(["annot", "run", "q", "--no-cache", "--only-cache"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_export_minor_requires_major() {
        assert!(Cli::try_parse_from(["annot", "export", "humor", "--minor", "1"]).is_err());
        assert!(Cli::try_parse_from(["annot", "export", "humor", "--major", "1", "--minor", "1"]).is_ok());
    }
}
