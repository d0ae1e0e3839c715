mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, connector::ConnectorSubcommand, group::GroupSubcommand,
    plugin::PluginSubcommand, process::ProcessSubcommand, remark::RemarkSubcommand,
    request::RequestSubcommand, rule::RuleSubcommand, task::TaskSubcommand,
    user::UserSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "extract",
    about = "Extract: import geodata orders, route them through processes and export the results",
    version,
    propagate_version = true
)]
struct Cli {
    /// Instance root (default: nearest directory holding .extract/)
    #[arg(long, global = true, env = "EXTRACT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an Extract instance in the root directory
    Init {
        /// Login of the first administrator
        #[arg(long, default_value = "admin")]
        admin: String,
        /// E-mail address of the first administrator
        #[arg(long, default_value = "")]
        email: String,
    },

    /// Start the HTTP API and the orchestrator
    Serve {
        #[arg(long, default_value = "8080")]
        port: u16,
        /// Don't open a browser on the API
        #[arg(long)]
        no_open: bool,
        /// Serve the API without running the scheduled jobs
        #[arg(long)]
        no_orchestrator: bool,
    },

    /// Run the scheduled jobs without the HTTP API
    Run {
        /// Run every job once (imports included) and exit
        #[arg(long)]
        once: bool,
    },

    /// Inspect and act on requests
    Request {
        #[command(subcommand)]
        subcommand: RequestSubcommand,
    },

    /// Manage connectors
    Connector {
        #[command(subcommand)]
        subcommand: ConnectorSubcommand,
    },

    /// Manage the routing rules of a connector
    Rule {
        #[command(subcommand)]
        subcommand: RuleSubcommand,
    },

    /// Manage processes
    Process {
        #[command(subcommand)]
        subcommand: ProcessSubcommand,
    },

    /// Manage the tasks of a process
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        subcommand: UserSubcommand,
    },

    /// Manage user groups
    Group {
        #[command(subcommand)]
        subcommand: GroupSubcommand,
    },

    /// Manage validation and rejection message templates
    Remark {
        #[command(subcommand)]
        subcommand: RemarkSubcommand,
    },

    /// List the available plugins
    Plugin {
        #[command(subcommand)]
        subcommand: PluginSubcommand,
    },

    /// Show or validate the system parameters
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Show request counts, orchestrator state and recent events
    State,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { admin, email } => cmd::init::run(&root, &admin, &email, cli.json),
        Commands::Serve {
            port,
            no_open,
            no_orchestrator,
        } => cmd::serve::run(&root, port, no_open, no_orchestrator),
        Commands::Run { once } => cmd::run::run(&root, once, cli.json),
        Commands::Request { subcommand } => cmd::request::run(&root, subcommand, cli.json),
        Commands::Connector { subcommand } => cmd::connector::run(&root, subcommand, cli.json),
        Commands::Rule { subcommand } => cmd::rule::run(&root, subcommand, cli.json),
        Commands::Process { subcommand } => cmd::process::run(&root, subcommand, cli.json),
        Commands::Task { subcommand } => cmd::task::run(&root, subcommand, cli.json),
        Commands::User { subcommand } => cmd::user::run(&root, subcommand, cli.json),
        Commands::Group { subcommand } => cmd::group::run(&root, subcommand, cli.json),
        Commands::Remark { subcommand } => cmd::remark::run(&root, subcommand, cli.json),
        Commands::Plugin { subcommand } => cmd::plugin::run(subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::State => cmd::state::run(&root, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
