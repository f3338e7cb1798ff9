//! muxpane: run the center pane full-screen against the local tmux server.

mod app;

use clap::Parser;

#[derive(Parser)]
#[command(name = "muxpane", about = "PTY agent tabs over tmux", version)]
struct Cli {
    /// Workspace to open
    #[arg(long, default_value = "default")]
    workspace: String,

    /// Assistant for the initial tab
    #[arg(long)]
    assistant: Option<String>,

    /// Override the attached-tab cap (0 disables it)
    #[arg(long)]
    max_attached: Option<usize>,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    muxpane_core::init_logging(cli.quiet);

    let mut config = match muxpane_core::config::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("muxpane: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(max_attached) = cli.max_attached {
        config.max_attached = max_attached;
    }
    let assistant = cli
        .assistant
        .unwrap_or_else(|| config.default_assistant.clone());

    if let Err(e) = app::run(config, cli.workspace, assistant).await {
        eprintln!("muxpane: {}", e);
        std::process::exit(1);
    }
}
