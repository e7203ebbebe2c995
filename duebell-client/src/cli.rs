use std::path::PathBuf;

use clap::Parser;

const HELP_EPILOG: &str = r#"Config resolution order:
  1) --config/-c PATH
  2) $DUEBELL_CONFIG
  3) XDG default: ~/.config/duebell/client.yaml

The agent runs until it receives SIGINT/SIGTERM or Quit is chosen from
the tray menu. Reminder windows are controlled from the server; there is
no other command surface.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "duebell-client",
    version,
    about = "Background reminder agent for DueBell",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
