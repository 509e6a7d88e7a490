use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use sideline_core::models::{CardColor, Side};

#[derive(Parser)]
#[command(name = "sideline")]
#[command(about = "Run a live game session from the sideline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the engine config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new game session and make it current
    New {
        /// Your team's name
        team: String,
        /// Opponent name
        #[arg(long, default_value = "")]
        opponent: String,
        /// Roster player (repeatable), placed off field
        #[arg(short, long = "player", value_name = "ID")]
        players: Vec<String>,
        /// Minutes between substitution alerts (0 disables)
        #[arg(long, default_value = "0")]
        sub_interval: u32,
    },
    /// Start the match clock
    Start,
    /// Pause the match clock
    Pause,
    /// Resume the match clock
    Resume,
    /// End the match
    End,
    /// Move to the next period
    Period,
    /// Log a goal
    Goal {
        /// Scoring side
        #[arg(value_enum, default_value_t = SideArg::Home)]
        side: SideArg,
        /// Scoring player
        #[arg(long, value_name = "ID")]
        player: Option<String>,
    },
    /// Log a card
    Card {
        #[arg(value_enum)]
        color: CardColorArg,
        /// Side of the booked player
        #[arg(long, value_enum, default_value_t = SideArg::Home)]
        side: SideArg,
        /// Booked player
        #[arg(long, value_name = "ID")]
        player: Option<String>,
    },
    /// Log a substitution
    Sub {
        /// Player coming on
        player: String,
        /// Player going off
        #[arg(long, value_name = "ID")]
        replaces: Option<String>,
        #[arg(long, value_enum, default_value_t = SideArg::Home)]
        side: SideArg,
    },
    /// Acknowledge the substitution alert
    ConfirmSub,
    /// Retract a logged event
    Retract {
        /// Event ID or unique ID prefix
        id: String,
    },
    /// Place a player on the field, or take them off
    Move {
        /// Player to move
        player: String,
        /// Horizontal position, 0.0 to 1.0
        #[arg(required_unless_present = "off")]
        x: Option<f64>,
        /// Vertical position, 0.0 to 1.0
        #[arg(required_unless_present = "off")]
        y: Option<f64>,
        /// Take the player off the field
        #[arg(long, conflicts_with_all = ["x", "y"])]
        off: bool,
    },
    /// Draw a line on the field from `x,y` points
    Draw {
        #[arg(required = true, num_args = 1.., value_name = "X,Y")]
        points: Vec<String>,
        /// Stroke color
        #[arg(long, default_value = "#ffffff")]
        color: String,
    },
    /// Erase a drawing
    Erase {
        /// Drawing ID or unique ID prefix
        id: String,
    },
    /// Undo the last change
    Undo,
    /// Redo the last undone change
    Redo,
    /// Show the current session and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save the current session to the catalog
    Save,
    /// List saved sessions, most recent first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Make a saved session current
    Load {
        /// Session ID or unique ID prefix
        id: String,
    },
    /// Delete a session and everything queued for it
    Delete {
        /// Session ID or unique ID prefix
        id: String,
    },
    /// Export the current session as a match report
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Push queued changes to the remote store
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Manage the engine config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SideArg {
    Home,
    Away,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Home => Self::Home,
            SideArg::Away => Self::Away,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CardColorArg {
    Yellow,
    Red,
}

impl From<CardColorArg> for CardColor {
    fn from(color: CardColorArg) -> Self {
        match color {
            CardColorArg::Yellow => Self::Yellow,
            CardColorArg::Red => Self::Red,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl From<ExportFormat> for sideline_core::export::ExportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Json => Self::Json,
            ExportFormat::Markdown => Self::Markdown,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update the config file
    Init {
        /// Remote session store base URL
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Turn remote sync on or off
        #[arg(long)]
        sync: Option<bool>,
        /// Persisted undo depth
        #[arg(long, value_name = "N")]
        history_depth: Option<usize>,
    },
    /// Print the effective config
    Show,
}
