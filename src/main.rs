mod app;
mod archive;
mod config;
mod error;
mod event;
mod tree;

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};

use crate::app::Explorer;
use crate::config::{AppConfig, NestedConfig, OutputConfig, TreeConfig};
use crate::error::{AppError, Result};
use crate::event::{Event, EventHandler};
use crate::tree::view::{self, NodeInfo};
use crate::tree::Node;

/// Browse game archives (.p4k and other zip packs) as a virtual tree.
#[derive(Parser, Debug)]
#[command(name = "pakx", version, about)]
struct Cli {
    /// Archive to open
    archive: PathBuf,

    /// Explicit config file (overrides $PAKX_CONFIG and the default locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Expand nested archives found inside the archive
    #[arg(long, global = true)]
    nested: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the archive tree
    List {
        /// Only show entries whose path contains this text
        #[arg(long)]
        filter: Option<String>,
        /// Sort order: name, size, modified, key
        #[arg(long)]
        sort: Option<String>,
        /// Maximum depth below the root
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Show details of one entry
    Info {
        /// Path inside the archive (`/` or `\`)
        path: String,
    },
    /// Write the content of one entry to stdout
    Cat {
        /// Path inside the archive (`/` or `\`)
        path: String,
    },
    /// Fuzzy-find entries by path
    Find {
        query: String,
        /// Maximum number of results
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

impl Cli {
    /// Config values set explicitly on the command line.
    fn overrides(&self) -> AppConfig {
        let sort_by = match &self.command {
            Command::List { sort, .. } => sort.clone(),
            _ => None,
        };
        AppConfig {
            tree: TreeConfig {
                sort_by,
                ..Default::default()
            },
            nested: NestedConfig {
                enabled: self.nested.then_some(true),
                ..Default::default()
            },
            output: OutputConfig {
                json: self.json.then_some(true),
            },
            ..Default::default()
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref(), Some(&cli.overrides()));
    let mut explorer = Explorer::new(config);

    let root = load_in_background(&cli.archive, &explorer.config).await?;
    explorer.replace_root(root);

    run(&explorer, &cli.command)
}

/// Build the tree on a blocking thread, drawing progress on stderr.
async fn load_in_background(path: &Path, config: &AppConfig) -> Result<Arc<Node>> {
    let mut events = EventHandler::new();
    let tx = events.sender();
    let progress = events.progress();
    let owned_path = path.to_path_buf();
    let config = config.clone();

    let mut task = tokio::task::spawn_blocking(move || {
        let result = app::load_archive(&owned_path, &config, &progress);
        let _ = tx.send(Event::Loaded(result));
    });
    let mut task_done = false;
    let draw = std::io::stderr().is_terminal();

    loop {
        tokio::select! {
            event = events.next() => match event? {
                Event::Progress(update) => {
                    if draw {
                        let percent = update.current * 100 / update.total.max(1);
                        eprint!("\r\x1b[2K{percent:>3}% {}", update.status);
                    }
                }
                Event::Loaded(result) => {
                    if draw {
                        eprintln!();
                    }
                    return result;
                }
            },
            joined = &mut task, if !task_done => {
                task_done = true;
                if let Err(e) = joined {
                    return Err(AppError::construction(path.display().to_string(), e));
                }
            }
        }
    }
}

fn run(explorer: &Explorer, command: &Command) -> Result<()> {
    let json = explorer.config.json_output();
    let mut out = std::io::stdout().lock();

    match command {
        Command::List { filter, depth, .. } => {
            if let Some(query) = filter {
                let visible = explorer.set_filter(query)?;
                log::info!("{visible} entries match {query:?}");
            }
            let rows = explorer.rows(*depth)?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
            } else {
                write!(out, "{}", view::render_tree(&rows))?;
            }
        }
        Command::Info { path } => {
            let node = explorer.lookup(path)?;
            let info = NodeInfo::of(&node);
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                writeln!(out, "{info}")?;
            }
        }
        Command::Cat { path } => {
            let mut reader = explorer.lookup(path)?.open_content()?;
            std::io::copy(&mut reader, &mut out)?;
        }
        Command::Find { query, limit } => {
            let results = explorer.find(query, *limit)?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&results)?)?;
            } else {
                for result in &results {
                    writeln!(out, "{:>6}  {}", result.score, result.relative_path)?;
                }
            }
        }
    }

    out.flush()?;
    Ok(())
}
