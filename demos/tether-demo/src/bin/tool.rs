//! Tool process: follows the discovery file and keeps a link to the editor
//!
//! Lines typed on stdin as `KEY=VALUE` are written into the flat map, the
//! way a legacy frontend would; `show` prints the map.

use std::sync::Arc;

use clap::Parser;
use tether_bridge::FlatMap;
use tether_demo::CommonArgs;
use tether_runtime::{Dispatcher, EditorActions, OpenFileArgs, ToolController};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "tool", about = "tether tool process")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

struct PrintActions;

impl EditorActions for PrintActions {
    fn open_file(&self, args: &OpenFileArgs) -> bool {
        println!("open {}:{}:{}", args.path, args.line, args.col);
        !args.path.is_empty()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.common.setup()?;

    let (dispatcher, _dispatcher_task) = Dispatcher::spawn();
    let map = FlatMap::new();
    map.watch(|change| println!("{} = {}", change.key, change.new));

    let tool = ToolController::new(config, map.clone(), dispatcher, Arc::new(PrintActions))?;
    let link = tool.start()?;
    tracing::info!(
        path = %tool.config().discovery_path.display(),
        "waiting for the editor"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "show" {
                    let mut entries: Vec<_> = map.snapshot().into_iter().collect();
                    entries.sort();
                    for (key, value) in entries {
                        println!("  {key} = {value}");
                    }
                } else if let Some((key, value)) = line.split_once('=') {
                    tool.set_external(key.trim(), value.trim())?;
                } else if !line.is_empty() {
                    println!("expected KEY=VALUE or show");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    link.shutdown().await;
    Ok(())
}
