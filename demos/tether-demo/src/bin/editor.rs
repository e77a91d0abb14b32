//! Editor process: listens, advertises its port and serves one tool
//!
//! Commands on stdin:
//! - `open PATH [LINE] [COL]`
//! - `log error|warning|message TEXT`

use std::time::Duration;

use clap::Parser;
use tether_demo::CommonArgs;
use tether_runtime::{
    Dispatcher, EditorEndpoint, EditorInfo, LogEvent, LogEventMode, LogEventType, OpenFileArgs,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "editor", about = "tether editor process")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Application version published to the tool
    #[arg(long, default_value = "2022.3.0f1")]
    app_version: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.common.setup()?;

    let (dispatcher, _dispatcher_task) = Dispatcher::spawn();
    let info = EditorInfo {
        plugin_version: config.protocol_version.clone(),
        application_path: std::env::current_exe()?.display().to_string(),
        application_version: cli.app_version,
    };
    let endpoint = EditorEndpoint::start(&config, dispatcher, info).await?;
    endpoint.model().play.advise_changes(|on: &bool| println!("play = {on}"));
    endpoint.model().pause.advise_changes(|on: &bool| println!("pause = {on}"));
    endpoint.model().step.set_handler(|()| println!("step"));
    endpoint.model().refresh.set_handler(|()| println!("refresh"));

    if endpoint.wait_for_session(Duration::from_secs(1)).await.is_none() {
        println!("listening on port {}, no tool yet", endpoint.port());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Err(e) = run_command(&endpoint, line.trim()).await {
                    println!("failed: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    endpoint.shutdown().await;
    Ok(())
}

async fn run_command(endpoint: &EditorEndpoint, line: &str) -> tether_core::TetherResult<()> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("open") => {
            let path = words.next().unwrap_or_default().to_string();
            let line = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
            let col = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
            let opened = endpoint.open_file(OpenFileArgs { path, line, col }).await?;
            println!("opened: {opened}");
        }
        Some("log") => {
            let kind = match words.next() {
                Some("error") => LogEventType::Error,
                Some("warning") => LogEventType::Warning,
                _ => LogEventType::Message,
            };
            let message = words.collect::<Vec<_>>().join(" ");
            endpoint.log(LogEvent {
                kind,
                mode: LogEventMode::Edit,
                message,
                stack_trace: String::new(),
            })?;
        }
        Some(other) => println!("unknown command {other:?}"),
        None => {}
    }
    Ok(())
}
