//! FileCache Daemon - paginated folder-listing cache for a remote file service
//!
//! Serves cached folder pages to the UI over a Unix socket and preloads
//! folders in the background as the user navigates.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use filecache_daemon::config::DaemonConfig;
use filecache_daemon::daemon::CacheDaemon;
use filecache_daemon::ipc::IpcServer;

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Fetch one folder page through the cache and print it
    List {
        user_id: String,
        folder_id: String,
        page: u32,
    },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"FileCache Daemon - Paginated folder cache for the file service

USAGE:
    filecache-daemon                              # Run IPC server (default)
    filecache-daemon list <user_id> [folder_id] [page]
    filecache-daemon help

COMMANDS:
    (none)  Run IPC server mode (waits for commands from the UI)
    list    Fetch a folder page through the cache and print it
    help    Show this help message

ENVIRONMENT:
    FILECACHE_CONFIG        Config file path (default: <config dir>/filecache/config.json)
    FILECACHE_SERVICE_URL   File service API root
    FILECACHE_SOCKET        Unix socket path
    FILECACHE_PAGE_SIZE     Files per page
    FILECACHE_MAX_PAGES     Maximum cached entries
    RUST_LOG                Log filter (trace, debug, info, warn, error)
"#
    );
}

fn parse_args(args: &[String]) -> Result<Command> {
    if args.len() < 2 {
        return Ok(Command::Server);
    }

    match args[1].as_str() {
        "serve" => Ok(Command::Server),
        "list" => {
            let user_id = args
                .get(2)
                .cloned()
                .ok_or_else(|| anyhow!("Usage: filecache-daemon list <user_id> [folder_id] [page]"))?;
            let folder_id = args.get(3).cloned().unwrap_or_else(|| "root".to_string());
            let page = match args.get(4) {
                Some(page) => page
                    .parse()
                    .with_context(|| format!("Invalid page number: {}", page))?,
                None => 1,
            };
            Ok(Command::List {
                user_id,
                folder_id,
                page,
            })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Server => run_server().await,
        Command::List {
            user_id,
            folder_id,
            page,
        } => run_list(&user_id, &folder_id, page).await,
        Command::Help => {
            print_help();
            Ok(())
        }
    }
}

fn start_daemon() -> Result<(DaemonConfig, Arc<CacheDaemon>)> {
    let config = DaemonConfig::load()?;
    let daemon = Arc::new(CacheDaemon::from_config(&config)?);
    Ok((config, daemon))
}

async fn run_server() -> Result<()> {
    info!("Starting FileCache daemon in IPC server mode");
    let (config, daemon) = start_daemon()?;

    let mut ipc_server = IpcServer::new(Arc::clone(&daemon), config.socket_path.clone());
    if let Err(e) = ipc_server.start().await {
        error!(error = %e, "Failed to start IPC server");
        daemon.shutdown().await;
        return Err(e);
    }
    let ipc_server = Arc::new(ipc_server);

    info!(socket = %ipc_server.socket_path().display(), "Daemon ready. Waiting for commands from the UI...");

    let server = Arc::clone(&ipc_server);
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "IPC server error");
        }
    });

    tokio::signal::ctrl_c().await?;

    info!(
        connections = ipc_server.connection_count().await,
        "Received shutdown signal, stopping..."
    );
    ipc_handle.abort();
    if let Err(e) = ipc_server.stop().await {
        error!(error = %e, "Failed to clean up IPC socket");
    }
    daemon.shutdown().await;

    info!("Shutdown complete.");
    Ok(())
}

async fn run_list(user_id: &str, folder_id: &str, page: u32) -> Result<()> {
    let (_, daemon) = start_daemon()?;
    let result = daemon.engine().get_files(user_id, folder_id, page, false).await;
    let total = daemon.engine().get_total_files(user_id, folder_id).await;
    daemon.shutdown().await;

    let files = result.with_context(|| format!("Failed to list folder {}", folder_id))?;
    if files.is_empty() {
        println!("No files on page {} of {}.", page, folder_id);
        return Ok(());
    }

    println!(
        "Page {} of {} ({} files total):",
        page,
        folder_id,
        total.unwrap_or(0)
    );
    for file in files {
        println!("  {}  {} ({} bytes)", file.file_id, file.file_name, file.file_size);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert!(matches!(parse_args(&args(&["bin"])).unwrap(), Command::Server));
        assert!(matches!(parse_args(&args(&["bin", "-h"])).unwrap(), Command::Help));

        match parse_args(&args(&["bin", "list", "u1"])).unwrap() {
            Command::List {
                user_id,
                folder_id,
                page,
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(folder_id, "root");
                assert_eq!(page, 1);
            }
            other => panic!("Expected list command, got {:?}", other),
        }

        assert!(parse_args(&args(&["bin", "list"])).is_err());
        assert!(parse_args(&args(&["bin", "list", "u1", "docs", "two"])).is_err());
    }
}
