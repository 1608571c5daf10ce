//! IPC Server - Unix socket server for UI communication
//!
//! Handles incoming connections from the UI and dispatches commands to the
//! cache daemon.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::daemon::CacheDaemon;
use crate::ipc::protocol::{parse_command, serialize_response, Command, Response, PROTOCOL_VERSION};
use crate::preload::PreloadEvent;
use crate::service::RawFileRecord;

/// IPC Server that listens for commands from the UI
pub struct IpcServer {
    daemon: Arc<CacheDaemon>,
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl IpcServer {
    pub fn new(daemon: Arc<CacheDaemon>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            daemon,
            socket_path: socket_path.into(),
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale socket file
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind Unix socket at {:?}", self.socket_path))?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let daemon = Arc::clone(&self.daemon);
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, daemon, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub async fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> u32 {
        *self.connection_count.read().await
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    daemon: Arc<CacheDaemon>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();
    let mut first_command = true;

    // Newline-delimited JSON, one command per line
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(Command::SubscribeEvictions) if first_command => {
                        let evictions = daemon.subscribe_evictions();
                        let ack = Response::success("Subscribed to evictions");
                        if write_response(&mut writer, &ack).await.is_ok() {
                            stream_evictions(evictions, &mut writer).await;
                        }
                        break;
                    }
                    Ok(command) => process_command(command, &daemon).await,
                    Err(e) => {
                        error!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::error(format!("Invalid command: {}", e))
                    }
                };
                first_command = false;

                if let Err(e) = write_response(&mut writer, &response).await {
                    error!(error = %e, "Failed to write response");
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serialize_response(response).context("Failed to serialize response")?;
    writer.write_all(&json).await.context("Failed to write to socket")?;
    Ok(())
}

/// Forward evicted keys until the client goes away or the daemon stops
async fn stream_evictions<W>(mut evictions: broadcast::Receiver<String>, writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    loop {
        match evictions.recv().await {
            Ok(cache_key) => {
                if let Err(e) = write_response(writer, &Response::Evicted { cache_key }).await {
                    debug!(error = %e, "Eviction subscriber went away");
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Eviction subscriber lagging, keys dropped");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Process a command and return a response
pub(crate) async fn process_command(command: Command, daemon: &CacheDaemon) -> Response {
    let engine = daemon.engine();

    match command {
        Command::GetFiles {
            user_id,
            folder_id,
            page,
            force_refresh,
        } => match engine.get_files(&user_id, &folder_id, page, force_refresh).await {
            Ok(files) => Response::Files { page, files },
            Err(e) => Response::error(format!("Failed to get files: {}", e)),
        },

        Command::GetFilesInRange {
            user_id,
            folder_id,
            start,
            end,
        } => match engine.get_files_in_range(&user_id, &folder_id, start, end).await {
            Ok(files) => Response::RangedFiles { files },
            Err(e) => Response::error(format!("Failed to get files in range: {}", e)),
        },

        Command::IsFolderCached { user_id, folder_id } => {
            match engine.is_folder_cached(&user_id, &folder_id).await {
                Ok(value) => Response::Flag { value },
                Err(e) => Response::error(e),
            }
        }

        Command::GetTotalFiles { user_id, folder_id } => {
            match engine.get_total_files(&user_id, &folder_id).await {
                Ok(value) => Response::Count { value },
                Err(e) => Response::error(e),
            }
        }

        Command::HasMoreFiles { user_id, folder_id } => {
            match engine.has_more_files(&user_id, &folder_id).await {
                Ok(value) => Response::Flag { value },
                Err(e) => Response::error(e),
            }
        }

        Command::InvalidateFolder { user_id, folder_id } => {
            info!(user_id = %user_id, folder_id = %folder_id, "Processing invalidateFolder command");
            match engine.invalidate_folder_cache(&user_id, &folder_id).await {
                Ok(true) => Response::success(format!("Invalidated folder {}", folder_id)),
                Ok(false) => Response::success(format!("Folder {} was not cached", folder_id)),
                Err(e) => Response::error(format!("Invalidation failed: {}", e)),
            }
        }

        Command::InvalidateUser { user_id } => {
            info!(user_id = %user_id, "Processing invalidateUser command");
            let removed = engine.invalidate_user_cache(&user_id);
            Response::success(format!("Invalidated {} cached folders", removed.len()))
        }

        Command::PrefetchFolder { user_id, folder_id } => {
            match engine.preload_folder_data(&user_id, &folder_id).await {
                Ok(()) => Response::success(format!("Prefetched folder {}", folder_id)),
                Err(e) => Response::error(format!("Prefetch failed: {}", e)),
            }
        }

        Command::FolderNavigated { user_id, folder_id } => {
            forward_event(daemon, PreloadEvent::FolderNavigated { user_id, folder_id }).await
        }

        Command::FileUploaded {
            user_id,
            parent_folder_id,
            file,
        } => {
            if let Some(mut file) = file.and_then(RawFileRecord::normalize) {
                if file.parent_folder_id.is_none() {
                    file = file.with_parent(parent_folder_id.as_str());
                }
                if let Err(e) = engine.add_file(&user_id, &parent_folder_id, file).await {
                    return Response::error(format!("Failed to cache uploaded file: {}", e));
                }
            }
            forward_event(
                daemon,
                PreloadEvent::FileUploaded {
                    user_id,
                    parent_folder_id,
                },
            )
            .await
        }

        Command::UserAuthenticated { user_id } => {
            forward_event(daemon, PreloadEvent::UserAuthenticated { user_id }).await
        }

        // Only reached when the connection already carried other commands
        Command::SubscribeEvictions => {
            Response::error("subscribeEvictions must be the first command on its connection")
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");
            let status = daemon.status();
            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: status.service_health != "unhealthy",
                service_health: status.service_health.to_string(),
                uptime_secs: status.uptime.as_secs(),
                cache: status.cache,
                preload: status.preload,
                recent_errors: status.recent_errors,
            }
        }
    }
}

async fn forward_event(daemon: &CacheDaemon, event: PreloadEvent) -> Response {
    match daemon.send_event(event).await {
        Ok(()) => Response::Success { message: None },
        Err(e) => Response::error(e),
    }
}
