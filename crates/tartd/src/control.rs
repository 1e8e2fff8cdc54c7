//! Console socket — how `tartd exec` and `tartd deploy` reach a running daemon.
//!
//! One newline-delimited JSON request per connection. The daemon answers
//! with `output` frames as the command writes, then a single `done` frame
//! carrying the failure flag. The socket is created mode 0600, so only the
//! daemon's own OS user can connect; that user is the trusted console.

use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tart_commands::{Orchestrator, Params};
use tart_deploy::TreeMaterializer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Exec {
        command: String,
        params: Params,
        /// Empty for the trusted console.
        #[serde(default)]
        user: String,
    },
    Deploy {
        tart: String,
        #[serde(default)]
        user: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    Output { text: String },
    Done { failed: bool },
}

/// Run `request` against `orchestrator`, writing its response to `sink`.
/// Returns whether it failed.
pub async fn execute<M: TreeMaterializer>(
    orchestrator: &Orchestrator<M>,
    request: ControlRequest,
    sink: &mut (dyn Write + Send),
) -> bool {
    match request {
        ControlRequest::Exec {
            command,
            params,
            user,
        } => orchestrator
            .dispatch(&command, &params, sink, &user)
            .await
            .failed(),
        ControlRequest::Deploy { tart, user } => {
            match orchestrator.deploy(&tart, sink, &user).await {
                Ok(report) => {
                    info!(
                        %tart,
                        hash = %report.commit.hash,
                        script = ?report.script,
                        restarted = ?report.restarted,
                        "deploy finished"
                    );
                    false
                }
                Err(e) => {
                    warn!(%tart, error = %e, "deploy failed");
                    let _ = writeln!(sink, "Err: {e}");
                    true
                }
            }
        }
    }
}

/// Accept console connections on `socket_path` until `shutdown` fires.
pub async fn serve<M>(
    socket_path: &Path,
    orchestrator: Arc<Orchestrator<M>>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    M: TreeMaterializer + 'static,
{
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Left behind by a daemon that did not shut down cleanly.
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    info!(socket = %socket_path.display(), "console socket listening");

    loop {
        tokio::select! {
            accept = listener.accept() => match accept {
                Ok((stream, _addr)) => {
                    let orchestrator = orchestrator.clone();
                    tokio::spawn(handle_connection(stream, orchestrator));
                }
                Err(e) => warn!(error = %e, "console accept failed"),
            },
            _ = shutdown.changed() => break,
        }
    }

    let _ = std::fs::remove_file(socket_path);
    debug!("console socket closed");
    Ok(())
}

async fn handle_connection<M: TreeMaterializer>(
    stream: UnixStream,
    orchestrator: Arc<Orchestrator<M>>,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_replies(write_half, rx));

    let mut line = String::new();
    let mut reader = BufReader::new(read_half);
    let failed = match reader.read_line(&mut line).await {
        Ok(0) => return,
        Ok(_) => match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => {
                let mut sink = ReplySink { tx: tx.clone() };
                execute(&orchestrator, request, &mut sink).await
            }
            Err(e) => {
                warn!(error = %e, "malformed console request");
                let _ = tx.send(ControlReply::Output {
                    text: format!("Err: malformed console request: {e}\n"),
                });
                true
            }
        },
        Err(e) => {
            warn!(error = %e, "console read failed");
            return;
        }
    };

    let _ = tx.send(ControlReply::Done { failed });
    drop(tx);
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "console client went away"),
        Err(e) => warn!(error = %e, "console writer task failed"),
    }
}

async fn write_replies(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ControlReply>,
) -> io::Result<()> {
    while let Some(reply) = rx.recv().await {
        let mut frame = serde_json::to_vec(&reply).map_err(io::Error::other)?;
        frame.push(b'\n');
        writer.write_all(&frame).await?;
    }
    writer.flush().await
}

/// Hands command output to the connection's writer task without blocking.
struct ReplySink {
    tx: mpsc::UnboundedSender<ControlReply>,
}

impl Write for ReplySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf).into_owned();
        self.tx
            .send(ControlReply::Output { text })
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Connect to a running daemon. `None` when no daemon is listening.
pub async fn connect(socket_path: &Path) -> io::Result<Option<UnixStream>> {
    match UnixStream::connect(socket_path).await {
        Ok(stream) => Ok(Some(stream)),
        Err(e) if matches!(
            e.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
        ) =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Send `request` over `stream` and copy the daemon's output to `out`.
/// Returns whether the command failed.
pub async fn forward(
    stream: UnixStream,
    request: &ControlRequest,
    out: &mut (dyn Write + Send),
) -> io::Result<bool> {
    let (read_half, mut write_half) = stream.into_split();
    let mut frame = serde_json::to_vec(request).map_err(io::Error::other)?;
    frame.push(b'\n');
    write_half.write_all(&frame).await?;

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<ControlReply>(&line).map_err(io::Error::other)? {
            ControlReply::Output { text } => out.write_all(text.as_bytes())?,
            ControlReply::Done { failed } => {
                out.flush()?;
                return Ok(failed);
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "daemon closed the console connection early",
    ))
}
