//! Control socket: server (during `tqm serve`) and client (every other command).
//! Protocol: newline-delimited JSON; one `Request` line in, one `Response`
//! line out. After `subscribe` the connection carries `Event` lines.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tqm_core::api::{handle_request, Request, Response};
use tqm_core::events::Event;
use tqm_core::scheduler::SchedulerHandle;

/// Binds `path` (replacing a stale socket file) and serves every connection
/// on its own task.
pub fn spawn_control_listener(handle: SchedulerHandle, path: &Path) -> Result<JoinHandle<()>> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create socket dir {}", dir.display()))?;
    }
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    tracing::debug!(path = %path.display(), "control socket listening");

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(handle, stream).await {
                            tracing::debug!("control connection ended: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    }))
}

async fn write_line<T: serde::Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

async fn serve_connection(handle: SchedulerHandle, stream: UnixStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req = match Request::parse_line(&line) {
            Ok(req) => req,
            Err(e) => {
                write_line(&mut write, &Response::error(format!("bad request: {}", e))).await?;
                continue;
            }
        };
        if req == Request::Subscribe {
            write_line(&mut write, &Response::ok()).await?;
            return stream_events(&handle, &mut write).await;
        }
        let resp = handle_request(&handle, req).await;
        write_line(&mut write, &resp).await?;
    }
    Ok(())
}

/// Forward push events until the client goes away or the hub drops us.
async fn stream_events(handle: &SchedulerHandle, write: &mut OwnedWriteHalf) -> Result<()> {
    let mut events = handle.subscribe();
    while let Some(event) = events.recv().await {
        write_line(write, &event).await?;
    }
    Ok(())
}

/// One connection to a running `tqm serve`.
pub struct ControlClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
    path: PathBuf,
}

impl ControlClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await.with_context(|| {
            format!("connect to {} (is `tqm serve` running?)", path.display())
        })?;
        let (read, write) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            write,
            path: path.to_path_buf(),
        })
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }

    /// Send one request and wait for its response line.
    pub async fn request(&mut self, req: &Request) -> Result<Response> {
        write_line(&mut self.write, req).await?;
        let line = self
            .read_line()
            .await?
            .with_context(|| format!("{} closed the connection", self.path.display()))?;
        let resp = serde_json::from_str(&line).context("malformed response")?;
        Ok(resp)
    }

    /// Switch this connection to the event stream.
    pub async fn subscribe(&mut self) -> Result<()> {
        let resp = self.request(&Request::Subscribe).await?;
        if !resp.ok {
            bail!(resp.error.unwrap_or_else(|| "subscribe refused".to_string()));
        }
        Ok(())
    }

    /// Next pushed event; `None` once the server closes the stream.
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        match self.read_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line).context("malformed event")?)),
            None => Ok(None),
        }
    }
}

/// Connect, send `req` and turn an `ok: false` answer into an error.
pub async fn call(path: &Path, req: &Request) -> Result<Response> {
    let mut client = ControlClient::connect(path).await?;
    let resp = client.request(req).await?;
    if !resp.ok {
        bail!(resp.error.unwrap_or_else(|| "request failed".to_string()));
    }
    Ok(resp)
}
