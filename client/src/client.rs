//! The protocol client: owns the codec, the transport and the correlation
//! table, and exposes one typed request method per message kind.
//!
//! Startup walks Spawning → AwaitingHello → Handshaking → Ready, with a
//! failure edge at every step. `start()` settles exactly once: each await
//! races the request path against the child's exit watch in one `select!`,
//! so a crash and a pipe error can never both report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use mortar_types::{
    CMakeInputsContent, CacheContent, ClientError, ClientEvent, CodeModelContent, Generator,
    GlobalSettingsContent, HandshakeParams, HelloContent, IncomingMessage, ProgressUpdate,
    SIGNAL_DIRTY, SIGNAL_FILE_CHANGE, StartupError,
};

use crate::codec::{FrameReader, FrameWriter};
use crate::correlation::{CorrelationTable, RequestObservers, generate_cookie};
use crate::transport::{self, ExitInfo, ServerProcess};

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Parameters for starting one client against one build directory.
#[derive(Debug, Clone)]
pub struct StartParams {
    /// Path to the cmake executable to run in server mode.
    pub cmake_path: PathBuf,
    pub build_dir: PathBuf,
    /// Required for first-time configuration of a new build directory; for
    /// an existing one it must match the originally configured path
    /// byte-for-byte.
    pub source_dir: Option<PathBuf>,
    /// Only meaningful for first-time configuration.
    pub generator: Option<Generator>,
    /// Pipe path override; a fresh temp path is chosen when absent.
    pub pipe_path: Option<PathBuf>,
    /// Extra environment variables for the server process.
    pub environment: Vec<(String, String)>,
}

impl StartParams {
    #[must_use]
    pub fn new(cmake_path: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            cmake_path: cmake_path.into(),
            build_dir: build_dir.into(),
            source_dir: None,
            generator: None,
            pipe_path: None,
            environment: Vec::new(),
        }
    }
}

enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// A ready protocol client. One client, one child process, one transport;
/// requests may be issued concurrently and interleave on the wire.
pub struct ProtocolClient {
    writer_tx: mpsc::Sender<WriterCommand>,
    table: Arc<CorrelationTable>,
    process: Option<ServerProcess>,
    protocol_version: mortar_types::ProtocolVersion,
    #[allow(dead_code)]
    reader_handle: JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: JoinHandle<()>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("protocol_version", &self.protocol_version)
            .field("managed_process", &self.process.is_some())
            .finish_non_exhaustive()
    }
}

fn default_pipe_path() -> PathBuf {
    let tag = generate_cookie();
    #[cfg(windows)]
    {
        PathBuf::from(format!(r"\\.\pipe\mortar-{tag}"))
    }
    #[cfg(not(windows))]
    {
        std::env::temp_dir().join(format!("mortar-{tag}.sock"))
    }
}

/// Message types the client consumes. Anything else is dropped as
/// forward-compatibility; a *known* type with a malformed body is fatal.
const MESSAGE_TYPES: &[&str] = &["hello", "reply", "error", "progress", "message", "signal"];

async fn dispatch(
    value: Value,
    table: &CorrelationTable,
    event_tx: &mpsc::Sender<ClientEvent>,
    hello_slot: &mut Option<oneshot::Sender<HelloContent>>,
) -> Result<(), ClientError> {
    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => {
            return Err(ClientError::Protocol(
                "server message without a type field".to_string(),
            ));
        }
    };
    if !MESSAGE_TYPES.contains(&kind.as_str()) {
        // Unknown `type` tags are forward-compatibility, not faults.
        tracing::debug!("ignoring unrecognized message type '{kind}'");
        return Ok(());
    }
    // A known tag that fails to parse would otherwise strand its caller:
    // the terminal message for some cookie may just have been lost.
    let message: IncomingMessage = serde_json::from_value(value)
        .map_err(|e| ClientError::Protocol(format!("malformed {kind} message: {e}")))?;
    match message {
        IncomingMessage::Hello(hello) => match hello_slot.take() {
            Some(tx) => {
                let _ = tx.send(hello);
            }
            None => tracing::debug!("unexpected hello after startup, ignoring"),
        },
        IncomingMessage::Reply(reply) => table.resolve(reply).await,
        IncomingMessage::Error(error) => table.reject(error).await,
        IncomingMessage::Progress(progress) => {
            let cookie = progress.cookie.clone();
            table
                .on_progress(&cookie, ProgressUpdate::from(progress))
                .await;
        }
        IncomingMessage::Message(message) => table.on_message(message).await,
        IncomingMessage::Signal(signal) => match signal.name.as_str() {
            SIGNAL_DIRTY => {
                let _ = event_tx.send(ClientEvent::Dirty).await;
            }
            SIGNAL_FILE_CHANGE => {
                tracing::trace!("fileChange signal received, no consumer yet");
            }
            other => tracing::debug!("unknown signal '{other}', ignoring"),
        },
    }
    Ok(())
}

/// Wait on an optional exit watch; pends forever when there is no process
/// (in-memory transports).
async fn wait_exit(exit_rx: &mut Option<watch::Receiver<Option<ExitInfo>>>) -> ExitInfo {
    match exit_rx {
        Some(rx) => match rx.wait_for(Option::is_some).await {
            Ok(guard) => (*guard).unwrap_or_default(),
            Err(_) => ExitInfo::default(),
        },
        None => std::future::pending().await,
    }
}

impl ProtocolClient {
    /// Spawn the server, connect, and run the startup handshake.
    ///
    /// Unsolicited events (dirty signals, transport close, process exit)
    /// are delivered on `event_tx` for the lifetime of the client.
    pub async fn start(
        params: StartParams,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Result<Self, ClientError> {
        let pipe_path = params
            .pipe_path
            .clone()
            .unwrap_or_else(default_pipe_path);
        let (process, stream) =
            transport::spawn_server(&params.cmake_path, &pipe_path, &params.environment).await?;
        Self::start_on(stream, Some(process), &params, event_tx).await
    }

    /// Run the startup sequence over an already-connected duplex stream.
    ///
    /// There is no child process to supervise; crash handling is reduced to
    /// observing the end of the stream. Intended for tests and custom
    /// transports.
    pub async fn start_over_stream<S>(
        stream: S,
        params: &StartParams,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::start_on(stream, None, params, event_tx).await
    }

    async fn start_on<S>(
        stream: S,
        process: Option<ServerProcess>,
        params: &StartParams,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let table = Arc::new(CorrelationTable::new());
        let (hello_tx, hello_rx) = oneshot::channel();
        let (writer_tx, reader_handle, writer_handle) =
            wire(stream, Arc::clone(&table), event_tx.clone(), hello_tx);

        // Forward process exit as an event for post-handshake observers.
        if let Some(process) = &process {
            let mut exit_rx = process.exit_watch();
            let exit_event_tx = event_tx.clone();
            tokio::spawn(async move {
                // The watch guard must not live across the send await.
                let info = match exit_rx.wait_for(Option::is_some).await {
                    Ok(guard) => (*guard).unwrap_or_default(),
                    Err(_) => return,
                };
                let _ = exit_event_tx
                    .send(ClientEvent::Exited {
                        exit_code: info.exit_code,
                    })
                    .await;
            });
        }

        let mut client = Self {
            writer_tx,
            table,
            process,
            protocol_version: mortar_types::ProtocolVersion { major: 1, minor: 0 },
            reader_handle,
            writer_handle,
        };

        match client.handshake(hello_rx, params).await {
            Ok(()) => Ok(client),
            Err(e) => {
                // Tear down the child so a failed start leaks nothing.
                client.shutdown().await;
                Err(e)
            }
        }
    }

    /// AwaitingHello → Handshaking → Ready.
    async fn handshake(
        &mut self,
        hello_rx: oneshot::Receiver<HelloContent>,
        params: &StartParams,
    ) -> Result<(), ClientError> {
        let mut exit_rx = self.process.as_ref().map(ServerProcess::exit_watch);

        let hello = tokio::select! {
            hello = hello_rx => hello.map_err(|_| {
                ClientError::Startup(StartupError {
                    message: "connection closed before hello".to_string(),
                    exit_code: None,
                })
            })?,
            info = wait_exit(&mut exit_rx) => {
                return Err(StartupError {
                    message: "cmake server exited before sending hello".to_string(),
                    exit_code: info.exit_code,
                }
                .into());
            }
            () = tokio::time::sleep(HELLO_TIMEOUT) => {
                return Err(StartupError {
                    message: "timed out waiting for hello".to_string(),
                    exit_code: None,
                }
                .into());
            }
        };

        // The handshake pins the first advertised version pair.
        let version = hello
            .supported_protocol_versions
            .first()
            .copied()
            .ok_or_else(|| {
                ClientError::Protocol("hello advertised no protocol versions".to_string())
            })?;
        self.protocol_version = version;

        let handshake = HandshakeParams::new(
            version,
            params.build_dir.clone(),
            params.source_dir.clone(),
            params.generator.as_ref(),
        );
        let handshake_params = match serde_json::to_value(&handshake) {
            Ok(Value::Object(map)) => map,
            _ => return Err(ClientError::Protocol("unserializable handshake".to_string())),
        };

        tokio::select! {
            result = self.request("handshake", handshake_params, RequestObservers::none()) => {
                result.map(|_| ())
            }
            info = wait_exit(&mut exit_rx) => {
                Err(StartupError {
                    message: "cmake server exited during handshake".to_string(),
                    exit_code: info.exit_code,
                }
                .into())
            }
        }
    }

    /// Protocol version agreed at handshake.
    #[must_use]
    pub fn protocol_version(&self) -> mortar_types::ProtocolVersion {
        self.protocol_version
    }

    /// Send one cookied request and await its terminal message.
    ///
    /// Never fails synchronously for protocol reasons: every outcome is the
    /// returned future settling.
    pub(crate) async fn request(
        &self,
        kind: &str,
        mut params: Map<String, Value>,
        observers: RequestObservers,
    ) -> Result<Map<String, Value>, ClientError> {
        let cookie = generate_cookie();
        params.insert("type".to_string(), Value::String(kind.to_string()));
        params.insert("cookie".to_string(), Value::String(cookie.clone()));

        let reply_rx = self.table.register(cookie.clone(), observers).await;

        if self
            .writer_tx
            .send(WriterCommand::Send(Value::Object(params)))
            .await
            .is_err()
        {
            // Writer gone: don't leak the pending entry.
            self.table.remove(&cookie).await;
            return Err(ClientError::Closed);
        }

        match reply_rx.await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(server_error)) => Err(ClientError::Server(server_error)),
            Err(_) => Err(ClientError::Closed),
        }
    }

    fn typed<T: serde::de::DeserializeOwned>(
        kind: &str,
        content: Map<String, Value>,
    ) -> Result<T, ClientError> {
        serde_json::from_value(Value::Object(content))
            .map_err(|e| ClientError::Protocol(format!("malformed {kind} reply: {e}")))
    }

    pub async fn global_settings(&self) -> Result<GlobalSettingsContent, ClientError> {
        let content = self
            .request("globalSettings", Map::new(), RequestObservers::none())
            .await?;
        Self::typed("globalSettings", content)
    }

    /// Set server-side settings; keys are passed through unvalidated.
    pub async fn set_global_settings(
        &self,
        settings: Map<String, Value>,
    ) -> Result<(), ClientError> {
        self.request("setGlobalSettings", settings, RequestObservers::none())
            .await
            .map(|_| ())
    }

    /// Run the configure step. `cache_arguments` are `-D`-style strings
    /// passed through without validation.
    pub async fn configure(
        &self,
        cache_arguments: &[String],
        observers: RequestObservers,
    ) -> Result<(), ClientError> {
        let mut params = Map::new();
        params.insert(
            "cacheArguments".to_string(),
            Value::from(cache_arguments.to_vec()),
        );
        self.request("configure", params, observers).await.map(|_| ())
    }

    /// Run the compute (generate) step. Only valid after a successful
    /// configure.
    pub async fn compute(&self, observers: RequestObservers) -> Result<(), ClientError> {
        self.request("compute", Map::new(), observers)
            .await
            .map(|_| ())
    }

    pub async fn code_model(&self) -> Result<CodeModelContent, ClientError> {
        let content = self
            .request("codemodel", Map::new(), RequestObservers::none())
            .await?;
        Self::typed("codemodel", content)
    }

    pub async fn cmake_inputs(&self) -> Result<CMakeInputsContent, ClientError> {
        let content = self
            .request("cmakeInputs", Map::new(), RequestObservers::none())
            .await?;
        Self::typed("cmakeInputs", content)
    }

    pub async fn cache(&self) -> Result<CacheContent, ClientError> {
        let content = self
            .request("cache", Map::new(), RequestObservers::none())
            .await?;
        Self::typed("cache", content)
    }

    /// Exit info if the server process has already terminated.
    #[must_use]
    pub fn server_exit_info(&self) -> Option<ExitInfo> {
        self.process.as_ref().and_then(ServerProcess::exit_info)
    }

    /// Terminate the child process and release the transport. Idempotent:
    /// safe to await after the process already exited.
    pub async fn shutdown(&mut self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        if let Some(mut process) = self.process.take() {
            process.shutdown().await;
        }
        self.table.close_all().await;
    }
}

/// Split the stream and start the reader/writer tasks.
fn wire<S>(
    stream: S,
    table: Arc<CorrelationTable>,
    event_tx: mpsc::Sender<ClientEvent>,
    hello_tx: oneshot::Sender<HelloContent>,
) -> (mpsc::Sender<WriterCommand>, JoinHandle<()>, JoinHandle<()>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);

    let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
    let writer_handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(write_half);
        while let Some(command) = writer_rx.recv().await {
            match command {
                WriterCommand::Send(frame) => {
                    if let Err(e) = writer.write_frame(&frame).await {
                        tracing::warn!("server pipe write error: {e}");
                        break;
                    }
                }
                WriterCommand::Shutdown => break,
            }
        }
    });

    let reader_handle = tokio::spawn(async move {
        let mut reader = FrameReader::new(read_half);
        let mut hello_slot = Some(hello_tx);
        loop {
            match reader.read_frame().await {
                Ok(Some(value)) => {
                    if let Err(e) = dispatch(value, &table, &event_tx, &mut hello_slot).await {
                        tracing::warn!("fatal protocol error, closing connection: {e}");
                        let _ = event_tx
                            .send(ClientEvent::Closed {
                                reason: e.to_string(),
                            })
                            .await;
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("cmake server closed the connection");
                    let _ = event_tx
                        .send(ClientEvent::Closed {
                            reason: "server closed the connection".to_string(),
                        })
                        .await;
                    break;
                }
                Err(e) => {
                    // Framing or parse failure: resynchronization is not
                    // possible, abort the connection.
                    tracing::warn!("fatal protocol error, closing connection: {e:#}");
                    let _ = event_tx
                        .send(ClientEvent::Closed {
                            reason: format!("{e:#}"),
                        })
                        .await;
                    break;
                }
            }
        }
        // Fail outstanding requests so their callers observe the close.
        table.close_all().await;
    });

    (writer_tx, reader_handle, writer_handle)
}
