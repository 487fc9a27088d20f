//! The backend: one protocol client bound to one `(source, binary)`
//! directory pair, sequencing configure/compute and holding the derived
//! project state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mortar_client::{ProtocolClient, RequestObservers};
use mortar_types::{
    BackendError, BackendEvent, CacheEntry, ClientError, ClientEvent, CodeModelContent,
    CompilationInfo, DisplayMessageContent, IncludeDir, TargetType, all_target_name,
};

use crate::flags::{parse_define, paths_equivalent, tokenize_flags};

fn forward_build_output<R>(stream: R, events: mpsc::Sender<BackendEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = events.send(BackendEvent::BuildOutput(line)).await;
        }
    });
}

/// Spawn a build command, stream its output, and wait for it, honoring
/// cancellation. The build tool fans out into its own children (make or
/// ninja, then compilers), so on Unix the command is put in a fresh
/// process group and the whole group is signalled on cancel.
async fn run_build_command(
    mut command: Command,
    events: &mpsc::Sender<BackendEvent>,
    cancel: &CancellationToken,
) -> Result<bool, BackendError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    // SAFETY: setsid() is async-signal-safe; it runs in the child before
    // exec and makes it the leader of a new process group.
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = command.spawn()?;

    if let Some(stdout) = child.stdout.take() {
        forward_build_output(stdout, events.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_build_output(stderr, events.clone());
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        () = cancel.cancelled() => {
            kill_build_tree(&mut child);
            let _ = child.wait().await;
            return Err(BackendError::Cancelled);
        }
    };
    Ok(status.success())
}

#[cfg(unix)]
fn kill_build_tree(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        // SAFETY: kill with a negative pid signals the whole process group,
        // whose id equals the child's pid thanks to setsid() at spawn.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    // No-op when already dead; transitions the handle to terminated.
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn kill_build_tree(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

/// One buildable target, as exposed to callers.
///
/// The synthetic "build everything" entry has no target type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTarget {
    pub name: String,
    pub target_type: Option<TargetType>,
}

/// A live backend. Created through the factory (or directly over a
/// started client); must be shut down explicitly, which consumes it.
pub struct Backend {
    client: ProtocolClient,
    client_events: mpsc::Receiver<ClientEvent>,
    event_tx: mpsc::Sender<BackendEvent>,
    cmake_path: PathBuf,
    source_dir: PathBuf,
    binary_dir: PathBuf,
    generator_name: String,
    /// Derived state: wholesale-replaced after each successful
    /// configure+compute cycle, so readers never see a partial snapshot.
    code_model: Option<CodeModelContent>,
    cache_entries: HashMap<String, CacheEntry>,
    has_configured: bool,
    dirty: bool,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("source_dir", &self.source_dir)
            .field("binary_dir", &self.binary_dir)
            .field("generator_name", &self.generator_name)
            .field("has_configured", &self.has_configured)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Wrap an already-started client. `has_configured` distinguishes a
    /// previously configured build directory (refresh failures are then
    /// hard errors) from a fresh one (empty derived state is tolerated).
    #[must_use]
    pub fn new(
        client: ProtocolClient,
        client_events: mpsc::Receiver<ClientEvent>,
        event_tx: mpsc::Sender<BackendEvent>,
        cmake_path: PathBuf,
        source_dir: PathBuf,
        binary_dir: PathBuf,
        generator_name: String,
        has_configured: bool,
    ) -> Self {
        Self {
            client,
            client_events,
            event_tx,
            cmake_path,
            source_dir,
            binary_dir,
            generator_name,
            code_model: None,
            cache_entries: HashMap::new(),
            has_configured,
            dirty: false,
        }
    }

    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    #[must_use]
    pub fn binary_dir(&self) -> &Path {
        &self.binary_dir
    }

    #[must_use]
    pub fn generator_name(&self) -> &str {
        &self.generator_name
    }

    #[must_use]
    pub fn cache_entries(&self) -> &HashMap<String, CacheEntry> {
        &self.cache_entries
    }

    #[must_use]
    pub fn code_model(&self) -> Option<&CodeModelContent> {
        self.code_model.as_ref()
    }

    /// Whether the server has signalled that the configuration is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Drain pending client events, up to `budget`. Non-blocking.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            match self.client_events.try_recv() {
                Ok(event) => {
                    self.handle_client_event(event);
                    count += 1;
                }
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        count
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Dirty => {
                self.dirty = true;
                let _ = self.event_tx.try_send(BackendEvent::Dirty);
            }
            ClientEvent::Exited { exit_code } => {
                let _ = self.event_tx.try_send(BackendEvent::ServerExited { exit_code });
            }
            ClientEvent::Closed { reason } => {
                tracing::debug!("server connection closed: {reason}");
            }
        }
    }

    /// Sidebands that forward progress and display messages as backend
    /// events for the duration of one request.
    fn forwarding_observers(&self) -> RequestObservers {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let progress_events = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                let _ = progress_events.send(BackendEvent::Progress(update)).await;
            }
        });

        let (message_tx, mut message_rx) = mpsc::unbounded_channel::<DisplayMessageContent>();
        let message_events = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = message_rx.recv().await {
                let _ = message_events
                    .send(BackendEvent::Message {
                        title: message.title,
                        message: message.message,
                    })
                    .await;
            }
        });

        RequestObservers {
            progress: Some(progress_tx),
            messages: Some(message_tx),
        }
    }

    /// Run configure then compute, strictly in that order, then refresh the
    /// derived state.
    ///
    /// A server-reported error resolves to `Ok(false)` (and suppresses the
    /// compute step); transport faults raise. Cancellation terminates the
    /// server process — after `Err(Cancelled)` the backend is unusable and
    /// should be shut down.
    pub async fn configure(
        &mut self,
        extra_args: &[String],
        cancel: &CancellationToken,
    ) -> Result<bool, BackendError> {
        let configure_result = tokio::select! {
            result = self.client.configure(extra_args, self.forwarding_observers()) => result,
            () = cancel.cancelled() => {
                self.client.shutdown().await;
                return Err(BackendError::Cancelled);
            }
        };
        if let Err(e) = configure_result {
            return match e {
                ClientError::Server(server_error) => {
                    tracing::warn!("configure failed: {server_error}");
                    Ok(false)
                }
                other => Err(other.into()),
            };
        }

        // Code model and target data are only valid after compute; it is
        // never skipped.
        let compute_result = tokio::select! {
            result = self.client.compute(self.forwarding_observers()) => result,
            () = cancel.cancelled() => {
                self.client.shutdown().await;
                return Err(BackendError::Cancelled);
            }
        };
        if let Err(e) = compute_result {
            return match e {
                ClientError::Server(server_error) => {
                    tracing::warn!("compute failed: {server_error}");
                    Ok(false)
                }
                other => Err(other.into()),
            };
        }

        let first_configure = !self.has_configured;
        self.refresh(first_configure).await?;
        self.has_configured = true;
        self.dirty = false;
        let _ = self.event_tx.send(BackendEvent::Reconfigured).await;
        Ok(true)
    }

    /// Re-fetch cache and code model and replace both wholesale. The two
    /// fetches are independent and run concurrently.
    async fn refresh(&mut self, tolerate_failure: bool) -> Result<(), BackendError> {
        let (cache, model) = tokio::join!(self.client.cache(), self.client.code_model());
        match (cache, model) {
            (Ok(cache), Ok(model)) => {
                self.cache_entries = cache.into_entries();
                self.code_model = Some(model);
                Ok(())
            }
            (cache, model) => {
                let error = cache
                    .err()
                    .or_else(|| model.err())
                    .unwrap_or(ClientError::Closed);
                if tolerate_failure {
                    // Never-configured projects may legitimately have no
                    // code model yet; leave the derived state empty.
                    tracing::warn!("state refresh failed on first configure: {error}");
                    Ok(())
                } else {
                    Err(error.into())
                }
            }
        }
    }

    /// All buildable targets: the synthetic all-target first, then every
    /// real target that has both a build directory and at least one
    /// artifact (interface-only targets are excluded).
    #[must_use]
    pub fn targets(&self) -> Vec<ProjectTarget> {
        let mut targets = vec![ProjectTarget {
            name: all_target_name(&self.generator_name).to_string(),
            target_type: None,
        }];
        let Some(model) = &self.code_model else {
            return targets;
        };
        let mut seen = HashSet::new();
        for configuration in &model.configurations {
            for project in &configuration.projects {
                for target in &project.targets {
                    if target.build_directory.is_none() || target.artifacts.is_empty() {
                        continue;
                    }
                    if seen.insert(target.name.clone()) {
                        targets.push(ProjectTarget {
                            name: target.name.clone(),
                            target_type: Some(target.target_type),
                        });
                    }
                }
            }
        }
        targets
    }

    /// Compile settings for one source file, projected from the cached
    /// code model's first configuration. Pure lookup; no IO.
    #[must_use]
    pub fn compilation_info_for_file(&self, file: &Path) -> Option<CompilationInfo> {
        let configuration = self.code_model.as_ref()?.configurations.first()?;
        for project in &configuration.projects {
            for target in &project.targets {
                let base = target
                    .source_directory
                    .as_deref()
                    .or(project.source_directory.as_deref())
                    .unwrap_or(&self.source_dir);
                for group in &target.file_groups {
                    for source in &group.sources {
                        let absolute = if source.is_absolute() {
                            source.clone()
                        } else {
                            base.join(source)
                        };
                        if paths_equivalent(&absolute, file) {
                            return Some(CompilationInfo {
                                file: absolute,
                                language: group.language.clone(),
                                compile_flags: tokenize_flags(&group.compile_flags),
                                defines: group.defines.iter().map(|d| parse_define(d)).collect(),
                                include_dirs: group
                                    .include_path
                                    .iter()
                                    .map(|include| IncludeDir {
                                        path: include.path.clone(),
                                        is_system: include.is_system,
                                    })
                                    .collect(),
                            });
                        }
                    }
                }
            }
        }
        None
    }

    /// Run the native build tool for `target` via the server executable's
    /// build driver. Output lines are forwarded as
    /// [`BackendEvent::BuildOutput`]; cancellation kills the build process.
    pub async fn build(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, BackendError> {
        let mut command = Command::new(&self.cmake_path);
        command
            .arg("--build")
            .arg(&self.binary_dir)
            .arg("--target")
            .arg(target);
        run_build_command(command, &self.event_tx, cancel).await
    }

    /// Terminate the protocol client and its child process. Consumes the
    /// backend; it cannot be reused afterwards.
    pub async fn shutdown(mut self) {
        self.client.shutdown().await;
    }
}
