//! Local demonstration transfer.
//!
//! Starts two endpoints on an in-process broker, connects them and sends
//! the given files from one to the other. Received files are written into a
//! fresh session directory under the output directory.

use std::{
    collections::{HashMap, HashSet},
    ffi::OsStr,
    fs,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, warn};
use uuid::Uuid;
use zap_core::{
    ConnectionIssue, Data, EndpointId, File, LocalBroker, LocalTransport,
    PeersEvent, ProgressSink, ReceivedEvent, ReceivingEvent, Supervisor,
    SupervisorConfig, SupervisorSubscriber, TransferStatus, TransferUpdate,
};

use crate::config::resolve_output_dir;

#[derive(Clone, Debug, clap::Args)]
#[clap(name = "demo", about = "Send files between two local endpoints")]
pub struct Demo {
    #[clap(value_parser, required = true, help = "List of file paths to send")]
    files: Vec<PathBuf>,
    #[clap(long, short, help = "Directory to write received files to")]
    out: Option<PathBuf>,
    #[clap(
        long,
        action,
        help = "Remember --out as the default output directory"
    )]
    save_dir: bool,
    #[clap(long, short, action, help = "Show debug logs")]
    pub(crate) verbose: bool,
}

impl Demo {
    pub async fn run(&self) -> Result<()> {
        let files = open_files(&self.files)?;
        let output_dir = resolve_output_dir(self.out.clone(), self.save_dir)?;
        let report = run_demo(files, output_dir, self.verbose).await?;

        println!("\nFiles written to: {}", report.session_dir.display());
        for result in &report.results {
            match &result.failure {
                None => {
                    println!("  [DONE] {} ({} bytes)", result.name, result.size)
                }
                Some(reason) => {
                    println!("  [FAILED] {}: {}", result.name, reason)
                }
            }
        }
        let failed = report.failed();
        if failed > 0 {
            return Err(anyhow!(
                "{failed} of {} files failed to transfer",
                report.results.len()
            ));
        }
        println!("All files transferred successfully!");
        Ok(())
    }
}

/// Outcome of one file in a demo run.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub name: String,
    pub size: u64,
    pub failure: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DemoReport {
    pub session_dir: PathBuf,
    pub results: Vec<FileResult>,
}

impl DemoReport {
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.failure.is_some())
            .count()
    }
}

/// Validates `paths` and opens each as a disk-backed [`File`].
///
/// Errors:
/// - If the list is empty, or a path is missing or not a regular file.
/// - If two paths share a file name, since transfers are keyed by name.
pub fn open_files(paths: &[PathBuf]) -> Result<Vec<File>> {
    if paths.is_empty() {
        return Err(anyhow!("Cannot send an empty list of files"));
    }

    let mut names = HashSet::new();
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if !path.exists() {
            return Err(anyhow!("File does not exist: {}", path.display()));
        }
        if !path.is_file() {
            return Err(anyhow!("Path is not a file: {}", path.display()));
        }
        let name = path
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| anyhow!("Invalid file name: {}", path.display()))?
            .to_string();
        if !names.insert(name.clone()) {
            return Err(anyhow!("Duplicate file name: {name}"));
        }
        let data = DiskData::open(path.clone())?;
        files.push(File::new(name, Arc::new(data)));
    }
    Ok(files)
}

/// Sends `files` between two fresh local endpoints and writes what arrives
/// into a new session directory under `output_dir`.
pub async fn run_demo(
    files: Vec<File>,
    output_dir: PathBuf,
    verbose: bool,
) -> Result<DemoReport> {
    if !output_dir.exists() {
        fs::create_dir_all(&output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_dir.display()
            )
        })?;
    }
    let session_dir = output_dir.join(Uuid::new_v4().to_string());
    fs::create_dir(&session_dir).with_context(|| {
        format!("Failed to create session directory: {}", session_dir.display())
    })?;

    let broker = LocalBroker::new();
    let config = SupervisorConfig::default();
    let sender = Supervisor::start(broker.transport(), config.clone())
        .await
        .context("Failed to start sending endpoint")?;
    let receiver = Supervisor::start(broker.transport(), config)
        .await
        .context("Failed to start receiving endpoint")?;

    let mp = MultiProgress::new();
    let writer =
        Arc::new(FileWriter::new(session_dir.clone(), mp.clone(), verbose));
    receiver.subscribe(writer.clone());
    println!("Sender:   {}", sender.local_id());
    println!("Receiver: {}", receiver.local_id());

    let progress = Arc::new(SendProgress::new(mp.clone(), &files));
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("Cancelling file transfer...");
            for file in &files {
                sender.cancel_transfer(&file.name, receiver.local_id());
            }
            Err(anyhow!("Transfer cancelled"))
        }
        result = transfer(
            &sender,
            receiver.local_id(),
            &files,
            progress.clone(),
            &writer,
        ) => result,
    };

    sender.shutdown().await;
    receiver.shutdown().await;
    outcome?;

    let results = files
        .iter()
        .map(|file| FileResult {
            name: file.name.clone(),
            size: file.len(),
            failure: progress
                .failure(&file.name)
                .or_else(|| writer.failure(&file.name)),
        })
        .collect();
    Ok(DemoReport {
        session_dir,
        results,
    })
}

async fn transfer(
    sender: &Supervisor<LocalTransport>,
    remote: &EndpointId,
    files: &[File],
    progress: Arc<SendProgress>,
    writer: &FileWriter,
) -> Result<()> {
    sender
        .connect_with_timeout(remote)
        .await
        .with_context(|| format!("Failed to connect to {remote}"))?;
    sender
        .send_files(remote, files, progress.clone())
        .await
        .context("Failed to send files")?;

    // Confirmation can reach the sender before the receiver has written
    // the file, so wait for both sides.
    loop {
        let resolved = progress.resolved();
        let completed = progress.completed();
        if resolved == files.len() && writer.handled() >= completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        concat!(
            "{spinner:.green} {msg} [{bar:40.cyan/blue}] ",
            "{bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        ),
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-")
}

/// Per-file send progress bars, fed by the supervisor's progress updates.
struct SendProgress {
    mp: MultiProgress,
    sizes: HashMap<String, u64>,
    bars: RwLock<HashMap<String, ProgressBar>>,
    terminal: RwLock<HashMap<String, TransferUpdate>>,
}

impl SendProgress {
    fn new(mp: MultiProgress, files: &[File]) -> Self {
        Self {
            mp,
            sizes: files
                .iter()
                .map(|file| (file.name.clone(), file.len()))
                .collect(),
            bars: RwLock::new(HashMap::new()),
            terminal: RwLock::new(HashMap::new()),
        }
    }

    fn resolved(&self) -> usize {
        self.terminal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn completed(&self) -> usize {
        self.terminal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|update| update.status == TransferStatus::Complete)
            .count()
    }

    fn failure(&self, name: &str) -> Option<String> {
        let terminal =
            self.terminal.read().unwrap_or_else(PoisonError::into_inner);
        match terminal.get(name) {
            Some(update) if update.status == TransferStatus::Error => Some(
                update
                    .reason
                    .clone()
                    .unwrap_or_else(|| "transfer failed".to_string()),
            ),
            Some(_) => None,
            None => Some("transfer never finished".to_string()),
        }
    }
}

impl ProgressSink for SendProgress {
    fn notify(&self, update: TransferUpdate) {
        let size = self.sizes.get(&update.file_name).copied().unwrap_or(0);
        let mut bars =
            self.bars.write().unwrap_or_else(PoisonError::into_inner);
        let pb = bars.entry(update.file_name.clone()).or_insert_with(|| {
            let pb = self.mp.add(ProgressBar::new(size));
            pb.set_style(bar_style());
            pb.set_message(format!("Sending {}", update.file_name));
            pb
        });

        pb.set_position((size as f64 * update.progress / 100.0).round() as u64);
        match update.status {
            TransferStatus::Sending => {}
            TransferStatus::Complete => {
                pb.finish_with_message(format!(
                    "[DONE] Sent {}",
                    update.file_name
                ));
            }
            TransferStatus::Error => {
                let reason =
                    update.reason.as_deref().unwrap_or("unknown error");
                pb.abandon_with_message(format!(
                    "[FAILED] {}: {reason}",
                    update.file_name
                ));
            }
        }
        drop(bars);

        if update.status.is_terminal() {
            self.terminal
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(update.file_name.clone(), update);
        }
    }
}

/// Writes files delivered to the receiving endpoint and shows their
/// progress.
struct FileWriter {
    id: String,
    dir: PathBuf,
    verbose: bool,
    mp: MultiProgress,
    bars: RwLock<HashMap<String, ProgressBar>>,
    failures: RwLock<HashMap<String, String>>,
    handled: AtomicUsize,
}

impl FileWriter {
    fn new(dir: PathBuf, mp: MultiProgress, verbose: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dir,
            verbose,
            mp,
            bars: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            handled: AtomicUsize::new(0),
        }
    }

    /// Delivered files written or failed so far.
    fn handled(&self) -> usize {
        self.handled.load(Ordering::Acquire)
    }

    fn failure(&self, name: &str) -> Option<String> {
        self.failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn log(&self, message: String) {
        if self.verbose {
            let _ = self.mp.println(format!("[DEBUG] {message}"));
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(safe_file_name(name));
        fs::write(&path, bytes)
            .with_context(|| {
                format!("Failed to write file: {}", path.display())
            })?;
        Ok(path)
    }
}

impl SupervisorSubscriber for FileWriter {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    fn notify_peers(&self, event: PeersEvent) {
        let ids: Vec<String> = event
            .peers
            .iter()
            .map(|peer| peer.id.to_string())
            .collect();
        self.log(format!("Connected peers: [{}]", ids.join(", ")));
    }

    fn notify_receiving(&self, event: ReceivingEvent) {
        let mut bars =
            self.bars.write().unwrap_or_else(PoisonError::into_inner);
        for file in &event.files {
            let pb = bars.entry(file.name.clone()).or_insert_with(|| {
                let pb = self.mp.add(ProgressBar::new(file.size));
                pb.set_style(bar_style());
                pb.set_message(format!("Receiving {}", file.name));
                pb
            });
            if file.total_chunks > 0 {
                let received =
                    file.size * file.received_chunks / file.total_chunks;
                pb.set_position(received);
            }
        }
    }

    fn notify_received(&self, event: ReceivedEvent) {
        let name = event.file.name.clone();
        match self.write(&name, &event.file.bytes) {
            Ok(path) => {
                debug!(
                    file = %name,
                    path = %path.display(),
                    "Wrote received file"
                );
                if let Some(pb) = self
                    .bars
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&name)
                {
                    pb.set_position(event.file.len());
                    pb.finish_with_message(format!("[DONE] Received {name}"));
                }
            }
            Err(err) => {
                warn!(file = %name, "{err:#}");
                let _ = self.mp.println(format!("[ERROR] {err:#}"));
                self.failures
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name, format!("{err:#}"));
            }
        }
        self.handled.fetch_add(1, Ordering::AcqRel);
    }

    fn notify_connection_issue(&self, issue: ConnectionIssue) {
        let _ = self.mp.println(format!("[WARN] {}", issue.user_message()));
    }
}

/// Keeps only the last path component so a peer cannot write outside the
/// session directory.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(OsStr::to_str)
        .filter(|name| !name.is_empty())
        .unwrap_or("unnamed")
        .to_string()
}

/// [`Data`] read from disk with positioned reads.
struct DiskData {
    path: PathBuf,
    size: u64,
    file: Mutex<fs::File>,
}

impl DiskData {
    fn open(path: PathBuf) -> Result<Self> {
        let file = fs::File::open(&path)
            .with_context(|| {
                format!("Failed to open file: {}", path.display())
            })?;
        let size = file
            .metadata()
            .with_context(|| {
                format!("Failed to get metadata for file: {}", path.display())
            })?
            .len();
        Ok(Self {
            path,
            size,
            file: Mutex::new(file),
        })
    }
}

impl Data for DiskData {
    fn len(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let end = offset.checked_add(len as u64);
        if end.is_none_or(|end| end > self.size) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {offset}+{len} exceeds {} ({} bytes)",
                    self.path.display(),
                    self.size
                ),
            ));
        }
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
