//! CLI command implementations

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use digest_store::{DigestStore, Handle, HashAlgorithm, IngestOptions, StoreConfig, StreamStore};
use stream_monitor::PrintReporter;
use stream_pipe::{stderr_sink, stdin_source, stdout_sink, Pipe, ReadSource, WriteSink};
use tracing::{debug, warn};

/// How long to keep draining a child's output after it exits. Grandchildren
/// can hold the pipes open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Work out the store configuration: config file, else environment, then
/// command-line overrides.
pub fn resolve_config(
    config_file: Option<&Path>,
    root: Option<PathBuf>,
    hash: Option<&str>,
) -> Result<StoreConfig> {
    let mut config = match config_file {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::from_env()?,
    };

    if let Some(root) = root {
        config.root = root;
    }
    if let Some(hash) = hash {
        config.hash = hash.parse::<HashAlgorithm>()?;
    }
    Ok(config)
}

pub fn open_store(config: StoreConfig) -> Result<DigestStore> {
    let root = config.root.clone();
    DigestStore::new(config)
        .with_context(|| format!("Failed to open store at {}", root.display()))
}

fn parse_handle(id: &str) -> Result<Handle> {
    id.parse::<Handle>()
        .with_context(|| format!("'{}' is not a valid identification", id))
}

/// Store a file, or stdin when no file is given, and print the identification
pub fn ingest(
    store: &DigestStore,
    file: Option<&Path>,
    progress: bool,
    out: &mut impl Write,
) -> Result<()> {
    let (label, mut input): (String, Box<dyn Read>) = match file {
        Some(path) => (
            path.display().to_string(),
            Box::new(
                File::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            ),
        ),
        None => ("stdin".to_string(), Box::new(io::stdin().lock())),
    };

    let reporter = PrintReporter::new(io::stderr());
    let mut options = IngestOptions::new().label(&label);
    if progress {
        options = options.reporter(&reporter);
    }

    let handle = store
        .ingest_with(&mut input, options)
        .with_context(|| format!("Failed to store {}", label))?;
    writeln!(out, "{}", handle)?;
    Ok(())
}

/// Copy a stored object to `out`
pub fn cat(store: &DigestStore, id: &str, out: &mut impl Write) -> Result<()> {
    let handle = parse_handle(id)?;
    let mut object = store.open(&handle)?;
    io::copy(&mut object, out).context("Failed to write object")?;
    Ok(())
}

/// Print the file URL of a stored object
pub fn locate(store: &DigestStore, id: &str, out: &mut impl Write) -> Result<()> {
    let handle = parse_handle(id)?;
    writeln!(out, "{}", store.locate(&handle)?)?;
    Ok(())
}

/// Print every identification in the store, one per line
pub fn list(store: &DigestStore, out: &mut impl Write) -> Result<()> {
    for handle in store.handles()? {
        writeln!(out, "{}", handle)?;
    }
    Ok(())
}

/// Run `program` with its stdio wired to ours through pipes.
///
/// Returns the child's exit code; a child killed by a signal counts as 1.
pub fn exec(program: &str, args: &[String]) -> Result<i32> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;

    let child_stdin = child.stdin.take().context("child stdin was not captured")?;
    let child_stdout = child.stdout.take().context("child stdout was not captured")?;
    let child_stderr = child.stderr.take().context("child stderr was not captured")?;

    let out = Pipe::new(ReadSource::shared(child_stdout), stdout_sink());
    out.start(&format!("{} stdout", program))?;
    let err = Pipe::new(ReadSource::shared(child_stderr), stderr_sink());
    err.start(&format!("{} stderr", program))?;
    let mut input = Some(Pipe::new(stdin_source(), WriteSink::shared(child_stdin)));
    if let Some(pipe) = &input {
        pipe.start(&format!("{} stdin", program))?;
    }

    let status = loop {
        if let Some(status) = child.try_wait().context("Failed to wait for child")? {
            break status;
        }
        // Our stdin ended: drop the child's stdin so it sees end of stream too.
        if input.as_ref().and_then(Pipe::pump).is_some_and(|p| p.is_terminated()) {
            debug!("stdin closed, closing child stdin");
            input = None;
        }
        thread::sleep(POLL_INTERVAL);
    };
    drop(input);

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while !(drained(&out) && drained(&err)) {
        if Instant::now() >= deadline {
            warn!("child output still open after exit, not waiting for it");
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    debug!(%status, "child exited");
    Ok(status.code().unwrap_or(1))
}

fn drained(pipe: &Pipe) -> bool {
    pipe.pump().map_or(true, |pump| pump.is_terminated())
}
