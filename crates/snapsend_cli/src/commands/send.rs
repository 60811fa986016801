//! Send command implementation.

use crate::image::Image;
use snapsend_core::{SendConfig, SendRequest, SendSession, SendStats};
use snapsend_stream::{Sink, WriteSink};
use snapsend_tree::{MemFs, MemTree};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Arguments of the send command.
#[derive(Debug)]
pub struct SendArgs {
    /// JSON image to build.
    pub image: PathBuf,
    /// Snapshot to send.
    pub target: String,
    /// Parent snapshot for an incremental send.
    pub parent: Option<String>,
    /// Extra snapshots the receiver can clone from.
    pub clone_sources: Vec<String>,
    /// Output file; stdout if absent.
    pub output: Option<PathBuf>,
    /// Session configuration.
    pub config: SendConfig,
}

/// Runs the send command.
pub fn run(args: &SendArgs) -> Result<(), Box<dyn std::error::Error>> {
    let fs = Image::load(&args.image)?.build()?;
    let target = snapshot(&fs, &args.target)?;
    let parent = args.parent.as_deref().map(|name| snapshot(&fs, name)).transpose()?;
    let sources = args
        .clone_sources
        .iter()
        .map(|name| snapshot(&fs, name))
        .collect::<Result<Vec<_>, _>>()?;

    let stats = match &args.output {
        Some(path) => {
            let file = File::create(path)?;
            let sink = WriteSink::new(BufWriter::new(file));
            let (sink, stats) = send(
                &fs,
                &target,
                parent.as_deref(),
                &sources,
                args.config.clone(),
                sink,
            )?;
            sink.into_inner()?;
            report_file(path, &stats);
            stats
        }
        None => {
            let sink = WriteSink::new(BufWriter::new(io::stdout().lock()));
            let (sink, stats) = send(
                &fs,
                &target,
                parent.as_deref(),
                &sources,
                args.config.clone(),
                sink,
            )?;
            sink.into_inner()?;
            stats
        }
    };
    info!(bytes = stats.bytes, commands = stats.commands, "stream written");
    Ok(())
}

fn snapshot(fs: &MemFs, name: &str) -> Result<Arc<MemTree>, String> {
    fs.get(name).ok_or_else(|| format!("Snapshot {name} not found in image"))
}

fn send<S: Sink>(
    fs: &MemFs,
    target: &MemTree,
    parent: Option<&MemTree>,
    sources: &[Arc<MemTree>],
    config: SendConfig,
    sink: S,
) -> Result<(S, SendStats), Box<dyn std::error::Error>> {
    let mut request = SendRequest::full(target, fs, target);
    if let Some(parent) = parent {
        request = request.parent(parent);
    }
    let mut session = SendSession::new(request, config, sink)?;
    for source in sources {
        session = session.clone_source(&**source);
    }
    Ok(session.run()?)
}

fn report_file(path: &Path, stats: &SendStats) {
    eprintln!(
        "Wrote {} bytes ({} commands) to {}",
        stats.bytes,
        stats.commands,
        path.display()
    );
}
