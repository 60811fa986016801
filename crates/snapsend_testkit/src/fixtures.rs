//! Test fixtures and send helpers.
//!
//! Provides convenience functions for running sends against [`MemFs`]
//! snapshots and checking that a receiver rebuilds the target exactly.

use crate::receiver::ReceiverFs;
use crate::view::FsView;
use snapsend_core::{SendConfig, SendRequest, SendResult, SendSession, SendStats};
use snapsend_stream::{decode_stream, AttributeType, Command, CommandType, StreamReader, WriteSink};
use snapsend_tree::{MemFs, MemTree, TreeReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// An encoded stream with the statistics of the send that produced it.
#[derive(Debug, Clone)]
pub struct SendOutput {
    /// The encoded stream.
    pub stream: Vec<u8>,
    /// Send statistics.
    pub stats: SendStats,
}

impl SendOutput {
    /// Decodes the stream.
    pub fn commands(&self) -> Vec<Command> {
        decode_stream(&self.stream).expect("Failed to decode stream")
    }

    /// Command types in stream order.
    pub fn kinds(&self) -> Vec<CommandType> {
        self.commands().iter().map(|c| c.kind).collect()
    }

    /// Renders the stream one command per line, for assertions and
    /// failure messages.
    pub fn dump(&self) -> Vec<String> {
        self.commands().iter().map(describe).collect()
    }
}

/// Renders a command as `NAME path [-> other]`.
pub fn describe(cmd: &Command) -> String {
    let path = |attr| {
        cmd.get(attr)
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default()
    };
    match cmd.kind {
        CommandType::Rename => format!(
            "rename {} -> {}",
            path(AttributeType::Path),
            path(AttributeType::PathTo)
        ),
        CommandType::Link => format!(
            "link {} -> {}",
            path(AttributeType::Path),
            path(AttributeType::PathLink)
        ),
        CommandType::Clone => format!(
            "clone {} <- {}",
            path(AttributeType::Path),
            path(AttributeType::ClonePath)
        ),
        kind => format!("{} {}", kind.name().to_lowercase(), path(AttributeType::Path))
            .trim_end()
            .to_string(),
    }
}

/// Sends `target`, incrementally if `parent` is given.
///
/// # Errors
///
/// Returns the send error unchanged.
pub fn send_snapshot(
    fs: &MemFs,
    target: &MemTree,
    parent: Option<&MemTree>,
    config: SendConfig,
) -> SendResult<SendOutput> {
    send_with_sources(fs, target, parent, &[], config)
}

/// Sends `target` with extra clone sources the receiver already holds.
///
/// # Errors
///
/// Returns the send error unchanged.
pub fn send_with_sources(
    fs: &MemFs,
    target: &MemTree,
    parent: Option<&MemTree>,
    sources: &[&MemTree],
    config: SendConfig,
) -> SendResult<SendOutput> {
    let mut request = SendRequest::full(target, fs, target);
    if let Some(parent) = parent {
        request = request.parent(parent);
    }
    let mut session = SendSession::new(request, config, Vec::new())?;
    for source in sources {
        session = session.clone_source(*source);
    }
    let (stream, stats) = session.run()?;
    Ok(SendOutput { stream, stats })
}

/// Full-sends `tree` into `receiver`.
pub fn receive_full(receiver: &mut ReceiverFs, fs: &MemFs, tree: &MemTree) {
    let output = send_snapshot(fs, tree, None, SendConfig::default())
        .unwrap_or_else(|e| panic!("full send of {} failed: {e}", tree.meta().name));
    receiver
        .receive(output.stream.as_slice())
        .unwrap_or_else(|e| panic!("receive of {} failed: {e}\n{:#?}", tree.meta().name, output.dump()));
}

/// Panics with a readable diff unless the receiver holds an exact copy of
/// `tree`.
pub fn assert_received(receiver: &ReceiverFs, tree: &MemTree) {
    let expected = FsView::from_tree(tree).expect("Failed to read source tree");
    let received = receiver
        .by_uuid(tree.meta().uuid.as_bytes())
        .unwrap_or_else(|| panic!("{} was not received", tree.meta().name));
    let actual = FsView::from_received(received);
    let diff = expected.diff(&actual);
    assert!(
        diff.is_empty(),
        "received copy of {} differs:\n{}",
        tree.meta().name,
        diff.join("\n")
    );
}

/// Sends `target` (incrementally against `parent` if given, which is
/// full-sent first), replays it, and asserts the receiver rebuilt
/// `target` exactly. Returns the incremental output for further checks.
pub fn assert_round_trip(fs: &MemFs, parent: Option<&MemTree>, target: &MemTree) -> SendOutput {
    assert_round_trip_with(fs, parent, target, &[], SendConfig::default())
}

/// [`assert_round_trip`] with extra clone sources and a custom config.
pub fn assert_round_trip_with(
    fs: &MemFs,
    parent: Option<&MemTree>,
    target: &MemTree,
    sources: &[&MemTree],
    config: SendConfig,
) -> SendOutput {
    let mut receiver = ReceiverFs::new();
    for tree in parent.into_iter().chain(sources.iter().copied()) {
        receive_full(&mut receiver, fs, tree);
    }
    if let Some(parent) = parent {
        assert_received(&receiver, parent);
    }

    let output = send_with_sources(fs, target, parent, sources, config)
        .unwrap_or_else(|e| panic!("send of {} failed: {e}", target.meta().name));
    if let Err(e) = receiver.receive(output.stream.as_slice()) {
        panic!(
            "receive of {} failed: {e}\nstream:\n{}",
            target.meta().name,
            output.dump().join("\n")
        );
    }
    let expected = FsView::from_tree(target).expect("Failed to read target tree");
    let received = receiver
        .by_uuid(target.meta().uuid.as_bytes())
        .expect("target subvolume missing after receive");
    let diff = expected.diff(&FsView::from_received(received));
    assert!(
        diff.is_empty(),
        "received copy of {} differs:\n{}\nstream:\n{}",
        target.meta().name,
        diff.join("\n"),
        output.dump().join("\n")
    );
    output
}

/// A filesystem with a base subvolume and a writable snapshot of it.
pub struct SnapshotPair {
    /// The filesystem.
    pub fs: MemFs,
    /// The parent snapshot.
    pub base: Arc<MemTree>,
    /// Snapshot of `base` taken by [`SnapshotPair::snapshot`].
    pub next: Option<Arc<MemTree>>,
}

impl SnapshotPair {
    /// Creates a filesystem whose base subvolume is filled by `setup`.
    pub fn new(setup: impl FnOnce(&MemTree)) -> Self {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        setup(&base);
        Self {
            fs,
            base,
            next: None,
        }
    }

    /// Snapshots the base and applies `change` to the snapshot.
    pub fn snapshot(mut self, change: impl FnOnce(&MemTree)) -> Self {
        let next = self.fs.snapshot(&self.base, "next");
        change(&next);
        self.next = Some(next);
        self
    }

    /// The snapshot.
    pub fn next(&self) -> &MemTree {
        self.next.as_deref().expect("snapshot() not called")
    }

    /// Sends the snapshot incrementally with the default config.
    pub fn send(&self) -> SendOutput {
        send_snapshot(&self.fs, self.next(), Some(&*self.base), SendConfig::default())
            .expect("Failed to send snapshot")
    }

    /// Round-trips the snapshot through a receiver holding the base.
    pub fn round_trip(&self) -> SendOutput {
        assert_round_trip(&self.fs, Some(&*self.base), self.next())
    }
}

/// A stream written to a file on disk, removed on drop.
pub struct TempStream {
    /// Location of the stream file.
    pub path: PathBuf,
    /// Send statistics.
    pub stats: SendStats,
    _temp_dir: TempDir,
}

impl TempStream {
    /// Sends `target` into a temporary file.
    pub fn send(fs: &MemFs, target: &MemTree, parent: Option<&MemTree>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("stream.bin");
        let file = File::create(&path).expect("Failed to create stream file");

        let mut request = SendRequest::full(target, fs, target);
        if let Some(parent) = parent {
            request = request.parent(parent);
        }
        let sink = WriteSink::new(BufWriter::new(file));
        let (sink, stats) = SendSession::new(request, SendConfig::default(), sink)
            .expect("Failed to create session")
            .run()
            .expect("Failed to send");
        sink.into_inner().expect("Failed to flush stream file");

        Self {
            path,
            stats,
            _temp_dir: temp_dir,
        }
    }

    /// Opens the stream for reading.
    pub fn reader(&self) -> StreamReader<File> {
        let file = File::open(&self.path).expect("Failed to open stream file");
        StreamReader::new(file).expect("Failed to read stream header")
    }

    /// Size of the stream file in bytes.
    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path)
            .expect("Failed to stat stream file")
            .len()
    }

    /// Returns true if the stream file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
