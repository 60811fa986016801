//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use snapsend_core::{SendConfig, SendRequest, SendSession, SendStats};
use snapsend_tree::{MemFs, MemTree};
use std::sync::Arc;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Fill `tree` with `dirs` directories of `files` files of `file_size`
/// random bytes each.
pub fn populate(tree: &MemTree, dirs: usize, files: usize, file_size: usize) {
    for d in 0..dirs {
        let dir = format!("dir_{d:04}");
        tree.mkdir(&dir, 0o755).expect("mkdir failed");
        for f in 0..files {
            tree.write_file(&format!("{dir}/file_{f:04}"), 0o644, &random_data(file_size))
                .expect("write failed");
        }
    }
}

/// A populated base subvolume and a snapshot of it where every `stride`-th
/// file was renamed, rewritten or removed.
pub fn changed_pair(
    dirs: usize,
    files: usize,
    file_size: usize,
    stride: usize,
) -> (MemFs, Arc<MemTree>, Arc<MemTree>) {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    populate(&base, dirs, files, file_size);
    let next = fs.snapshot(&base, "next");
    let mut n = 0;
    for d in 0..dirs {
        for f in (0..files).step_by(stride.max(1)) {
            let path = format!("dir_{d:04}/file_{f:04}");
            match n % 3 {
                0 => next.rename(&path, &format!("{path}.moved")).expect("rename failed"),
                1 => next.write(&path, 0, &random_data(64)).expect("write failed"),
                _ => next.unlink(&path).expect("unlink failed"),
            }
            n += 1;
        }
    }
    (fs, base, next)
}

/// Run a send into memory and return the stream size and statistics.
pub fn send(
    fs: &MemFs,
    target: &MemTree,
    parent: Option<&MemTree>,
    config: SendConfig,
) -> (usize, SendStats) {
    let mut request = SendRequest::full(target, fs, target);
    if let Some(parent) = parent {
        request = request.parent(parent);
    }
    let (stream, stats) = SendSession::new(request, config, Vec::new())
        .and_then(SendSession::run)
        .expect("send failed");
    (stream.len(), stats)
}
