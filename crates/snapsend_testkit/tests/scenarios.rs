//! End-to-end send scenarios replayed through the reference receiver.

use snapsend_core::{ErrorKind, SendConfig, SendRequest, SendSession};
use snapsend_stream::{AttributeType, CommandType};
use snapsend_testkit::prelude::*;
use snapsend_tree::{ContentReader, FileType, MemFs, MemTree, TreeReader};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

fn count(output: &SendOutput, kind: CommandType) -> usize {
    output.kinds().iter().filter(|k| **k == kind).count()
}

fn sample_tree(tree: &MemTree) {
    tree.mkdir("etc", 0o755).unwrap();
    tree.mkdir("home", 0o755).unwrap();
    tree.mkdir("home/user", 0o700).unwrap();
    tree.write_file("etc/hosts", 0o644, b"127.0.0.1 localhost\n").unwrap();
    tree.write_file("home/user/notes.txt", 0o600, b"remember the milk").unwrap();
    tree.chown("home/user", 1000, 1000).unwrap();
    tree.chown("home/user/notes.txt", 1000, 100).unwrap();
    tree.link("etc/hosts", "home/user/hosts").unwrap();
    tree.symlink("home/user/link", "../../etc/hosts").unwrap();
    tree.mknod("fifo", FileType::Fifo, 0o640, 0).unwrap();
    tree.mknod("tty", FileType::CharDevice, 0o620, (4 << 8) | 1).unwrap();
    tree.set_xattr("etc/hosts", "user.origin", b"installer").unwrap();
}

#[test]
fn full_send_rebuilds_tree() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    sample_tree(&base);

    let output = assert_round_trip(&fs, None, &base);
    let kinds = output.kinds();
    assert_eq!(kinds.first(), Some(&CommandType::Subvol));
    assert_eq!(kinds.last(), Some(&CommandType::End));
    assert_eq!(count(&output, CommandType::Mkfifo), 1);
    assert_eq!(count(&output, CommandType::Mknod), 1);
    assert_eq!(count(&output, CommandType::Symlink), 1);
    assert_eq!(count(&output, CommandType::Link), 1);
}

#[test]
fn full_send_creates_inodes_under_orphan_names() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    base.write_file("a", 0o644, b"x").unwrap();

    let output = send_snapshot(&fs, &base, None, SendConfig::default()).unwrap();
    let dump = output.dump();
    let mkfile = dump.iter().find(|line| line.starts_with("mkfile ")).unwrap();
    assert!(mkfile.starts_with("mkfile orphan-257-"), "{dump:#?}");
    assert!(dump.iter().any(|line| line.starts_with("rename orphan-257-") && line.ends_with("-> a")));
}

#[test]
fn rename_sends_one_command() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("docs", 0o755).unwrap();
        base.write_file("docs/a.txt", 0o644, &[7; 5000]).unwrap();
    })
    .snapshot(|next| next.rename("docs/a.txt", "docs/b.txt").unwrap());

    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Rename), 1);
    assert_eq!(count(&output, CommandType::Link), 0);
    assert_eq!(count(&output, CommandType::Unlink), 0);
    assert_eq!(count(&output, CommandType::Write), 0);
}

#[test]
fn metadata_change_does_not_resend_data() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("big", 0o644, &[1; 20_000]).unwrap();
    })
    .snapshot(|next| next.chmod("big", 0o600).unwrap());

    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Write), 0);
    assert_eq!(count(&output, CommandType::Clone), 0);
    assert_eq!(count(&output, CommandType::Chmod), 1);
    assert_eq!(count(&output, CommandType::Chown), 0);
}

#[test]
fn partial_overwrite_sends_only_new_extent() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("f", 0o644, &[1; 4096]).unwrap();
        base.write("f", 4096, &[2; 4096]).unwrap();
    })
    .snapshot(|next| next.write("f", 4096, &[3; 10]).unwrap());

    let output = pair.round_trip();
    let writes: Vec<u64> = output
        .commands()
        .iter()
        .filter(|c| c.kind == CommandType::Write)
        .map(|c| c.get_u64(AttributeType::FileOffset).unwrap())
        .collect();
    assert!(!writes.is_empty());
    assert!(writes.iter().all(|offset| *offset >= 4096), "{writes:?}");
}

#[test]
fn new_file_in_existing_directory() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("d", 0o755).unwrap();
    })
    .snapshot(|next| {
        next.write_file("d/new", 0o640, b"fresh").unwrap();
    });
    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Mkfile), 1);
    assert!(output.dump().iter().any(|line| line.ends_with("-> d/new")));
}

#[test]
fn hard_links_added_and_removed() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("a", 0o644, b"shared").unwrap();
        base.link("a", "b").unwrap();
    })
    .snapshot(|next| {
        next.unlink("b").unwrap();
        next.mkdir("d", 0o755).unwrap();
        next.link("a", "d/c").unwrap();
    });
    pair.round_trip();
}

#[test]
fn swapped_names() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("a", 0o644, b"first").unwrap();
        base.write_file("b", 0o644, b"second").unwrap();
    })
    .snapshot(|next| {
        next.rename("a", "tmp").unwrap();
        next.rename("b", "a").unwrap();
        next.rename("tmp", "b").unwrap();
    });
    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Write), 0);
}

#[test]
fn swapped_directories() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("x", 0o755).unwrap();
        base.mkdir("y", 0o700).unwrap();
        base.write_file("x/in_x", 0o644, b"1").unwrap();
        base.write_file("y/in_y", 0o644, b"2").unwrap();
    })
    .snapshot(|next| {
        next.rename("x", "tmp").unwrap();
        next.rename("y", "x").unwrap();
        next.rename("tmp", "y").unwrap();
    });
    pair.round_trip();
}

#[test]
fn rename_over_existing_file() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("a", 0o644, b"winner").unwrap();
        base.write_file("b", 0o644, b"loser").unwrap();
    })
    .snapshot(|next| next.rename("a", "b").unwrap());
    pair.round_trip();

    // The overwritten inode has a higher number than the renamed one.
    let pair = SnapshotPair::new(|base| {
        base.write_file("b", 0o644, b"loser").unwrap();
        base.write_file("a", 0o644, b"winner").unwrap();
    })
    .snapshot(|next| next.rename("a", "b").unwrap());
    pair.round_trip();
}

#[test]
fn overwritten_name_keeps_other_links() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("a", 0o644, b"new owner of b").unwrap();
        base.write_file("b", 0o644, b"linked").unwrap();
        base.link("b", "c").unwrap();
    })
    .snapshot(|next| next.rename("a", "b").unwrap());
    pair.round_trip();
}

#[test]
fn delete_non_empty_directory() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("gone", 0o755).unwrap();
        base.mkdir("gone/sub", 0o755).unwrap();
        base.write_file("gone/f", 0o644, b"1").unwrap();
        base.write_file("gone/sub/g", 0o644, b"2").unwrap();
    })
    .snapshot(|next| {
        next.unlink("gone/sub/g").unwrap();
        next.rmdir("gone/sub").unwrap();
        next.unlink("gone/f").unwrap();
        next.rmdir("gone").unwrap();
    });
    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Rmdir), 2);
    assert_eq!(count(&output, CommandType::Unlink), 2);
}

#[test]
fn file_moves_out_of_deleted_directory_onto_its_name() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("x", 0o755).unwrap();
        base.write_file("x/a", 0o644, b"survivor").unwrap();
    })
    .snapshot(|next| {
        next.rename("x/a", "keep").unwrap();
        next.rmdir("x").unwrap();
        next.rename("keep", "x").unwrap();
    });
    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Rmdir), 1);
}

#[test]
fn file_replaces_its_renamed_parent_directory() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("q", 0o755).unwrap();
        base.write_file("q/f", 0o644, b"climber").unwrap();
    })
    .snapshot(|next| {
        next.rename("q", "r").unwrap();
        next.rename("r/f", "q").unwrap();
    });
    pair.round_trip();
}

#[test]
fn file_replaces_parent_directory_with_higher_number() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("f", 0o644, b"climber").unwrap();
        base.mkdir("q", 0o755).unwrap();
        base.rename("f", "q/f").unwrap();
    })
    .snapshot(|next| {
        next.rename("q", "r").unwrap();
        next.rename("r/f", "q").unwrap();
    });
    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Link), 0);
    assert_eq!(count(&output, CommandType::Unlink), 0);
}

#[test]
fn existing_file_moves_into_new_directory() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("a", 0o644, b"payload").unwrap();
        base.write_file("b", 0o644, b"stays").unwrap();
    })
    .snapshot(|next| {
        next.mkdir("n", 0o755).unwrap();
        next.mkdir("n/m", 0o755).unwrap();
        next.rename("a", "n/m/a").unwrap();
        next.link("b", "n/b").unwrap();
    });
    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Mkdir), 2);
    assert_eq!(count(&output, CommandType::Write), 0);
}

#[test]
fn new_directory_takes_name_of_moved_file() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("a", 0o644, b"moves down").unwrap();
    })
    .snapshot(|next| {
        next.rename("a", "tmp").unwrap();
        next.mkdir("a", 0o755).unwrap();
        next.rename("tmp", "a/f").unwrap();
    });
    pair.round_trip();
}

#[test]
fn directory_renamed_over_empty_directory() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("full", 0o755).unwrap();
        base.write_file("full/f", 0o644, b"content").unwrap();
        base.mkdir("empty", 0o755).unwrap();
    })
    .snapshot(|next| next.rename("full", "empty").unwrap());
    pair.round_trip();
}

#[test]
fn nested_directory_swap() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("a", 0o755).unwrap();
        base.mkdir("a/b", 0o700).unwrap();
        base.write_file("a/b/f", 0o644, b"inside").unwrap();
    })
    .snapshot(|next| {
        next.rename("a/b", "b").unwrap();
        next.rename("a", "b/a").unwrap();
    });
    let output = pair.round_trip();
    let dump = output.dump();
    assert!(
        dump.iter()
            .any(|line| line.starts_with("rename orphan-257-") && line.ends_with("-> b/a")),
        "{dump:#?}"
    );
    assert_eq!(count(&output, CommandType::Write), 0);
}

#[test]
fn directory_moves_below_its_former_grandchild() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("a", 0o755).unwrap();
        base.mkdir("a/x", 0o755).unwrap();
        base.mkdir("a/x/q", 0o755).unwrap();
        base.write_file("a/note", 0o644, b"top").unwrap();
    })
    .snapshot(|next| {
        next.rename("a/x", "x").unwrap();
        next.rename("a", "x/q/a").unwrap();
    });
    pair.round_trip();
}

#[test]
fn directory_waits_for_parent_created_in_reused_number() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("c", 0o755).unwrap();
        base.mkdir("t", 0o755).unwrap();
        base.mkdir("c/a", 0o755).unwrap();
    })
    .snapshot(|next| {
        next.reuse_inode_numbers(true);
        next.rmdir("t").unwrap();
        next.rename("c/a", "a").unwrap();
        next.mkdir("a/p", 0o755).unwrap();
        next.rename("c", "a/p/c").unwrap();
    });
    let t = pair.base.lookup_path("t").unwrap();
    assert_eq!(pair.next().lookup_path("a/p").unwrap(), t);
    pair.round_trip();
}

#[test]
fn reused_number_file_to_file() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("a", 0o644, b"old instance").unwrap();
        base.write_file("b", 0o644, b"neighbour").unwrap();
    })
    .snapshot(|next| {
        next.reuse_inode_numbers(true);
        next.unlink("a").unwrap();
        next.write_file("a", 0o600, b"new instance").unwrap();
    });
    let a = pair.base.lookup_path("a").unwrap();
    assert_eq!(pair.next().lookup_path("a").unwrap(), a);

    let output = pair.round_trip();
    let dump = output.dump();
    assert!(dump.contains(&"unlink a".to_string()), "{dump:#?}");
    assert_eq!(count(&output, CommandType::Mkfile), 1);
}

#[test]
fn reused_number_non_empty_directory_to_file() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("d", 0o755).unwrap();
        base.write_file("d/f", 0o644, b"survivor").unwrap();
    })
    .snapshot(|next| {
        next.reuse_inode_numbers(true);
        next.rename("d/f", "f").unwrap();
        next.rmdir("d").unwrap();
        next.write_file("d", 0o644, b"now a file").unwrap();
    });
    let d = pair.base.lookup_path("d").unwrap();
    assert_eq!(pair.next().lookup_path("d").unwrap(), d);

    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Rmdir), 1);
    assert_eq!(count(&output, CommandType::Mkfile), 1);
}

#[test]
fn reused_number_file_to_directory() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("a", 0o644, b"file first").unwrap();
        base.write_file("b", 0o644, b"neighbour").unwrap();
    })
    .snapshot(|next| {
        next.reuse_inode_numbers(true);
        next.unlink("a").unwrap();
        next.mkdir("a", 0o755).unwrap();
        next.write_file("a/child", 0o644, b"inside").unwrap();
        next.link("b", "a/b").unwrap();
    });
    let a = pair.base.lookup_path("a").unwrap();
    assert_eq!(pair.next().lookup_path("a").unwrap(), a);

    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Mkdir), 1);
    assert_eq!(count(&output, CommandType::Link), 1);
}

#[test]
fn file_moves_into_directory_reusing_old_parent_number() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("d", 0o755).unwrap();
        base.write_file("d/x", 0o644, b"moved").unwrap();
    })
    .snapshot(|next| {
        next.rename("d/x", "x").unwrap();
        next.rmdir("d").unwrap();
        next.reuse_inode_numbers(true);
        next.mkdir("e", 0o755).unwrap();
        next.rename("x", "e/x").unwrap();
    });
    let d = pair.base.lookup_path("d").unwrap();
    assert_eq!(pair.next().lookup_path("e").unwrap(), d);

    let output = pair.round_trip();
    let dump = output.dump();
    assert!(
        dump.iter()
            .any(|line| line.starts_with("rename orphan-257-") && line.ends_with("/x -> e/x")),
        "{dump:#?}"
    );
    assert_eq!(count(&output, CommandType::Rmdir), 1);
    assert_eq!(count(&output, CommandType::Write), 0);
}

#[test]
fn reused_directory_number_hides_old_entries() {
    let pair = SnapshotPair::new(|base| {
        base.mkdir("d", 0o755).unwrap();
        base.write_file("b", 0o644, b"lands in e").unwrap();
        base.write_file("d/n", 0o644, b"leaves d").unwrap();
    })
    .snapshot(|next| {
        next.rename("d/n", "m").unwrap();
        next.rmdir("d").unwrap();
        next.reuse_inode_numbers(true);
        next.mkdir("e", 0o755).unwrap();
        next.rename("b", "e/n").unwrap();
    });
    let output = pair.round_trip();
    let dump = output.dump();
    assert!(dump.contains(&"rename b -> e/n".to_string()), "{dump:#?}");
    assert_eq!(count(&output, CommandType::Rmdir), 1);
}

#[test]
fn clone_within_snapshot() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("src", 0o644, &[9; 8192]).unwrap();
    })
    .snapshot(|next| {
        next.create("dst", 0o644).unwrap();
        next.clone_range("dst", 0, next, "src", 0, 8192).unwrap();
    });
    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::Clone), 1);
    assert_eq!(count(&output, CommandType::Write), 0);
}

#[test]
fn clone_from_full_send_of_same_snapshot() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    base.write_file("a", 0o644, &[5; 3000]).unwrap();
    base.create("b", 0o644).unwrap();
    base.clone_range("b", 100, &base, "a", 0, 3000).unwrap();

    let output = assert_round_trip(&fs, None, &base);
    assert_eq!(count(&output, CommandType::Clone), 1);
    let clone = output
        .commands()
        .into_iter()
        .find(|c| c.kind == CommandType::Clone)
        .unwrap();
    assert_eq!(
        clone.get_uuid(AttributeType::CloneUuid).unwrap(),
        *base.meta().uuid.as_bytes()
    );
    assert_eq!(clone.get_path(AttributeType::ClonePath).unwrap(), b"a");
    assert_eq!(clone.get_u64(AttributeType::FileOffset).unwrap(), 100);
}

#[test]
fn clone_from_extra_source() {
    let fs = MemFs::new();
    let library = fs.create_subvolume("library");
    library.write_file("blob", 0o644, &[3; 6000]).unwrap();
    let base = fs.create_subvolume("base");
    base.write_file("readme", 0o644, b"hi").unwrap();
    let next = fs.snapshot(&base, "next");
    next.create("copy", 0o644).unwrap();
    next.clone_range("copy", 0, &library, "blob", 1000, 4000).unwrap();

    let output = assert_round_trip_with(
        &fs,
        Some(&*base),
        &next,
        &[&*library],
        SendConfig::default(),
    );
    let clone = output
        .commands()
        .into_iter()
        .find(|c| c.kind == CommandType::Clone)
        .expect("no clone command");
    assert_eq!(
        clone.get_uuid(AttributeType::CloneUuid).unwrap(),
        *library.meta().uuid.as_bytes()
    );
    assert_eq!(clone.get_u64(AttributeType::CloneOffset).unwrap(), 1000);
    assert_eq!(clone.get_u64(AttributeType::CloneLen).unwrap(), 4000);

    // Without the source registered the data is written.
    let plain = send_snapshot(&fs, &next, Some(&*base), SendConfig::default()).unwrap();
    assert_eq!(count(&plain, CommandType::Clone), 0);
    assert!(count(&plain, CommandType::Write) > 0);
}

#[test]
fn xattrs_set_changed_and_removed() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("f", 0o644, b"x").unwrap();
        base.set_xattr("f", "user.keep", b"same").unwrap();
        base.set_xattr("f", "user.change", b"old").unwrap();
        base.set_xattr("f", "user.drop", b"bye").unwrap();
    })
    .snapshot(|next| {
        next.set_xattr("f", "user.change", b"new").unwrap();
        next.remove_xattr("f", "user.drop").unwrap();
        next.set_xattr("f", "user.added", b"hello").unwrap();
    });
    let output = pair.round_trip();
    assert_eq!(count(&output, CommandType::SetXattr), 2);
    assert_eq!(count(&output, CommandType::RemoveXattr), 1);
}

#[test]
fn empty_acl_is_sent_as_header() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    base.mkdir("d", 0o755).unwrap();
    base.set_xattr("d", "system.posix_acl_default", b"").unwrap();
    base.set_xattr("d", "user.empty", b"").unwrap();

    let output = assert_round_trip(&fs, None, &base);
    for cmd in output.commands() {
        if cmd.kind != CommandType::SetXattr {
            continue;
        }
        let name = cmd.get(AttributeType::XattrName).unwrap();
        let data = cmd.get(AttributeType::XattrData).unwrap();
        if name == b"system.posix_acl_default" {
            assert_eq!(data, [2, 0, 0, 0]);
        } else {
            assert!(data.is_empty());
        }
    }
}

#[test]
fn small_chunks_split_writes() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    let data: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
    base.write_file("f", 0o644, &data).unwrap();

    let config = SendConfig::default()
        .max_command_size(8 * 1024)
        .read_chunk_size(64);
    let output = assert_round_trip_with(&fs, None, &base, &[], config);
    assert_eq!(count(&output, CommandType::Write), 5);
}

#[test]
fn truncate_and_extend() {
    let pair = SnapshotPair::new(|base| {
        base.write_file("shrink", 0o644, &[1; 5000]).unwrap();
        base.write_file("grow", 0o644, b"short").unwrap();
    })
    .snapshot(|next| {
        next.truncate("shrink", 100).unwrap();
        next.truncate("grow", 9000).unwrap();
    });
    pair.round_trip();
}

#[test]
fn symlink_replaced_by_file() {
    let pair = SnapshotPair::new(|base| {
        base.symlink("l", "target").unwrap();
        base.mknod("p", FileType::Fifo, 0o600, 0).unwrap();
    })
    .snapshot(|next| {
        next.unlink("l").unwrap();
        next.write_file("l", 0o644, b"now a file").unwrap();
        next.unlink("p").unwrap();
        next.symlink("p", "l").unwrap();
    });
    pair.round_trip();
}

#[test]
fn snapshot_chain() {
    let fs = MemFs::new();
    let v1 = fs.create_subvolume("v1");
    sample_tree(&v1);
    let v2 = fs.snapshot(&v1, "v2");
    v2.rename("etc/hosts", "etc/hosts.bak").unwrap();
    v2.write_file("etc/hosts", 0o644, b"10.0.0.1 gateway\n").unwrap();
    let v3 = fs.snapshot(&v2, "v3");
    v3.unlink("etc/hosts.bak").unwrap();
    v3.rename("home/user", "home/admin").unwrap();

    let mut receiver = ReceiverFs::new();
    receive_full(&mut receiver, &fs, &v1);
    for (target, parent) in [(&*v2, &*v1), (&*v3, &*v2)] {
        let output = send_snapshot(&fs, target, Some(parent), SendConfig::default()).unwrap();
        receiver.receive(output.stream.as_slice()).unwrap();
        assert_received(&receiver, target);
    }
    assert_eq!(receiver.len(), 3);
}

#[test]
fn stats_match_stream() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    sample_tree(&base);
    let output = send_snapshot(&fs, &base, None, SendConfig::default()).unwrap();
    assert_eq!(output.stats.bytes, output.stream.len() as u64);
    assert_eq!(output.stats.commands, output.commands().len() as u64);
    let writes = output
        .stats
        .per_command
        .get(&CommandType::Write)
        .map_or(0, |s| s.count);
    assert_eq!(writes as usize, count(&output, CommandType::Write));
}

/// Modifies the target the first time file data is read.
struct MutatingReader<'a> {
    tree: &'a MemTree,
    fired: AtomicBool,
}

impl ContentReader for MutatingReader<'_> {
    fn read(&self, ino: u64, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.tree.touch("").map_err(io::Error::from)?;
        }
        self.tree.read(ino, offset, len)
    }
}

#[test]
fn concurrent_modification_is_detected() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    for i in 0..8 {
        base.write_file(&format!("f{i}"), 0o644, b"data").unwrap();
    }
    let reader = MutatingReader {
        tree: &base,
        fired: AtomicBool::new(false),
    };
    let request = SendRequest::full(&*base, &fs, &reader);
    let config = SendConfig::default().lease_batch_items(1);
    let err = SendSession::new(request, config, Vec::new())
        .unwrap()
        .run()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Inconsistent);
}

fn small_commands() -> SendConfig {
    SendConfig::default()
        .max_command_size(8 * 1024)
        .read_chunk_size(1024)
}

#[test]
fn oversized_xattr_overflows() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    base.write_file("f", 0o644, b"x").unwrap();
    base.set_xattr("f", "user.big", &[1; 9000]).unwrap();

    let err = send_snapshot(&fs, &base, None, small_commands()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Overflow);
}

#[test]
fn oversized_path_overflows() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    let component = "d".repeat(200);
    let mut path = component.clone();
    base.mkdir(&path, 0o755).unwrap();
    for _ in 0..45 {
        path = format!("{path}/{component}");
        base.mkdir(&path, 0o755).unwrap();
    }

    let err = send_snapshot(&fs, &base, None, small_commands()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Overflow);
}

#[test]
fn parent_must_differ_from_target() {
    let fs = MemFs::new();
    let base = fs.create_subvolume("base");
    let request = SendRequest::full(&*base, &fs, &*base).parent(&*base);
    let err = SendSession::new(request, SendConfig::default(), Vec::new())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
}
