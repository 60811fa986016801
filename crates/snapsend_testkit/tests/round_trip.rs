//! Property tests: random snapshots always survive a send and receive.

use proptest::prelude::*;
use snapsend_core::SendConfig;
use snapsend_stream::{AttributeType, CommandType};
use snapsend_testkit::prelude::*;
use snapsend_tree::{ItemType, MemFs};
use std::collections::HashSet;

fn is_create(kind: CommandType) -> bool {
    matches!(
        kind,
        CommandType::Mkfile
            | CommandType::Mkdir
            | CommandType::Symlink
            | CommandType::Mknod
            | CommandType::Mkfifo
            | CommandType::Mksock
    )
}

fn starts_at_orphan(path: &[u8]) -> bool {
    path.starts_with(b"orphan-")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn full_send_round_trips(ops in fs_ops_strategy(40)) {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        apply_ops(&base, &ops);
        assert_round_trip(&fs, None, &base);
    }

    #[test]
    fn incremental_send_round_trips(
        base_ops in fs_ops_strategy(30),
        next_ops in fs_ops_strategy(30),
    ) {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        apply_ops(&base, &base_ops);
        let next = fs.snapshot(&base, "next");
        apply_ops(&next, &next_ops);
        assert_round_trip(&fs, Some(&*base), &next);
    }

    #[test]
    fn small_commands_round_trip(
        base_ops in fs_ops_strategy(20),
        next_ops in fs_ops_strategy(20),
    ) {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        apply_ops(&base, &base_ops);
        let next = fs.snapshot(&base, "next");
        apply_ops(&next, &next_ops);
        let config = SendConfig::default()
            .max_command_size(8 * 1024)
            .read_chunk_size(16)
            .name_cache_water_marks(2, 4);
        assert_round_trip_with(&fs, Some(&*base), &next, &[], config);
    }

    #[test]
    fn snapshot_chain_round_trips(
        steps in prop::collection::vec(fs_ops_strategy(15), 1..4),
    ) {
        let fs = MemFs::new();
        let mut parent = fs.create_subvolume("v0");
        let mut receiver = ReceiverFs::new();
        receive_full(&mut receiver, &fs, &parent);

        for (i, ops) in steps.iter().enumerate() {
            let child = fs.snapshot(&parent, &format!("v{}", i + 1));
            apply_ops(&child, ops);
            let output = send_snapshot(&fs, &child, Some(&*parent), SendConfig::default())
                .expect("incremental send failed");
            if let Err(e) = receiver.receive(output.stream.as_slice()) {
                panic!("receive failed: {e}\n{}", output.dump().join("\n"));
            }
            assert_received(&receiver, &child);
            parent = child;
        }
        prop_assert_eq!(receiver.len(), steps.len() + 1);
    }

    #[test]
    fn full_send_touches_only_orphan_names(ops in fs_ops_strategy(40)) {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        apply_ops(&base, &ops);
        let output = send_snapshot(&fs, &base, None, SendConfig::default())
            .expect("full send failed");

        let commands = output.commands();
        let creates = commands.iter().filter(|c| is_create(c.kind)).count();
        prop_assert_eq!(creates, base.items_of_type(ItemType::InodeItem).len() - 1);
        for cmd in &commands {
            match cmd.kind {
                CommandType::Rmdir => prop_assert!(false, "rmdir in a full send"),
                CommandType::Rename | CommandType::Unlink => {
                    let path = cmd.get(AttributeType::Path).unwrap_or_default();
                    prop_assert!(starts_at_orphan(path), "{}", describe(cmd));
                }
                _ => {}
            }
        }
    }

    #[test]
    fn orphan_names_are_unique_and_free(
        base_ops in fs_ops_strategy(30),
        next_ops in fs_ops_strategy(30),
    ) {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        apply_ops(&base, &base_ops);
        let next = fs.snapshot(&base, "next");
        apply_ops(&next, &next_ops);
        let output = send_snapshot(&fs, &next, Some(&*base), SendConfig::default())
            .expect("incremental send failed");

        let mut seen = HashSet::new();
        for cmd in output.commands().iter().filter(|c| is_create(c.kind)) {
            let path = cmd.get(AttributeType::Path).unwrap_or_default().to_vec();
            prop_assert!(starts_at_orphan(&path), "{}", describe(cmd));
            let name = String::from_utf8_lossy(&path).into_owned();
            prop_assert!(base.lookup_path(&name).unwrap().is_none());
            prop_assert!(next.lookup_path(&name).unwrap().is_none());
            prop_assert!(seen.insert(path));
        }
    }
}
