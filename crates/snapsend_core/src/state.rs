//! Lifecycle of an inode relative to the send cursor.
//!
//! The receiver rebuilds the target one inode at a time. At any point of
//! the stream an inode either exists there already or does not, and which
//! snapshot describes its current name depends on whether the cursor has
//! passed it.

/// Where an inode stands in the receiver's reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Same instance in both snapshots.
    Unchanged,
    /// Only in the target, not yet reached by the cursor.
    WillCreate,
    /// Only in the target, already emitted.
    DidCreate,
    /// Only in the parent, not yet reached by the cursor.
    WillDelete,
    /// Only in the parent, already removed.
    DidDelete,
}

impl Lifecycle {
    /// Classifies `(ino, generation)` from the generation found for `ino`
    /// in each snapshot (`None` when absent) and the cursor position.
    ///
    /// Returns `None` when neither snapshot holds that instance.
    #[must_use]
    pub fn classify(
        ino: u64,
        generation: u64,
        target_gen: Option<u64>,
        parent_gen: Option<u64>,
        progress: u64,
    ) -> Option<Self> {
        let passed = ino < progress;
        let in_target = target_gen == Some(generation);
        let in_parent = parent_gen == Some(generation);
        match (in_target, in_parent) {
            (true, true) => Some(Self::Unchanged),
            (true, false) if passed => Some(Self::DidCreate),
            (true, false) => Some(Self::WillCreate),
            (false, true) if passed => Some(Self::DidDelete),
            (false, true) => Some(Self::WillDelete),
            (false, false) => None,
        }
    }

    /// Returns true if the inode currently exists at the receiver.
    #[must_use]
    pub const fn is_existent(self) -> bool {
        matches!(self, Self::Unchanged | Self::DidCreate | Self::WillDelete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_generation_is_unchanged() {
        assert_eq!(
            Lifecycle::classify(300, 7, Some(7), Some(7), 0),
            Some(Lifecycle::Unchanged)
        );
        assert_eq!(
            Lifecycle::classify(300, 7, Some(7), Some(7), 1000),
            Some(Lifecycle::Unchanged)
        );
    }

    #[test]
    fn target_only_flips_at_cursor() {
        assert_eq!(
            Lifecycle::classify(300, 7, Some(7), None, 300),
            Some(Lifecycle::WillCreate)
        );
        assert_eq!(
            Lifecycle::classify(300, 7, Some(7), None, 301),
            Some(Lifecycle::DidCreate)
        );
    }

    #[test]
    fn parent_only_flips_at_cursor() {
        assert_eq!(
            Lifecycle::classify(300, 7, None, Some(7), 300),
            Some(Lifecycle::WillDelete)
        );
        assert_eq!(
            Lifecycle::classify(300, 7, None, Some(7), 301),
            Some(Lifecycle::DidDelete)
        );
    }

    #[test]
    fn reused_number_follows_generation() {
        // inode 300 was deleted and its number reused with generation 9
        assert_eq!(
            Lifecycle::classify(300, 9, Some(9), Some(7), 0),
            Some(Lifecycle::WillCreate)
        );
        assert_eq!(
            Lifecycle::classify(300, 7, Some(9), Some(7), 0),
            Some(Lifecycle::WillDelete)
        );
        assert_eq!(Lifecycle::classify(300, 8, Some(9), Some(7), 0), None);
        assert_eq!(Lifecycle::classify(300, 8, None, None, 0), None);
    }

    proptest! {
        #[test]
        fn existence_matches_cursor(
            ino in 256u64..1024,
            progress in 256u64..1024,
            in_target: bool,
            in_parent: bool,
        ) {
            let target = in_target.then_some(1);
            let parent = in_parent.then_some(1);
            match Lifecycle::classify(ino, 1, target, parent, progress) {
                None => prop_assert!(!in_target && !in_parent),
                Some(state) => {
                    let expected = if in_target && in_parent {
                        true
                    } else if in_target {
                        ino < progress
                    } else {
                        ino >= progress
                    };
                    prop_assert_eq!(state.is_existent(), expected);
                }
            }
        }
    }
}
