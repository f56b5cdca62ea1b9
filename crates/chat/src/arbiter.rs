//! Version arbiter: optimistic-concurrency decisions for one chat component.
//!
//! Every mutation path (drafts, titles, message appends, offline replay)
//! funnels through [`check_and_bump`], so there is exactly one place where
//! the accept/reject rule lives. Callers hold the per-chat lock, which makes
//! the read–compare–increment race-free.

/// Outcome of a version check against one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// The write is based on the current version; the component advances to
    /// `new_version` atomically with the payload.
    Accepted { new_version: u64 },
    /// The client is stale. It reconciles against `current_version`.
    Rejected { current_version: u64 },
}

/// Compare a client's `based_on_version` with the stored version. Accepted
/// versions advance by exactly 1, so the sequence of accepted versions per
/// component is strictly monotonic.
pub fn check_and_bump(current: u64, based_on: u64) -> VersionCheck {
    if based_on == current {
        VersionCheck::Accepted {
            new_version: current + 1,
        }
    } else {
        VersionCheck::Rejected {
            current_version: current,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0, VersionCheck::Accepted { new_version: 1 })]
    #[case(5, 5, VersionCheck::Accepted { new_version: 6 })]
    #[case(5, 4, VersionCheck::Rejected { current_version: 5 })]
    #[case(5, 6, VersionCheck::Rejected { current_version: 5 })]
    #[case(0, 3, VersionCheck::Rejected { current_version: 0 })]
    fn accepts_only_exact_base(
        #[case] current: u64,
        #[case] based_on: u64,
        #[case] expected: VersionCheck,
    ) {
        assert_eq!(check_and_bump(current, based_on), expected);
    }

    #[test]
    fn accepted_sequence_is_strictly_increasing_by_one() {
        let mut version = 0;
        for expected in 1..=50 {
            match check_and_bump(version, version) {
                VersionCheck::Accepted { new_version } => {
                    assert_eq!(new_version, expected);
                    version = new_version;
                },
                VersionCheck::Rejected { .. } => panic!("in-order write rejected"),
            }
        }
    }

    #[test]
    fn two_writers_from_same_base_admit_exactly_one() {
        // Both devices read version 5; serialization means one check runs
        // after the other's bump.
        let first = check_and_bump(5, 5);
        assert_eq!(first, VersionCheck::Accepted { new_version: 6 });
        let second = check_and_bump(6, 5);
        assert_eq!(second, VersionCheck::Rejected { current_version: 6 });
    }
}
