//! Window selection: which trigger must be active next, and when.

use chrono::{DateTime, Utc};

use dynlog_core::Trigger;

use crate::store::{StoreError, TriggerStore};

/// Outcome of a selection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NextWake {
    /// The trigger that must be active once `due_at` arrives (or right
    /// away when `due_at` is `None`).
    pub winner: Trigger,
    /// The next instant the active trigger may change; `None` when no
    /// future transition is pending.
    pub due_at: Option<DateTime<Utc>>,
}

/// Compute the trigger to activate next and the instant that decision
/// becomes due.
///
/// The next wake is the earlier of "the current trigger ends" and "a later
/// trigger starts". With w = no current, x = current never ends, y = no
/// later trigger, z = current ends before the later one starts, the three
/// outcomes reduce to:
///
/// - ends-first: `!w && !x && (y || z)`: rank validity at `current.end`,
///   falling back to the synthetic default when nothing covers it
/// - idle: `y` and not ends-first: keep the current trigger, nothing due
/// - starts-next: otherwise the later trigger, due at its start
///
/// Pure given the store's answers; all state handling stays in the
/// scheduler.
pub async fn next_wake(
    store: &dyn TriggerStore,
    current: Option<&Trigger>,
    after: DateTime<Utc>,
) -> Result<NextWake, StoreError> {
    let candidate = store.earliest_enabled_after(after).await?;

    if let Some(end) = current.and_then(|c| c.end) {
        let ends_first = match &candidate {
            Some(next) => next.start.is_none_or(|start| end < start),
            None => true,
        };
        if ends_first {
            let winner = store
                .highest_priority_valid_at(end)
                .await?
                .unwrap_or_else(Trigger::fallback);
            return Ok(NextWake {
                winner,
                due_at: Some(end),
            });
        }
    }

    match candidate {
        None => Ok(NextWake {
            winner: current.cloned().unwrap_or_else(Trigger::fallback),
            due_at: None,
        }),
        Some(next) => {
            let due_at = next.start;
            Ok(NextWake {
                winner: next,
                due_at,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use crate::memory::MemoryStore;

    use super::*;

    fn dmy(day: u32, month: u32, year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    /// Seven windows over Jan-Feb 2017:
    ///
    /// ```text
    ///                 | jan            | feb
    /// 0 (2016)        |                |
    /// 1               |==              |
    /// 2               |  ==            |
    /// 3               |          ======|==============
    /// 4               |                |  ==========
    /// 5               |                |    ===========
    /// 6               |                |                ============
    /// ```
    fn fixture() -> MemoryStore {
        let store = MemoryStore::new();
        let config_id = Uuid::new_v4();
        let windows = [
            ("0", (1, 3, 2016), (1, 3, 2016)),
            ("1", (11, 1, 2017), (12, 1, 2017)),
            ("2", (12, 1, 2017), (14, 1, 2017)),
            ("3", (1, 2, 2017), (14, 2, 2017)),
            ("4", (3, 2, 2017), (8, 2, 2017)),
            ("5", (5, 2, 2017), (13, 2, 2017)),
            ("6", (16, 2, 2017), (25, 2, 2017)),
        ];
        for (name, (sd, sm, sy), (ed, em, ey)) in windows {
            store.put_trigger(Trigger::new(
                name,
                Some(dmy(sd, sm, sy)),
                Some(dmy(ed, em, ey)),
                config_id,
            ));
        }
        store
    }

    async fn by_name(store: &MemoryStore, name: &str) -> Trigger {
        // Walk forward from the epoch of the fixture until the name shows up.
        let mut probe = dmy(1, 1, 2016);
        loop {
            let t = store
                .earliest_enabled_after(probe)
                .await
                .unwrap()
                .expect("fixture trigger not found");
            if t.name == name {
                return t;
            }
            probe = t.start.unwrap();
        }
    }

    async fn assert_wake(
        store: &MemoryStore,
        current: Option<&str>,
        after: (u32, u32),
        expect_winner: &str,
        expect_due: Option<(u32, u32)>,
    ) {
        let current = match current {
            Some(name) => Some(by_name(store, name).await),
            None => None,
        };
        let NextWake { winner, due_at } = next_wake(
            store,
            current.as_ref(),
            dmy(after.0, after.1, 2017),
        )
        .await
        .unwrap();

        assert_eq!(winner.name, expect_winner, "winner at {after:?}");
        assert_eq!(
            due_at,
            expect_due.map(|(d, m)| dmy(d, m, 2017)),
            "due instant at {after:?}"
        );
    }

    #[tokio::test]
    async fn walks_the_whole_timeline() {
        let store = fixture();

        assert_wake(&store, None, (1, 1), "1", Some((11, 1))).await;
        assert_wake(&store, Some("1"), (11, 1), "2", Some((12, 1))).await;
        assert_wake(&store, Some("2"), (13, 1), "default", Some((14, 1))).await;
        assert_wake(&store, None, (15, 1), "3", Some((1, 2))).await;
        assert_wake(&store, Some("3"), (2, 2), "4", Some((3, 2))).await;
        assert_wake(&store, Some("4"), (4, 2), "5", Some((5, 2))).await;
        assert_wake(&store, Some("5"), (6, 2), "3", Some((13, 2))).await;
        assert_wake(&store, Some("5"), (9, 2), "3", Some((13, 2))).await;
        assert_wake(&store, Some("3"), (13, 2), "default", Some((14, 2))).await;
        assert_wake(&store, None, (15, 2), "6", Some((16, 2))).await;
        assert_wake(&store, Some("6"), (17, 2), "default", Some((25, 2))).await;
        assert_wake(&store, None, (17, 2), "default", None).await;
        assert_wake(&store, None, (27, 2), "default", None).await;
    }

    #[tokio::test]
    async fn overlapping_later_start_wins_until_it_ends() {
        let store = fixture();

        // Inside the 3/4/5 overlap the latest start wins.
        let winner = store
            .highest_priority_valid_at(dmy(6, 2, 2017))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(winner.name, "5");

        // Once 5 ends, 3 regains priority (4 is already over).
        let winner = store
            .highest_priority_valid_at(dmy(13, 2, 2017))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(winner.name, "3");
    }

    #[tokio::test]
    async fn unbounded_current_never_yields_to_its_own_end() {
        let store = MemoryStore::new();
        let current = store.put_trigger(Trigger::new("open", None, None, Uuid::new_v4()));

        // No later trigger, current never ends: nothing pending.
        let wake = next_wake(&store, Some(&current), dmy(1, 1, 2017))
            .await
            .unwrap();
        assert_eq!(wake.winner.name, "open");
        assert_eq!(wake.due_at, None);

        // A later trigger still preempts an unbounded current.
        store.put_trigger(Trigger::new(
            "later",
            Some(dmy(5, 1, 2017)),
            None,
            Uuid::new_v4(),
        ));
        let wake = next_wake(&store, Some(&current), dmy(1, 1, 2017))
            .await
            .unwrap();
        assert_eq!(wake.winner.name, "later");
        assert_eq!(wake.due_at, Some(dmy(5, 1, 2017)));
    }

    #[tokio::test]
    async fn back_to_back_windows_hand_over_at_the_shared_instant() {
        let store = MemoryStore::new();
        let first = store.put_trigger(Trigger::new(
            "first",
            Some(dmy(1, 1, 2017)),
            Some(dmy(5, 1, 2017)),
            Uuid::new_v4(),
        ));
        store.put_trigger(Trigger::new(
            "second",
            Some(dmy(5, 1, 2017)),
            Some(dmy(9, 1, 2017)),
            Uuid::new_v4(),
        ));

        // current.end == next.start is a start, not an end: the successor
        // wins at the shared instant.
        let wake = next_wake(&store, Some(&first), dmy(2, 1, 2017))
            .await
            .unwrap();
        assert_eq!(wake.winner.name, "second");
        assert_eq!(wake.due_at, Some(dmy(5, 1, 2017)));
    }

    #[tokio::test]
    async fn selection_is_idempotent() {
        let store = fixture();
        let first = next_wake(&store, None, dmy(1, 1, 2017)).await.unwrap();
        let second = next_wake(&store, None, dmy(1, 1, 2017)).await.unwrap();
        assert_eq!(first, second);
    }
}
