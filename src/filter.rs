//! Log-filter registry with incremental delivery.
//!
//! A filter records a block range, an optional address, and optional
//! per-position topics, plus a cursor into the chain's log sequence so
//! repeated `changes` polls only see logs appended since the last poll.

use std::collections::HashMap;

use crate::block::Log;
use crate::common::{Addr, Hash};

/// One installed filter. Block bounds use the transport's encoding:
/// negative values are tags (pending/latest) and, like zero, leave that
/// side of the range unbounded.
#[derive(Clone, Debug)]
pub struct Filter {
    pub from: i64,
    pub to: i64,
    pub address: Option<Addr>,
    pub topics: Vec<Option<Hash>>,
    last_log: usize,
}

impl Filter {
    /// A log matches iff its block number is inside the range, its address
    /// equals the filter address when one is set, and every set topic
    /// position equals the log's topic at that position. Logs may carry
    /// extra topics beyond those the filter constrains.
    pub fn matches(&self, log: &Log) -> bool {
        let number = log.block_number.0 as i64;
        if self.from > 0 && number < self.from {
            return false
        }
        if self.to > 0 && number > self.to {
            return false
        }
        if let Some(addr) = &self.address {
            if &log.address != addr {
                return false
            }
        }
        for (i, topic) in self.topics.iter().enumerate() {
            if let Some(want) = topic {
                if log.topics.get(i) != Some(want) {
                    return false
                }
            }
        }
        true
    }

    /// All matches in `logs`, scanning from the start.
    pub fn all_matches(&self, logs: &[Log]) -> Vec<Log> {
        logs.iter().filter(|l| self.matches(l)).cloned().collect()
    }

    /// Matches appended since the previous call; advances the cursor to
    /// the end of `logs`.
    pub fn take_changes(&mut self, logs: &[Log]) -> Vec<Log> {
        let out = logs[self.last_log..]
            .iter()
            .filter(|l| self.matches(l))
            .cloned()
            .collect();
        self.last_log = logs.len();
        out
    }
}

#[derive(Clone, Default)]
pub struct Filters {
    next_id: u64,
    active: HashMap<u64, Filter>,
}

impl Filters {
    /// Allocates a fresh id. The caller validates the block range first.
    pub fn install(
        &mut self, from: i64, to: i64, address: Option<Addr>,
        topics: Vec<Option<Hash>>,
    ) -> u64 {
        self.next_id += 1;
        self.active.insert(
            self.next_id,
            Filter {
                from,
                to,
                address,
                topics,
                last_log: 0,
            },
        );
        self.next_id
    }

    pub fn uninstall(&mut self, id: u64) -> bool {
        self.active.remove(&id).is_some()
    }

    pub fn get(&self, id: u64) -> Option<&Filter> {
        self.active.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Filter> {
        self.active.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Uint64;

    fn log(addr: u8, number: u64, topics: &[u8]) -> Log {
        Log {
            address: Addr::from([addr; 20]),
            block_number: Uint64(number),
            topics: topics.iter().map(|t| Hash::from([*t; 32])).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn matches_by_range_and_address() {
        let f = Filter {
            from: 10,
            to: 20,
            address: Some(Addr::from([1; 20])),
            topics: Vec::new(),
            last_log: 0,
        };
        assert!(f.matches(&log(1, 10, &[])));
        assert!(f.matches(&log(1, 20, &[])));
        assert!(!f.matches(&log(1, 9, &[])));
        assert!(!f.matches(&log(1, 21, &[])));
        assert!(!f.matches(&log(2, 15, &[])));
    }

    #[test]
    fn tag_bounds_are_unbounded() {
        let f = Filter {
            from: 0,
            to: -2,
            address: None,
            topics: Vec::new(),
            last_log: 0,
        };
        assert!(f.matches(&log(1, 0, &[])));
        assert!(f.matches(&log(1, u32::MAX as u64, &[])));
    }

    #[test]
    fn topic_positions() {
        let f = Filter {
            from: 0,
            to: -2,
            address: None,
            topics: vec![None, Some(Hash::from([7; 32]))],
            last_log: 0,
        };
        // unset positions match anything; extra log topics are fine
        assert!(f.matches(&log(1, 5, &[1, 7, 9])));
        assert!(f.matches(&log(1, 5, &[2, 7])));
        assert!(!f.matches(&log(1, 5, &[1, 8])));
        // a log with too few topics cannot match a set position
        assert!(!f.matches(&log(1, 5, &[1])));
    }

    #[test]
    fn changes_cursor_is_monotone() {
        let mut f = Filter {
            from: 0,
            to: -2,
            address: None,
            topics: Vec::new(),
            last_log: 0,
        };
        let mut logs = vec![log(1, 5, &[]), log(1, 6, &[])];
        assert_eq!(f.take_changes(&logs).len(), 2);
        assert!(f.take_changes(&logs).is_empty());
        logs.push(log(1, 7, &[]));
        let next = f.take_changes(&logs);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].block_number, Uint64(7));
        assert!(f.take_changes(&logs).is_empty());
    }

    #[test]
    fn registry_ids_are_monotone() {
        let mut fs = Filters::default();
        let a = fs.install(0, -2, None, Vec::new());
        let b = fs.install(0, -2, None, Vec::new());
        assert!(b > a);
        assert!(fs.uninstall(a));
        assert!(!fs.uninstall(a));
        assert!(fs.get(b).is_some());
    }
}
