//! The ticket inventory: three disjoint-by-construction mappings from ticket
//! hash to owning multisig address, plus the shared state value the rest of
//! the daemon reads and mutates under a single reader-writer lock.
//!
//! Callers hold the lock; every method here is synchronous and touches no
//! I/O, so critical sections stay short.

use std::collections::HashMap;

use crate::prefs::UserVotingPrefs;
use crate::wire::TxHash;

/// Hash-to-multisig-address mapping of one ticket class.
pub type TicketMap = HashMap<TxHash, String>;

#[derive(Debug, Default)]
pub struct TicketPools {
    /// Administrator allowance: low-fee tickets voted anyway. Owned by the
    /// control API, never by block events.
    added: TicketMap,
    /// Known tickets with inadequate fees; tracked but not voted.
    ignored: TicketMap,
    /// Votable tickets.
    live: TicketMap,
}

/// An owned copy of all three classes, taken under one reader lock.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub added: TicketMap,
    pub ignored: TicketMap,
    pub live: TicketMap,
}

impl TicketPools {
    /// Consistent copy of all three sets.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            added: self.added.clone(),
            ignored: self.ignored.clone(),
            live: self.live.clone(),
        }
    }

    pub fn added(&self) -> &TicketMap {
        &self.added
    }

    pub fn ignored(&self) -> &TicketMap {
        &self.ignored
    }

    pub fn live(&self) -> &TicketMap {
        &self.live
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.added.len(), self.ignored.len(), self.live.len())
    }

    /// Replace the administrator allowance wholesale. Hashes in the new set
    /// are promoted out of `ignored` into `live`; hashes dropped from the
    /// previous allowance are demoted to `ignored`.
    pub fn replace_added(&mut self, new: TicketMap) {
        for (hash, addr) in &new {
            self.ignored.remove(hash);
            self.live.insert(*hash, addr.clone());
        }
        for (hash, addr) in std::mem::take(&mut self.added) {
            if !new.contains_key(&hash) {
                self.live.remove(&hash);
                self.ignored.insert(hash, addr);
            }
        }
        self.added = new;
    }

    /// Merge a block's freshly classified tickets. The two batches are
    /// disjoint; last write wins on re-observation.
    pub fn ingest_new_live(&mut self, live: TicketMap, ignored: TicketMap) {
        self.live.extend(live);
        self.ignored.extend(ignored);
    }

    /// Remove voted and missed tickets from circulation. The administrator
    /// allowance is left alone.
    pub fn retire<'a, I>(&mut self, hashes: I)
    where
        I: IntoIterator<Item = &'a TxHash>,
    {
        for hash in hashes {
            self.ignored.remove(hash);
            self.live.remove(hash);
        }
    }
}

/// Everything guarded by the engine's reader-writer lock: the ticket pools
/// and the per-user voting preferences, replaced wholesale on refresh.
#[derive(Debug, Default)]
pub struct StakeState {
    pub pools: TicketPools,
    pub user_voting_config: HashMap<String, UserVotingPrefs>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> TxHash {
        TxHash([n; 32])
    }

    fn map(entries: &[(u8, &str)]) -> TicketMap {
        entries
            .iter()
            .map(|(n, a)| (h(*n), a.to_string()))
            .collect()
    }

    fn assert_disjoint(pools: &TicketPools) {
        for hash in pools.live().keys() {
            assert!(
                !pools.ignored().contains_key(hash),
                "{hash} in both live and ignored"
            );
        }
    }

    #[test]
    fn replace_added_promotes_and_demotes() {
        let mut pools = TicketPools::default();
        pools.ingest_new_live(map(&[(1, "u1")]), map(&[(2, "u2")]));

        // Allow ticket 2: it moves from ignored to live.
        pools.replace_added(map(&[(2, "u2")]));
        assert_eq!(pools.added(), &map(&[(2, "u2")]));
        assert_eq!(pools.live(), &map(&[(1, "u1"), (2, "u2")]));
        assert!(pools.ignored().is_empty());
        assert_disjoint(&pools);

        // Clear the allowance: ticket 2 is demoted again.
        pools.replace_added(TicketMap::new());
        assert!(pools.added().is_empty());
        assert_eq!(pools.live(), &map(&[(1, "u1")]));
        assert_eq!(pools.ignored(), &map(&[(2, "u2")]));
        assert_disjoint(&pools);
    }

    #[test]
    fn replace_added_keeps_carryover_entries() {
        let mut pools = TicketPools::default();
        pools.replace_added(map(&[(3, "u3"), (4, "u4")]));
        pools.replace_added(map(&[(4, "u4")]));

        assert_eq!(pools.added(), &map(&[(4, "u4")]));
        assert_eq!(pools.ignored(), &map(&[(3, "u3")]));
        assert_eq!(pools.live(), &map(&[(4, "u4")]));
        assert_disjoint(&pools);
    }

    #[test]
    fn retire_clears_both_classes_and_spares_added() {
        let mut pools = TicketPools::default();
        pools.replace_added(map(&[(1, "u1")]));
        pools.ingest_new_live(map(&[(2, "u2")]), map(&[(3, "u3")]));

        pools.retire([h(1), h(2), h(3), h(9)].iter());

        assert!(pools.live().is_empty());
        assert!(pools.ignored().is_empty());
        // The allowance is administrator-owned.
        assert_eq!(pools.added(), &map(&[(1, "u1")]));
    }

    #[test]
    fn retire_is_idempotent() {
        let mut pools = TicketPools::default();
        pools.ingest_new_live(map(&[(5, "u5")]), TicketMap::new());
        pools.retire([h(5)].iter());
        pools.retire([h(5)].iter());
        assert!(pools.live().is_empty());
    }

    #[test]
    fn ingest_keeps_batches_in_their_classes() {
        let mut pools = TicketPools::default();
        pools.ingest_new_live(map(&[(1, "a")]), map(&[(2, "b")]));
        pools.ingest_new_live(map(&[(3, "c")]), map(&[(4, "d")]));
        assert_eq!(pools.counts(), (0, 2, 2));
        assert_disjoint(&pools);
    }
}
