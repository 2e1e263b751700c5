use std::collections::BTreeSet;

use super::{ReferralGraph, MAX_LEVEL};
use crate::account::Account;

/// Iterative pre-order walk over a referral subtree.
///
/// Children are visited in the order they were referred. A clone taken
/// before consumption replays the same sequence. The graph stays borrowed for
/// the lifetime of the walk, so nothing can be linked while it is in use.
#[derive(Clone, Debug)]
pub struct TreeWalk<'a> {
    graph: &'a ReferralGraph,
    stack: Vec<(Account, u8)>,
    visited: BTreeSet<Account>,
}

impl<'a> TreeWalk<'a> {
    pub(super) fn new(graph: &'a ReferralGraph, root: Account) -> Self {
        Self {
            graph,
            stack: vec![(root, 0)],
            visited: BTreeSet::new(),
        }
    }
}

impl Iterator for TreeWalk<'_> {
    type Item = (Account, u8);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((account, level)) = self.stack.pop() {
            if !self.visited.insert(account) {
                continue;
            }
            if level < MAX_LEVEL {
                for child in self.graph.referees(&account).iter().rev() {
                    if !self.visited.contains(child) {
                        self.stack.push((*child, level + 1));
                    }
                }
            }
            return Some((account, level));
        }
        None
    }
}

/// Upward walk along referrers, bounded by [`MAX_LEVEL`] hops.
#[derive(Clone, Debug)]
pub struct Ancestors<'a> {
    graph: &'a ReferralGraph,
    current: Account,
    steps: u8,
    visited: BTreeSet<Account>,
}

impl<'a> Ancestors<'a> {
    pub(super) fn new(graph: &'a ReferralGraph, start: Account) -> Self {
        let mut visited = BTreeSet::new();
        visited.insert(start);
        Self {
            graph,
            current: start,
            steps: 0,
            visited,
        }
    }
}

impl Iterator for Ancestors<'_> {
    type Item = Account;

    fn next(&mut self) -> Option<Self::Item> {
        if self.steps >= MAX_LEVEL {
            return None;
        }
        let parent = self.graph.referrer(&self.current);
        if parent.is_null() || !self.visited.insert(parent) {
            return None;
        }
        self.steps += 1;
        self.current = parent;
        Some(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> (ReferralGraph, Vec<Account>) {
        // root
        // ├── a
        // │   ├── c
        // │   └── d
        // └── b
        //     └── e
        let mut graph = ReferralGraph::new();
        graph.set_require_community_owner(false);
        let names = ["root", "a", "b", "c", "d", "e"];
        let accounts: Vec<Account> = names.iter().map(|n| Account::derive(n)).collect();
        graph.register_community_owners(&[accounts[0]]);
        graph.add_referral(accounts[0], accounts[1]).unwrap();
        graph.add_referral(accounts[0], accounts[2]).unwrap();
        graph.add_referral(accounts[1], accounts[3]).unwrap();
        graph.add_referral(accounts[1], accounts[4]).unwrap();
        graph.add_referral(accounts[2], accounts[5]).unwrap();
        (graph, accounts)
    }

    #[test]
    fn preorder_follows_insertion_order() {
        let (graph, acc) = build();
        let walk: Vec<_> = graph.referral_tree(acc[0]).collect();
        assert_eq!(
            walk,
            vec![
                (acc[0], 0),
                (acc[1], 1),
                (acc[3], 2),
                (acc[4], 2),
                (acc[2], 1),
                (acc[5], 2),
            ]
        );
    }

    #[test]
    fn subtree_levels_are_relative() {
        let (graph, acc) = build();
        let walk: Vec<_> = graph.referral_tree(acc[1]).collect();
        assert_eq!(walk, vec![(acc[1], 0), (acc[3], 1), (acc[4], 1)]);
        let leaf: Vec<_> = graph.referral_tree(acc[5]).collect();
        assert_eq!(leaf, vec![(acc[5], 0)]);
    }

    #[test]
    fn walk_can_be_replayed() {
        let (graph, acc) = build();
        let walk = graph.referral_tree(acc[0]);
        let first: Vec<_> = walk.clone().collect();
        let second: Vec<_> = walk.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn level_search_finds_descendants_only() {
        let (graph, acc) = build();
        assert_eq!(graph.referee_level_in_tree(acc[0], &acc[1]), Some(1));
        assert_eq!(graph.referee_level_in_tree(acc[0], &acc[5]), Some(2));
        assert_eq!(graph.referee_level_in_tree(acc[1], &acc[4]), Some(1));
        assert_eq!(graph.referee_level_in_tree(acc[1], &acc[5]), None);
        assert_eq!(graph.referee_level_in_tree(acc[0], &acc[0]), None);
    }

    #[test]
    fn ancestors_walk_up_to_the_root() {
        let (graph, acc) = build();
        let chain: Vec<_> = graph.ancestors(acc[5]).collect();
        assert_eq!(chain, vec![acc[2], acc[0]]);
        assert_eq!(graph.top_referrer(acc[4]), acc[0]);
        assert_eq!(graph.top_referrer(acc[0]), Account::NULL);
    }
}
