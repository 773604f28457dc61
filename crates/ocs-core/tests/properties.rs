//! Property-based tests for the causal core.
//!
//! These check the guarantees convergence relies on:
//!  - `Uid::between` always lands strictly inside its bounds
//!  - UIDs and integers survive their wire forms
//!  - Replicas that apply the same ops in different orders end up equal,
//!    including one site's ops delivered in any order

use ocs_core::dot::Dot;
use ocs_core::list::{List, ListOp};
use ocs_core::orset::{ORSet, SetOp};
use ocs_core::replica::Replica;
use ocs_core::uid::Uid;
use ocs_core::vlq;
use proptest::prelude::*;

/// Local edits a site makes before hearing from anyone else.
#[derive(Clone, Debug)]
enum ListEdit {
    Insert(usize, u8),
    Remove(usize),
}

fn list_edits() -> impl Strategy<Value = Vec<ListEdit>> {
    prop::collection::vec(
        prop_oneof![
            (any::<usize>(), any::<u8>()).prop_map(|(i, v)| ListEdit::Insert(i, v)),
            any::<usize>().prop_map(ListEdit::Remove),
        ],
        0..20,
    )
}

fn run_list_edits(list: &mut List<u8>, edits: &[ListEdit]) -> Vec<ListOp<u8>> {
    let mut ops = Vec::new();
    for edit in edits {
        match *edit {
            ListEdit::Insert(i, v) => ops.push(list.insert(i % (list.len() + 1), v)),
            ListEdit::Remove(i) if !list.is_empty() => {
                let (_, op) = list.remove(i % list.len());
                ops.push(op);
            }
            ListEdit::Remove(_) => {}
        }
    }
    ops
}

/// Interleave two op streams, keeping each stream's own order.
fn interleave<T: Clone>(a: &[T], b: &[T], picks: &[bool]) -> Vec<T> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len() + b.len());
    for &pick_a in picks.iter().chain(std::iter::repeat(&true)) {
        if i == a.len() && j == b.len() {
            break;
        }
        if (pick_a && i < a.len()) || j == b.len() {
            out.push(a[i].clone());
            i += 1;
        } else {
            out.push(b[j].clone());
            j += 1;
        }
    }
    out
}

/// `ops` reordered by the sort key at each op's index.
fn permute<T: Clone>(ops: &[T], keys: &[u32]) -> Vec<T> {
    let mut order: Vec<usize> = (0..ops.len()).collect();
    order.sort_by_key(|&i| keys.get(i).copied().unwrap_or(u32::MAX));
    order.into_iter().map(|i| ops[i].clone()).collect()
}

proptest! {
    #[test]
    fn prop_between_is_strictly_inside(steps in prop::collection::vec(any::<bool>(), 1..40)) {
        let mut lo = Uid::min();
        let mut hi = Uid::max();
        for (counter, go_low) in steps.into_iter().enumerate() {
            let mid = Uid::between(&lo, &hi, Dot::new(1, counter as u32 + 1));
            prop_assert!(lo < mid);
            prop_assert!(mid < hi);
            if go_low {
                hi = mid;
            } else {
                lo = mid;
            }
        }
    }

    #[test]
    fn prop_uid_string_roundtrip(steps in prop::collection::vec(any::<bool>(), 1..30), site in 1u32.., counter in any::<u32>()) {
        let mut lo = Uid::min();
        let mut hi = Uid::max();
        for go_low in steps {
            let mid = Uid::between(&lo, &hi, Dot::new(site, counter));
            if go_low { hi = mid } else { lo = mid }
        }
        let s = lo.to_string();
        let parsed: Uid = s.parse().unwrap();
        prop_assert_eq!(&parsed, &lo);
        prop_assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn prop_vlq_u64_roundtrip(n in any::<u64>()) {
        let mut bytes = Vec::new();
        vlq::encode_u64(n, &mut bytes);
        let (decoded, rest) = vlq::decode_u64(&bytes).unwrap();
        prop_assert_eq!(decoded, n);
        prop_assert!(rest.is_empty());
    }

    #[test]
    fn prop_vlq_big_roundtrip(mut magnitude in prop::collection::vec(any::<u8>(), 0..40)) {
        while magnitude.first() == Some(&0) {
            magnitude.remove(0);
        }
        let mut bytes = Vec::new();
        vlq::encode_big(&magnitude, &mut bytes);
        let (decoded, rest) = vlq::decode_big(&bytes).unwrap();
        prop_assert_eq!(decoded, magnitude);
        prop_assert!(rest.is_empty());
    }

    #[test]
    fn prop_list_converges(
        edits1 in list_edits(),
        edits2 in list_edits(),
        picks in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let mut a: List<u8> = List::new(1);
        let mut b = a.replicate(2);
        let ops_a = run_list_edits(&mut a, &edits1);
        let ops_b = run_list_edits(&mut b, &edits2);

        // A third replica hears both sites in an arbitrary interleaving.
        let mut c: List<u8> = List::new(3);
        for op in interleave(&ops_a, &ops_b, &picks) {
            c.execute_op(&op);
        }
        for op in &ops_b {
            a.execute_op(op);
        }
        for op in &ops_a {
            b.execute_op(op);
        }

        let values_a: Vec<u8> = a.values().copied().collect();
        prop_assert_eq!(&values_a, &b.values().copied().collect::<Vec<_>>());
        prop_assert_eq!(&values_a, &c.values().copied().collect::<Vec<_>>());
        prop_assert_eq!(a.summary(), c.summary());
    }

    #[test]
    fn prop_orset_converges(
        edits1 in prop::collection::vec((any::<bool>(), 0u8..5), 0..20),
        edits2 in prop::collection::vec((any::<bool>(), 0u8..5), 0..20),
        picks in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        fn run(set: &mut ORSet<u8>, edits: &[(bool, u8)]) -> Vec<SetOp<u8>> {
            edits
                .iter()
                .filter_map(|&(insert, v)| if insert { Some(set.insert(v)) } else { set.remove(&v) })
                .collect()
        }

        let mut a = ORSet::new(1);
        let mut b = a.replicate(2);
        let ops_a = run(&mut a, &edits1);
        let ops_b = run(&mut b, &edits2);

        let mut c = ORSet::new(3);
        for op in interleave(&ops_a, &ops_b, &picks) {
            c.execute_op(&op);
        }
        for op in &ops_b {
            a.execute_op(op);
        }
        for op in &ops_a {
            b.execute_op(op);
        }

        prop_assert!(a == b);
        prop_assert_eq!(
            a.values().copied().collect::<Vec<_>>(),
            c.values().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn prop_list_single_site_any_order(
        edits in list_edits(),
        keys in prop::collection::vec(any::<u32>(), 20),
    ) {
        let mut a: List<u8> = List::new(1);
        let mut b = a.replicate(2);
        let ops = run_list_edits(&mut a, &edits);
        for op in permute(&ops, &keys) {
            b.execute_op(&op);
        }

        prop_assert_eq!(
            a.values().copied().collect::<Vec<_>>(),
            b.values().copied().collect::<Vec<_>>()
        );
        prop_assert!(b.summary().is_contiguous());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_orset_single_site_any_order(
        edits in prop::collection::vec((any::<bool>(), 0u8..5), 0..20),
        keys in prop::collection::vec(any::<u32>(), 20),
    ) {
        let mut a = ORSet::new(1);
        let mut b = a.replicate(2);
        let ops: Vec<SetOp<u8>> = edits
            .iter()
            .filter_map(|&(insert, v)| if insert { Some(a.insert(v)) } else { a.remove(&v) })
            .collect();
        for op in permute(&ops, &keys) {
            b.execute_op(&op);
        }

        prop_assert_eq!(
            a.values().copied().collect::<Vec<_>>(),
            b.values().copied().collect::<Vec<_>>()
        );
        prop_assert!(a == b);
    }

    #[test]
    fn prop_list_idempotent(edits in list_edits()) {
        let mut a: List<u8> = List::new(1);
        let mut b = a.replicate(2);
        let ops = run_list_edits(&mut a, &edits);
        for op in &ops {
            b.execute_op(op);
        }
        let snapshot = b.clone();
        for op in &ops {
            prop_assert!(b.execute_op(op).is_none());
        }
        prop_assert_eq!(b, snapshot);
    }
}
