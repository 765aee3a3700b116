#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::common::entity::RuleId;
use domain::range::tree::IntervalTree;

// Drive the interval tree with an op sequence and cross-check stab and
// overlap queries against a linear scan.
//
// Ops are consumed in 5-byte chunks:
//   [0]      = opcode (0-1 insert, 2 remove, 3 stab, 4 overlap)
//   [1..3]   = first port
//   [3..5]   = second port
fuzz_target!(|data: &[u8]| {
    let mut tree = IntervalTree::with_node_capacity(512);
    let mut model: Vec<(u16, u16, RuleId)> = Vec::new();
    let mut next_id = 0u32;

    for chunk in data.chunks_exact(5) {
        let a = u16::from_le_bytes([chunk[1], chunk[2]]);
        let b = u16::from_le_bytes([chunk[3], chunk[4]]);
        let (start, end) = (a.min(b), a.max(b));

        match chunk[0] % 5 {
            0 | 1 => {
                if model.len() < 256 {
                    let id = RuleId(next_id);
                    next_id += 1;
                    tree.insert(start, end, id).unwrap();
                    model.push((start, end, id));
                }
            }
            2 => {
                if let Some(pos) = model
                    .iter()
                    .position(|(s, e, _)| (*s, *e) == (start, end))
                {
                    let (s, e, id) = model.remove(pos);
                    assert!(tree.remove(s, e, id));
                } else {
                    assert!(!tree.remove(start, end, RuleId(u32::MAX)));
                }
            }
            3 => {
                let mut got: Vec<u32> = tree.stab(a).iter().map(|r| r.0).collect();
                got.sort_unstable();
                let mut expected: Vec<u32> = model
                    .iter()
                    .filter(|(s, e, _)| *s <= a && a <= *e)
                    .map(|(_, _, id)| id.0)
                    .collect();
                expected.sort_unstable();
                assert_eq!(got, expected);
            }
            _ => {
                let mut got: Vec<u32> = tree.overlap(start, end).iter().map(|r| r.0).collect();
                got.sort_unstable();
                let mut expected: Vec<u32> = model
                    .iter()
                    .filter(|(s, e, _)| *s <= end && start <= *e)
                    .map(|(_, _, id)| id.0)
                    .collect();
                expected.sort_unstable();
                assert_eq!(got, expected);
            }
        }
    }
});
