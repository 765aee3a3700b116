#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::common::entity::RuleId;
use domain::prefix::trie::PrefixTrie;
use domain::rule::entity::IpPrefix;

// Drive the trie with an op sequence and cross-check every lookup
// against a linear scan over the live (prefix, id) set.
//
// Ops are consumed in 6-byte chunks:
//   [0]      = opcode (0-1 insert, 2 remove, 3 lookup)
//   [1..5]   = address bits
//   [5]      = prefix length (mod 33)
fuzz_target!(|data: &[u8]| {
    let mut trie = PrefixTrie::with_node_capacity(1024);
    let mut model: Vec<(IpPrefix, RuleId)> = Vec::new();
    let mut next_id = 0u32;

    for chunk in data.chunks_exact(6) {
        let addr = u32::from_le_bytes([chunk[1], chunk[2], chunk[3], chunk[4]]);
        let len = chunk[5] % 33;
        let prefix = IpPrefix {
            addr: addr & IpPrefix { addr: 0, len }.mask(),
            len,
        };

        match chunk[0] % 4 {
            0 | 1 => {
                if model.len() < 256 {
                    let id = RuleId(next_id);
                    next_id += 1;
                    trie.insert(prefix, id).unwrap();
                    model.push((prefix, id));
                }
            }
            2 => {
                if let Some(pos) = model.iter().position(|(p, _)| *p == prefix) {
                    let (p, id) = model.remove(pos);
                    assert!(trie.remove(p, id));
                } else {
                    assert!(!trie.remove(prefix, RuleId(u32::MAX)));
                }
            }
            _ => {
                let mut got: Vec<u32> = trie.covering_ids(addr).iter().map(|r| r.0).collect();
                got.sort_unstable();
                let mut expected: Vec<u32> = model
                    .iter()
                    .filter(|(p, _)| p.contains(addr))
                    .map(|(_, id)| id.0)
                    .collect();
                expected.sort_unstable();
                assert_eq!(got, expected);

                let lens: Vec<u8> = trie.lookup(addr).map(|(len, _)| len).collect();
                assert!(lens.windows(2).all(|w| w[0] > w[1]));
            }
        }
    }
});
