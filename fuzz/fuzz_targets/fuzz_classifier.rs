#![no_main]

use libfuzzer_sys::fuzz_target;

use application::{ClassifierSettings, PacketClassifier};
use domain::common::entity::{Protocol, RuleId};
use domain::rule::entity::{
    Action, ActionList, IpPrefix, PacketFilter, PacketHeader, PortRange, Rule,
};

// Deserialize fuzz data into a classifier scenario: rules + packets.
//
// Layout (variable-length):
//   [0]    = number of rules (1-8)
//   [1]    = selector byte (sub-target: 0=classify, 1=add+delete, 2=modify)
//   rest   = consumed in 20-byte chunks (rule) and 13-byte chunks (packet)
fuzz_target!(|data: &[u8]| {
    if data.len() < 22 {
        return;
    }

    let num_rules = ((data[0] as usize) % 8) + 1;
    let selector = data[1] % 3;
    let mut cursor = 2;

    let classifier = PacketClassifier::new(ClassifierSettings {
        max_rules: 64,
        expected_rule_count: 64,
        ..ClassifierSettings::default()
    });

    let mut added: Vec<Rule> = Vec::new();
    for i in 0..num_rules {
        if cursor + 20 > data.len() {
            break;
        }
        let chunk = &data[cursor..cursor + 20];
        cursor += 20;

        let priority = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let src_len = chunk[4] % 33;
        let src_addr = u32::from_le_bytes([chunk[5], chunk[6], chunk[7], chunk[8]]);
        let dst_len = chunk[9] % 33;
        let dst_addr = u32::from_le_bytes([chunk[10], chunk[11], chunk[12], chunk[13]]);
        let a = u16::from_le_bytes([chunk[14], chunk[15]]);
        let b = u16::from_le_bytes([chunk[16], chunk[17]]);
        let proto = chunk[18];
        let use_fields = chunk[19];

        let src_prefix = IpPrefix {
            addr: src_addr & IpPrefix { addr: 0, len: src_len }.mask(),
            len: src_len,
        };
        let dst_prefix = IpPrefix {
            addr: dst_addr & IpPrefix { addr: 0, len: dst_len }.mask(),
            len: dst_len,
        };
        let range = PortRange {
            start: a.min(b),
            end: a.max(b),
        };

        let filter = PacketFilter {
            src_prefix: (use_fields & 1 != 0).then_some(src_prefix),
            dst_prefix: (use_fields & 2 != 0).then_some(dst_prefix),
            src_port: (use_fields & 4 != 0).then_some(range),
            dst_port: (use_fields & 8 != 0).then_some(range),
            protocol: Protocol::from_number(proto),
        };
        let rule = Rule::new(
            RuleId(i as u32),
            priority,
            filter,
            ActionList::single(Action::Drop),
        );
        if classifier.add_rule(rule.clone()).is_ok() {
            added.push(rule);
        }
    }

    // Remaining bytes drive packets.
    while cursor + 13 <= data.len() {
        let chunk = &data[cursor..cursor + 13];
        cursor += 13;
        let header = PacketHeader {
            src_ip: u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            dst_ip: u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            src_port: u16::from_le_bytes([chunk[8], chunk[9]]),
            dst_port: u16::from_le_bytes([chunk[10], chunk[11]]),
            protocol: chunk[12],
        };
        let result = classifier.classify(&header);

        // A reported match must resolve to a live rule whose declarative
        // filter accepts the packet field by field.
        if let Some(id) = result.rule_id {
            let rule = classifier.get_rule(id).expect("matched id must resolve");
            assert!(rule.enabled);
            let f = &rule.filter;
            assert!(f.src_prefix_or_any().contains(header.src_ip));
            assert!(f.dst_prefix_or_any().contains(header.dst_ip));
            assert!(f.src_port_or_any().contains(header.src_port));
            assert!(f.dst_port_or_any().contains(header.dst_port));
            assert!(f.protocol.accepts(header.protocol));
        }
    }

    match selector {
        // Pure classification only.
        0 => {}
        // Tear everything down; the classifier must end empty.
        1 => {
            for rule in &added {
                classifier.delete_rule(rule.id).unwrap();
            }
            assert_eq!(classifier.rule_count(), 0);
        }
        // Modify every rule to a catch-all and confirm it still answers.
        _ => {
            for rule in &added {
                let body = Rule::new(
                    rule.id,
                    rule.priority,
                    PacketFilter::any(),
                    ActionList::single(Action::Drop),
                );
                classifier.modify_rule(rule.id, body).unwrap();
            }
            if !added.is_empty() {
                let header = PacketHeader {
                    src_ip: 1,
                    dst_ip: 2,
                    src_port: 3,
                    dst_port: 4,
                    protocol: 6,
                };
                assert!(classifier.classify(&header).is_match());
            }
        }
    }
});
