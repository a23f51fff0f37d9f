use std::net::Ipv4Addr;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use hifi_bridge_codec::domain::{DomainList, DomainNodeEntry, NodeType, Packet};
use hifi_bridge_codec::stun::decode_binding_response;
use uuid::Uuid;

fn criterion_benchmark(c: &mut Criterion) {
    let binding_response = [
        0x01, 0x01, 0x00, 0x0c, 0x21, 0x12, 0xa4, 0x42, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a,
        0x0b, 0x0c, 0x00, 0x20, 0x00, 0x08, 0x00, 0x01, 0x8e, 0xdb, 0xea, 0x12, 0xd5, 0x4b,
    ];

    let mut stun_criterion = c.benchmark_group("stun");
    stun_criterion.throughput(Throughput::Elements(1));
    stun_criterion.bench_function("decode_binding_response", |bencher| {
        bencher.iter(|| decode_binding_response(&binding_response).unwrap());
    });
    stun_criterion.finish();

    let node = |port: u16| DomainNodeEntry {
        node_type: NodeType::AudioMixer,
        node_id: Uuid::from_u128(1),
        public_addr: Ipv4Addr::new(198, 51, 100, 9),
        public_port: port,
        local_addr: Ipv4Addr::UNSPECIFIED,
        local_port: 0,
        permissions: 1,
        is_replicated: false,
        session_local_id: port,
        connection_secret: Uuid::from_u128(2),
    };

    let list = DomainList {
        domain_id: Uuid::from_u128(3),
        domain_local_id: 1,
        session_id: Uuid::from_u128(4),
        local_id: 2,
        permissions: 0xff,
        is_authenticated: true,
        nodes: (0..6).map(node).collect(),
    };

    let bytes = list.encode(0);

    let mut domain_criterion = c.benchmark_group("domain");
    domain_criterion.throughput(Throughput::Elements(1));
    domain_criterion.bench_function("decode_domain_list", |bencher| {
        bencher.iter(|| {
            let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0).unwrap();
            DomainList::decode(&mut packet).unwrap()
        });
    });
    domain_criterion.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
