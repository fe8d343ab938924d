use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dns_message::types::test_util::{a_record, domain};
use dns_message::types::{QueryClass, QueryType, RecordClass, RecordType};
use resolver_core::cache::SharedCache;

#[allow(non_snake_case)]
fn bench__put(c: &mut Criterion) {
    let cache = SharedCache::new(8192);
    let rr = a_record("www.example.com.", "1.2.3.4".parse().unwrap());
    let mut i: u32 = 0;

    c.bench_function("cache/put", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            let name = domain(&format!("host-{}.example.com.", i % 4096));
            cache.put(
                name,
                QueryType::Record(RecordType::A),
                QueryClass::Record(RecordClass::IN),
                vec![rr.clone()],
                300,
            );
        })
    });
}

#[allow(non_snake_case)]
fn bench__get_hit(c: &mut Criterion) {
    let cache = SharedCache::new(8192);
    let rr = a_record("www.example.com.", "1.2.3.4".parse().unwrap());
    cache.put(
        domain("www.example.com."),
        QueryType::Record(RecordType::A),
        QueryClass::Record(RecordClass::IN),
        vec![rr],
        300,
    );

    c.bench_function("cache/get_hit", |b| {
        b.iter(|| {
            black_box(cache.get(
                &domain("www.example.com."),
                QueryType::Record(RecordType::A),
                QueryClass::Record(RecordClass::IN),
            ))
        })
    });
}

#[allow(non_snake_case)]
fn bench__get_miss(c: &mut Criterion) {
    let cache = SharedCache::new(8192);

    c.bench_function("cache/get_miss", |b| {
        b.iter(|| {
            black_box(cache.get(
                &domain("nowhere.example.net."),
                QueryType::Record(RecordType::A),
                QueryClass::Record(RecordClass::IN),
            ))
        })
    });
}

criterion_group!(benches, bench__put, bench__get_hit, bench__get_miss);
criterion_main!(benches);
