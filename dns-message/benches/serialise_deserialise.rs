use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::net::Ipv4Addr;

use dns_message::types::test_util::*;
use dns_message::types::*;

#[allow(non_snake_case)]
fn bench__question(c: &mut Criterion) {
    let message = Message::from_question(
        1234,
        Question {
            name: domain("www.example.com."),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        },
    );

    c.bench_function("serialise/question", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.to_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.to_octets().unwrap();
    c.bench_function("deserialise/question", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

#[allow(non_snake_case)]
fn bench__answer(c: &mut Criterion) {
    let mut message = Message::from_question(
        1234,
        Question {
            name: domain("www.example.com."),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        },
    );
    message.header.is_response = true;
    for i in 0..16 {
        message
            .answers
            .push(a_record("www.example.com.", Ipv4Addr::new(10, 0, 0, i)));
    }

    c.bench_function("serialise/answer", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.to_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.to_octets().unwrap();
    c.bench_function("deserialise/answer", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

criterion_group!(benches, bench__question, bench__answer);
criterion_main!(benches);
