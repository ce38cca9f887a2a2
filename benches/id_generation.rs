use criterion::{black_box, criterion_group, criterion_main, Criterion};
use threadbare::id::{IdGenerator, NodeIndex};
use threadbare::session::{new_csrf_token, Session, SessionCodec};
use threadbare::SessionSecret;

use std::sync::Arc;
use std::thread;

fn bench_generate(c: &mut Criterion) {
    let ids = IdGenerator::new(NodeIndex::default());
    c.bench_function("id_generate_single", |b| b.iter(|| black_box(ids.generate())));
}

// Four threads hammer one generator; each iteration mints 1k IDs per thread.
fn bench_generate_contended(c: &mut Criterion) {
    let ids = Arc::new(IdGenerator::new(NodeIndex::default()));
    c.bench_function("id_generate_contended_4x1000", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let ids = ids.clone();
                    thread::spawn(move || {
                        for _ in 0..1000 {
                            black_box(ids.generate());
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        })
    });
}

fn bench_session_codec(c: &mut Criterion) {
    let ids = IdGenerator::new(NodeIndex::default());
    let mut session = Session::new("social.example", "client", "secret", new_csrf_token(&ids));
    session.sign_in("42", "access-token");
    let unsigned = SessionCodec::unsigned();
    let secret = SessionSecret::new("bench-secret-bench-secret-bench-secret").unwrap();
    let signed = SessionCodec::signed(&secret).unwrap();
    let plain = unsigned.encode(&session).unwrap();
    let tagged = signed.encode(&session).unwrap();

    c.bench_function("session_decode_unsigned", |b| b.iter(|| black_box(unsigned.decode(&plain))));
    c.bench_function("session_decode_signed", |b| b.iter(|| black_box(signed.decode(&tagged))));
}

criterion_group!(benches, bench_generate, bench_generate_contended, bench_session_codec);
criterion_main!(benches);
