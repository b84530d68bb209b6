//! Benchmarks for the per-request authentication hot path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keygate_core::auth::{
    decode_event, AuthRequest, Authenticator, ProtocolValidator, RequestTarget, SchnorrVerifier,
    TokenVerifier,
};
use keygate_core::test_utils::{provider_verifier, EventSigner, MemoryLinkStore, TokenMinter, TEST_URL};
use keygate_core::{unix_now, IdentityLinkStore, Policy, SubjectId};
use std::sync::Arc;

fn bench_decode(c: &mut Criterion) {
    let signer = EventSigner::from_seed(31);
    let credential = signer.credential("GET", TEST_URL, unix_now());

    c.bench_function("decode_event", |b| {
        b.iter(|| black_box(decode_event(black_box(&credential)).unwrap()));
    });
}

fn bench_protocol_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("protocol_validation");
    let validator = ProtocolValidator::new(Arc::new(SchnorrVerifier::new()));
    let signer = EventSigner::from_seed(31);
    let target = RequestTarget::new("GET", TEST_URL);

    for content_len in [0usize, 256, 4096] {
        let now = unix_now();
        let event = signer.sign_event(
            keygate_core::auth::HTTP_AUTH_KIND,
            now,
            EventSigner::binding_tags("GET", TEST_URL),
            &"x".repeat(content_len),
        );
        let credential = EventSigner::encode(&event);

        group.bench_with_input(BenchmarkId::new("validate", content_len), &credential, |b, credential| {
            b.iter(|| black_box(validator.validate_at(credential, &target, now).unwrap()));
        });
    }

    group.finish();
}

fn bench_token_verification(c: &mut Criterion) {
    let verifier = provider_verifier();
    let token = TokenMinter::provider().mint("bench-user", Some("bench@example.com"));

    c.bench_function("provider_token_verify", |b| {
        b.iter(|| black_box(verifier.verify(black_box(&token)).unwrap()));
    });
}

fn bench_flexible_protocol_fallback(c: &mut Criterion) {
    let store = Arc::new(MemoryLinkStore::new());
    let signer = EventSigner::from_seed(32);
    store
        .link(&signer.pubkey(), &SubjectId::new("bench-user").unwrap())
        .unwrap();

    let authenticator = Authenticator::new(
        Arc::new(provider_verifier()),
        Arc::new(ProtocolValidator::new(Arc::new(SchnorrVerifier::new()))),
        store,
    );

    c.bench_function("flexible_protocol_fallback", |b| {
        let request = AuthRequest::new("GET", TEST_URL).with_authorization(signer.credential_now("GET", TEST_URL));
        b.iter(|| black_box(authenticator.authenticate(Policy::Flexible, &request).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_protocol_validation,
    bench_token_verification,
    bench_flexible_protocol_fallback
);
criterion_main!(benches);
