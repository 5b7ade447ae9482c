use criterion::{criterion_group, criterion_main, Criterion};
use folio_collab::{
    Awareness, AwarenessMessage, BlobRecord, BlobStoreConfig, DocCursor, RocksBlobStorage,
    SyncMessage,
};
use std::hint::black_box;
use uuid::Uuid;

fn bench_update_encode(c: &mut Criterion) {
    let client = Uuid::new_v4();
    let update = vec![0u8; 64];

    c.bench_function("update_encode_64B", |b| {
        b.iter(|| {
            let msg = SyncMessage::update(
                black_box(client),
                black_box("ws-1"),
                black_box(1),
                black_box(update.clone()),
            );
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_update_decode(c: &mut Criterion) {
    let encoded = SyncMessage::update(Uuid::new_v4(), "ws-1", 1, vec![0u8; 64])
        .encode()
        .unwrap();

    c.bench_function("update_decode_64B", |b| {
        b.iter(|| {
            black_box(SyncMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_awareness_cursor(c: &mut Criterion) {
    let client = Uuid::new_v4();
    let cursor = AwarenessMessage::Cursor {
        client_id: client,
        cursor: Some(DocCursor {
            doc_id: "page-1".into(),
            block_id: "block-1".into(),
            offset: 10,
        }),
        timestamp: 1,
    };

    c.bench_function("awareness_cursor_encode", |b| {
        b.iter(|| {
            black_box(SyncMessage::awareness(client, 1, black_box(&cursor)).unwrap());
        })
    });

    let mut room = Awareness::new(Uuid::new_v4(), "me");
    let peers: Vec<Uuid> = (0..100).map(|_| Uuid::new_v4()).collect();
    let mut ts = 0u64;
    c.bench_function("awareness_apply_100_peers", |b| {
        b.iter(|| {
            ts += 1;
            for id in &peers {
                room.handle_message(&AwarenessMessage::Cursor {
                    client_id: *id,
                    cursor: None,
                    timestamp: ts,
                });
            }
        })
    });
}

fn bench_blob_put_get(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksBlobStorage::open(BlobStoreConfig::for_testing(dir.path())).unwrap();
    let record = BlobRecord::new("bench", vec![42u8; 16 * 1024], "application/octet-stream");

    c.bench_function("blob_put_16KB", |b| {
        b.iter(|| store.put(black_box(&record)).unwrap())
    });
    c.bench_function("blob_get_16KB", |b| {
        b.iter(|| black_box(store.load(black_box("bench")).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_update_encode,
    bench_update_decode,
    bench_awareness_cursor,
    bench_blob_put_get,
);
criterion_main!(benches);
