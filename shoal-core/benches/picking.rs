use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use shoal_core::config::PickerConfig;
use shoal_core::observer::TracingObserver;
use shoal_core::picker::{PiecePicker, build_standard_stack, build_streaming_stack};
use shoal_core::torrent::{BLOCK_SIZE, BitField, PeerId, PeerState, PeerView, TorrentLayout};

const PIECES: u32 = 2048;

fn layout() -> TorrentLayout {
    let piece_length = BLOCK_SIZE * 16;
    let total_size = u64::from(piece_length) * u64::from(PIECES);
    TorrentLayout::single_file("bench.bin", piece_length, total_size).expect("valid layout")
}

/// Swarm of partial peers, each holding roughly half of the pieces.
fn swarm() -> Vec<PeerState> {
    (0..16u8)
        .map(|seed| {
            let held = (0..PIECES).filter(|index| (index * 7 + u32::from(seed)) % 3 != 0);
            PeerState::new(PeerId::from_seed(seed), BitField::from_indices(PIECES, held))
        })
        .collect()
}

fn bench_standard_stack(c: &mut Criterion) {
    let layout = layout();
    let peers = swarm();
    let others: Vec<&dyn PeerView> = peers[1..].iter().map(|peer| peer as &dyn PeerView).collect();

    c.bench_function("standard_stack_pick_until_exhausted", |b| {
        b.iter_batched(
            || {
                let mut picker = build_standard_stack(
                    &PickerConfig::deterministic(1),
                    TracingObserver::shared("bench"),
                );
                picker
                    .initialise(&BitField::new(PIECES), &layout, Vec::new())
                    .expect("initialise");
                (picker, peers[0].clone())
            },
            |(mut picker, mut peer)| {
                let available = peer.bitfield().clone();
                while picker
                    .pick_piece(&mut peer, &available, &others, 64, 0, PIECES - 1)
                    .is_requests()
                {}
                picker.current_request_count()
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_streaming_stack(c: &mut Criterion) {
    let layout = layout();
    let peers = swarm();
    let others: Vec<&dyn PeerView> = peers[1..].iter().map(|peer| peer as &dyn PeerView).collect();

    c.bench_function("streaming_stack_pick_batch", |b| {
        b.iter_batched(
            || {
                let mut picker = build_streaming_stack(
                    &PickerConfig::deterministic(1),
                    TracingObserver::shared("bench"),
                );
                picker
                    .initialise(&BitField::new(PIECES), &layout, Vec::new())
                    .expect("initialise");
                picker.seek_to_position(&layout.files()[0], layout.total_size() / 2);
                (picker, peers[0].clone())
            },
            |(mut picker, mut peer)| {
                let available = peer.bitfield().clone();
                for _ in 0..32 {
                    let _ = picker.pick_piece(&mut peer, &available, &others, 16, 0, PIECES - 1);
                }
                picker.current_request_count()
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_standard_stack, bench_streaming_stack);
criterion_main!(benches);
