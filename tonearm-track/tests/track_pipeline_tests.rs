//! Composition tests driving tracks through real pipes
//!
//! The overlap table covers every placement relation two or three clips can
//! have on the timeline: sequences, gaps, partial and complete overlaps,
//! with the last-added clip winning each contested frame. Each case streams
//! a freshly built track through a pipe into a recording sink.

use std::time::{Duration, Instant};
use tokio::time::sleep;

use tonearm_common::{Buffer, Params, Pulse};
use tonearm_pipe::mock::{gain_params, MockProcessor, MockPump, MockSink};
use tonearm_pipe::{Asset, Pipe};
use tonearm_track::Track;

/// Poll until `condition` holds, failing the test after `deadline`.
async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(
            started.elapsed() < deadline,
            "condition not met within {deadline:?}"
        );
        sleep(Duration::from_millis(5)).await;
    }
}

fn ones() -> Buffer {
    Buffer::mono(vec![1.0; 10])
}

fn twos() -> Buffer {
    Buffer::mono(vec![2.0; 10])
}

struct OverlapCase {
    name: &'static str,
    /// Chunk size pushed as a pre-run parameter update; the track itself is
    /// always built with chunk size 2.
    chunk_size: Option<usize>,
    /// Clips as (source value, clip start, clip frames, timeline position),
    /// added in order. Source value 1 cuts from the all-ones buffer, 2 from
    /// the all-twos buffer.
    clips: Vec<(u8, usize, usize, u64)>,
    expected: Vec<f32>,
}

fn overlap_cases() -> Vec<OverlapCase> {
    vec![
        OverlapCase {
            name: "sequence",
            chunk_size: Some(2),
            clips: vec![(1, 3, 1, 3), (2, 5, 3, 4)],
            expected: vec![0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 0.0],
        },
        OverlapCase {
            name: "sequence with larger chunks",
            chunk_size: Some(3),
            clips: vec![(1, 3, 1, 3), (2, 5, 3, 4)],
            expected: vec![0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 0.0, 0.0],
        },
        OverlapCase {
            name: "sequence shifted left",
            chunk_size: Some(2),
            clips: vec![(1, 3, 1, 2), (2, 5, 3, 3)],
            expected: vec![0.0, 0.0, 1.0, 2.0, 2.0, 2.0],
        },
        OverlapCase {
            name: "sequence with gap",
            chunk_size: Some(2),
            clips: vec![(1, 3, 1, 2), (2, 5, 3, 4)],
            expected: vec![0.0, 0.0, 1.0, 0.0, 2.0, 2.0, 2.0, 0.0],
        },
        OverlapCase {
            name: "overlap head of previous clip",
            chunk_size: None,
            clips: vec![(1, 3, 3, 3), (2, 5, 2, 2)],
            expected: vec![0.0, 0.0, 2.0, 2.0, 1.0, 1.0],
        },
        OverlapCase {
            name: "overlap tail of previous clip",
            chunk_size: None,
            clips: vec![(1, 3, 3, 2), (2, 5, 2, 4)],
            expected: vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0],
        },
        OverlapCase {
            name: "overlap middle of longer clip",
            chunk_size: None,
            clips: vec![(1, 3, 5, 2), (2, 5, 2, 4)],
            expected: vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 1.0, 0.0],
        },
        OverlapCase {
            name: "overlap spanning two clips",
            chunk_size: None,
            clips: vec![(1, 3, 2, 2), (1, 3, 2, 5), (2, 5, 2, 4)],
            expected: vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 1.0, 0.0],
        },
        OverlapCase {
            name: "overlap spanning two clips shifted",
            chunk_size: None,
            clips: vec![(1, 3, 2, 2), (1, 5, 2, 5), (2, 3, 2, 3)],
            expected: vec![0.0, 0.0, 1.0, 2.0, 2.0, 1.0, 1.0, 0.0],
        },
        OverlapCase {
            name: "overlap covering one clip",
            chunk_size: None,
            clips: vec![(1, 3, 2, 2), (2, 3, 5, 2)],
            expected: vec![0.0, 0.0, 2.0, 2.0, 2.0, 2.0, 2.0, 0.0],
        },
        OverlapCase {
            name: "overlap covering two clips",
            chunk_size: None,
            clips: vec![(1, 3, 2, 2), (1, 5, 2, 5), (2, 1, 8, 1)],
            expected: vec![0.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 0.0],
        },
    ]
}

#[tokio::test]
async fn test_overlap_composition_through_pipe() {
    for case in overlap_cases() {
        let ones = ones();
        let twos = twos();
        let mut track = Track::new(2, 1);
        for (source, start, frames, position) in &case.clips {
            let buffer = if *source == 1 { &ones } else { &twos };
            track
                .add_clip(*position, buffer.clip(*start, *frames).unwrap())
                .unwrap();
        }
        let resize = case.chunk_size.map(|size| track.chunk_size_param(size));

        let sink = MockSink::new();
        let mut pipe = Pipe::builder(44100)
            .pump(track)
            .sink(sink.clone())
            .build()
            .unwrap();
        if let Some(param) = resize {
            let mut params = Params::new();
            params.add(param);
            pipe.push(params).unwrap();
        }
        pipe.run().wait().await.unwrap();

        assert_eq!(
            sink.recorded().channel(0),
            Some(&case.expected[..]),
            "case: {}",
            case.name
        );
    }
}

#[tokio::test]
async fn test_track_binds_pulse_and_empty_track_completes() {
    let sink = MockSink::new();
    let pipe = Pipe::builder(48000)
        .pump(Track::new(8, 2))
        .sink(sink.clone())
        .build()
        .unwrap();
    assert_eq!(pipe.pulse(), Pulse::new(48000, 8, 2));

    pipe.run().wait().await.unwrap();

    assert_eq!(sink.messages_received(), 0);
    assert_eq!(sink.flushes(), 1);
}

#[tokio::test]
async fn test_deferred_clip_addition_extends_stream() {
    let mut track = Track::new(2, 1);
    track.add_clip(0, ones().clip(0, 4).unwrap()).unwrap();
    let extend = track.add_clip_param(6, twos().clip(0, 3).unwrap());

    let sink = MockSink::new();
    let mut pipe = Pipe::builder(44100)
        .pump(track)
        .sink(sink.clone())
        .build()
        .unwrap();
    let mut params = Params::new();
    params.add(extend);
    pipe.push(params).unwrap();

    pipe.run().wait().await.unwrap();

    // The pushed clip was placed before the first chunk rendered
    assert_eq!(
        sink.recorded().channel(0),
        Some(&[1.0f32, 1.0, 1.0, 1.0, 0.0, 0.0, 2.0, 2.0, 2.0, 0.0][..])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chunk_size_push_mid_stream_preserves_content() {
    let mut track = Track::new(2, 1);
    track.add_clip(0, ones().clip(0, 10).unwrap()).unwrap();
    track.add_clip(15, twos().clip(0, 10).unwrap()).unwrap();
    let resize = track.chunk_size_param(3);

    // The sink parks on the first message, pinning the run open until the
    // resize is queued
    let sink = MockSink::new().hold_at(1);
    let handle = Pipe::builder(44100)
        .pump(track)
        .sink(sink.clone())
        .message_capacity(1)
        .build()
        .unwrap()
        .run();

    wait_until(Duration::from_secs(5), || sink.messages_received() >= 1).await;
    let mut params = Params::new();
    params.add(resize);
    handle.push(params).unwrap();
    sink.release();
    handle.wait().await.unwrap();

    let mut expected = vec![0.0f32; 25];
    expected[..10].fill(1.0);
    expected[15..].fill(2.0);

    // The switch landed mid-stream: two-frame chunks before, three-frame
    // chunks after
    let sizes = sink.message_frames();
    assert_eq!(sizes[0], 2);
    assert!(sizes.contains(&3), "chunk size change never took effect");

    let recorded = sink.recorded();
    let samples = recorded.channel(0).unwrap();
    // Rendered content is invariant under the chunk size switch; only the
    // zero padding after the last entry may differ
    assert!(samples.len() >= 25);
    assert_eq!(&samples[..25], &expected[..]);
    assert!(samples[25..].iter().all(|s| *s == 0.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_push_ends_stream_early() {
    let source = ones();
    let mut track = Track::new(2, 1);
    for i in 0..10u64 {
        track.add_clip(i * 10, source.clip(0, 10).unwrap()).unwrap();
    }
    let reset = track.reset_param();

    // Held open at the first message, so the reset is queued while the
    // track still has 100 frames ahead of it
    let sink = MockSink::new().hold_at(1);
    let handle = Pipe::builder(44100)
        .pump(track)
        .sink(sink.clone())
        .message_capacity(1)
        .build()
        .unwrap()
        .run();

    wait_until(Duration::from_secs(5), || sink.messages_received() >= 1).await;
    let mut params = Params::new();
    params.add(reset);
    handle.push(params).unwrap();
    sink.release();

    // An emptied track ends the stream; the run still completes normally
    handle.wait().await.unwrap();
    assert!(sink.messages_received() >= 1);
    assert!(sink.recorded().num_frames() < 100);
    assert_eq!(sink.flushes(), 1);
}

#[tokio::test]
async fn test_capture_then_compose() {
    // First run: record three marked chunks into an asset
    let asset = Asset::new();
    Pipe::builder(44100)
        .pump(MockPump::new(4, 1, 3).step(1.0))
        .sink(asset.clone())
        .build()
        .unwrap()
        .run()
        .wait()
        .await
        .unwrap();
    assert_eq!(asset.num_frames(), 12);

    // Second run: cut the capture into clips and compose them out of order
    let mut track = Track::new(5, 1);
    track.add_clip(10, asset.clip(0, 4).unwrap()).unwrap();
    track.add_clip(3, asset.clip(4, 4).unwrap()).unwrap();
    track.add_clip(6, asset.clip(8, 4).unwrap()).unwrap();

    let sink = MockSink::new();
    Pipe::builder(44100)
        .pump(track)
        .sink(sink.clone())
        .build()
        .unwrap()
        .run()
        .wait()
        .await
        .unwrap();

    // Third clip was added last, so it wins the contested frame 6
    let expected = [
        0.0f32, 0.0, 0.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 3.0, 1.0, 1.0, 1.0, 1.0, 0.0,
    ];
    assert_eq!(sink.recorded().channel(0), Some(&expected[..]));
}

#[tokio::test]
async fn test_track_through_processor_chain() {
    let mut track = Track::new(2, 1);
    track.add_clip(1, ones().clip(0, 3).unwrap()).unwrap();

    let processor = MockProcessor::new();
    let sink = MockSink::new();
    let mut pipe = Pipe::builder(44100)
        .pump(track)
        .processor(processor.clone())
        .sink(sink.clone())
        .build()
        .unwrap();
    pipe.push(gain_params(&processor, 2.0)).unwrap();

    pipe.run().wait().await.unwrap();

    assert_eq!(
        sink.recorded().channel(0),
        Some(&[0.0f32, 2.0, 2.0, 2.0][..])
    );
}

#[tokio::test]
async fn test_identical_tracks_reproduce_identical_runs() {
    fn sliced_track() -> Track {
        let mut track = Track::new(3, 1);
        let mut add = |position, start, frames| {
            track
                .add_clip(position, ones().clip(start, frames).unwrap())
                .unwrap();
        };
        add(1, 0, 4);
        add(3, 2, 5);
        add(9, 5, 2);
        track
    }

    let mut recordings = Vec::new();
    for _ in 0..2 {
        let sink = MockSink::new();
        Pipe::builder(44100)
            .pump(sliced_track())
            .sink(sink.clone())
            .build()
            .unwrap()
            .run()
            .wait()
            .await
            .unwrap();
        recordings.push(sink.recorded());
    }
    assert_eq!(recordings[0], recordings[1]);
}
