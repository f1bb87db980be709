//! Anchor, pacing and cross-stream synchronization

mod helpers;

use avsync_common::{RendererEvent, StreamKind};
use avsync_renderer::MediaBuffer;
use helpers::{audio_buffer, video_frame, ConsumedLog, TestRenderer, TimedLog};
use std::time::Duration;

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_video_only_frames_paced_on_time() {
    let t = TestRenderer::start();
    let log = ConsumedLog::new();

    for (i, ts) in [0i64, 33_333, 66_666].into_iter().enumerate() {
        t.handle
            .queue_buffer(StreamKind::Video, video_frame(ts), log.signal(i as u32))
            .unwrap();
    }

    // First frame anchors the clock, the second is due at 33 ms
    sleep_ms(20).await;
    assert_eq!(log.entries(), vec![(0, true)]);

    sleep_ms(200).await;
    assert_eq!(log.entries(), vec![(0, true), (1, true), (2, true)]);

    let snapshot = t.snapshot().await;
    assert_eq!(snapshot.stats.frames_on_time, 3);
    assert_eq!(snapshot.stats.frames_late, 0);
    assert_eq!(snapshot.anchor_media_us, Some(0));
    assert_eq!(snapshot.last_rendered_media_us, Some(66_666));
}

#[tokio::test(start_paused = true)]
async fn test_start_gated_until_video_buffered() {
    let t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.set_media_presence(StreamKind::Audio, true).unwrap();
    t.handle.set_media_presence(StreamKind::Video, true).unwrap();

    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(100, 1_000_000), log.signal(0))
        .unwrap();
    t.handle
        .queue_buffer(StreamKind::Video, video_frame(1_000_000), log.signal(1))
        .unwrap();

    // One video frame is not enough to start
    let snapshot = t.snapshot().await;
    assert_eq!(snapshot.anchor_media_us, None);
    assert_eq!(snapshot.audio_queue_len, 1);
    sleep_ms(100).await;
    assert_eq!(t.probe.bytes_written(), 0);
    assert!(log.entries().is_empty());

    t.handle
        .queue_buffer(StreamKind::Video, video_frame(1_033_333), log.signal(2))
        .unwrap();
    let snapshot = t.snapshot().await;
    assert_eq!(snapshot.anchor_media_us, Some(1_000_000));

    sleep_ms(500).await;
    assert_eq!(log.entries(), vec![(0, true), (1, true), (2, true)]);

    let snapshot = t.snapshot().await;
    assert_eq!(snapshot.stats.frames_on_time, 2);
    assert_eq!(snapshot.stats.frames_late, 0);
    assert!(!snapshot.video_waits_for_first_audio);
}

#[tokio::test(start_paused = true)]
async fn test_video_waits_for_first_audio_sample() {
    let t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.set_media_presence(StreamKind::Audio, true).unwrap();
    t.handle.set_media_presence(StreamKind::Video, true).unwrap();

    for (i, ts) in [0i64, 33_333, 66_666].into_iter().enumerate() {
        t.handle
            .queue_buffer(StreamKind::Video, video_frame(ts), log.signal(i as u32))
            .unwrap();
    }
    sleep_ms(200).await;

    // Nothing starts while the audio queue is empty
    let snapshot = t.snapshot().await;
    assert_eq!(snapshot.anchor_media_us, None);
    assert_eq!(snapshot.video_queue_len, 3);
    assert!(log.entries().is_empty());

    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(100, 0), log.signal(10))
        .unwrap();
    sleep_ms(300).await;

    assert_eq!(log.len(), 4);
    assert_eq!(log.rendered(10), Some(true));
    assert_eq!(t.snapshot().await.stats.frames_late, 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_first_video_after_discontinuity_resets_anchor() {
    let t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.signal_discontinuity().await.unwrap();

    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(20, 5_000_000), log.signal(0))
        .unwrap();
    sleep_ms(100).await;
    assert_eq!(log.entries(), vec![(0, true)]);

    // Video arrives more than a second behind the audio-derived anchor
    sleep_ms(1000).await;
    let queued_at_us = t.handle.clock().now_us();
    t.handle
        .queue_buffer(StreamKind::Video, video_frame(5_000_000), log.signal(1))
        .unwrap();
    sleep_ms(5).await;

    let snapshot = t.snapshot().await;
    assert_eq!(log.rendered(1), Some(true));
    assert_eq!(snapshot.anchor_media_us, Some(5_000_000));
    let anchor_real_us = snapshot.anchor_real_us.unwrap();
    assert!(anchor_real_us >= queued_at_us && anchor_real_us <= queued_at_us + 1_000);
    assert_eq!(snapshot.stats.anchor_resets, 1);

    // Not the first frame any more, not ahead of the anchor: dropped
    sleep_ms(1000).await;
    t.handle
        .queue_buffer(StreamKind::Video, video_frame(5_000_000), log.signal(2))
        .unwrap();
    sleep_ms(5).await;

    let snapshot = t.snapshot().await;
    assert_eq!(log.rendered(2), Some(false));
    assert_eq!(snapshot.stats.frames_late, 1);
    assert_eq!(snapshot.stats.anchor_resets, 1);
    assert!(snapshot.video_late_by_us > 900_000);
}

#[tokio::test(start_paused = true)]
async fn test_sync_queues_drops_leading_audio() {
    let t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.set_media_presence(StreamKind::Audio, true).unwrap();
    t.handle.set_media_presence(StreamKind::Video, true).unwrap();
    t.handle.signal_discontinuity().await.unwrap();
    assert!(t.snapshot().await.sync_queues);

    for (i, ts) in [0i64, 50_000, 100_000, 150_000].into_iter().enumerate() {
        t.handle
            .queue_buffer(StreamKind::Audio, audio_buffer(50, ts), log.signal(i as u32))
            .unwrap();
    }
    for (i, ts) in [200_000i64, 233_333, 266_666, 300_000].into_iter().enumerate() {
        t.handle
            .queue_buffer(StreamKind::Video, video_frame(ts), log.signal(10 + i as u32))
            .unwrap();
    }

    sleep_ms(1000).await;

    assert_eq!(log.rendered(0), Some(false));
    assert_eq!(log.rendered(1), Some(false));
    assert_eq!(log.rendered(2), Some(true));
    assert_eq!(log.rendered(3), Some(true));
    for id in 10..14 {
        assert_eq!(log.rendered(id), Some(true), "video frame {}", id - 10);
    }

    let snapshot = t.snapshot().await;
    assert!(!snapshot.sync_queues);
    assert_eq!(snapshot.stats.audio_samples_dropped, 2);
    assert_eq!(snapshot.stats.frames_late, 0);
}

#[tokio::test(start_paused = true)]
async fn test_live_audio_behind_received_video_dropped() {
    let t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.set_live_stream(true).unwrap();
    t.handle
        .queue_buffer(StreamKind::Video, video_frame(33_000), log.signal(0))
        .unwrap();
    sleep_ms(5).await;
    assert_eq!(log.entries(), vec![(0, true)]);

    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(20, 20_000), log.signal(1))
        .unwrap();
    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(20, 40_000), log.signal(2))
        .unwrap();
    sleep_ms(100).await;

    assert_eq!(log.rendered(1), Some(false));
    assert_eq!(log.rendered(2), Some(true));
    assert_eq!(t.snapshot().await.stats.audio_samples_dropped, 1);
    assert_eq!(t.probe.bytes_written(), 20 * helpers::FRAME_BYTES as u64);
}

#[tokio::test(start_paused = true)]
async fn test_live_discontinuous_audio_held_until_due() {
    let t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.set_live_stream(true).unwrap();
    sleep_ms(10).await;

    // Anchor at (1.0 s media, 10 ms real)
    t.handle
        .queue_buffer(StreamKind::Video, video_frame(1_000_000), log.signal(0))
        .unwrap();
    let snapshot = t.snapshot().await;
    assert_eq!(snapshot.anchor_media_us, Some(1_000_000));
    assert_eq!(snapshot.anchor_real_us, Some(10_000));

    // Due at 510 ms real; held until half the sink latency before that
    t.handle
        .queue_buffer(
            StreamKind::Audio,
            MediaBuffer::new(vec![0u8; 20 * helpers::FRAME_BYTES], 1_500_000)
                .with_discontinuity(),
            log.signal(1),
        )
        .unwrap();

    sleep_ms(400).await;
    assert_eq!(t.probe.bytes_written(), 0);
    assert_eq!(log.rendered(1), None);

    sleep_ms(200).await;
    assert_eq!(log.rendered(1), Some(true));
    assert_eq!(t.snapshot().await.anchor_media_us, Some(1_500_000));
}

#[tokio::test(start_paused = true)]
async fn test_seek_position_pins_reported_position() {
    let mut t = TestRenderer::start();

    t.handle.notify_seek_position(7_000_000).unwrap();
    let event = t
        .wait_for_event(|e| matches!(e, RendererEvent::Position { .. }))
        .await;
    assert!(matches!(
        event,
        RendererEvent::Position {
            position_us: 7_000_000,
            ..
        }
    ));

    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(100, 0), ConsumedLog::new().signal(0))
        .unwrap();
    sleep_ms(300).await;

    assert_eq!(t.snapshot().await.position_us, Some(7_000_000));
    for event in t.take_events() {
        if let RendererEvent::Position { position_us, .. } = event {
            assert_eq!(position_us, 7_000_000);
        }
    }

    // A discontinuity releases the pin
    t.handle.signal_discontinuity().await.unwrap();
    assert_eq!(t.snapshot().await.position_us, None);
}

#[tokio::test(start_paused = true)]
async fn test_position_updates_rate_limited() {
    let mut t = TestRenderer::start();

    // One second of audio in 100 ms buffers
    for i in 0..10i64 {
        t.handle
            .queue_buffer(
                StreamKind::Audio,
                audio_buffer(100, i * 100_000),
                ConsumedLog::new().signal(i as u32),
            )
            .unwrap();
    }
    sleep_ms(1500).await;

    let positions: Vec<i64> = t
        .take_events()
        .into_iter()
        .filter_map(|e| match e {
            RendererEvent::Position { position_us, .. } => Some(position_us),
            _ => None,
        })
        .collect();

    assert!(!positions.is_empty());
    assert!(positions.len() <= 12, "{} position updates", positions.len());
}

#[tokio::test(start_paused = true)]
async fn test_stale_drain_after_resume_keeps_frames_on_deadline() {
    let t = TestRenderer::start();
    let log = TimedLog::new(t.handle.clock());

    for ts in [0i64, 100_000, 200_000, 300_000] {
        t.handle
            .queue_buffer(StreamKind::Video, video_frame(ts), log.signal(ts))
            .unwrap();
    }
    sleep_ms(10).await;
    t.handle.pause().unwrap();
    sleep_ms(10).await;

    // Re-anchors 100 ms media at 20 ms; the drain posted before the pause is
    // still due at 100 ms
    t.handle.resume().unwrap();
    sleep_ms(85).await;

    t.handle
        .queue_buffer(StreamKind::Video, video_frame(400_000), log.signal(400_000))
        .unwrap();
    sleep_ms(400).await;

    let entries = log.entries();
    assert_eq!(entries.len(), 5);
    for (media_us, wall_us, rendered) in entries {
        let due_us = if media_us == 0 { 0 } else { media_us - 80_000 };
        assert!(rendered);
        assert!(
            wall_us >= due_us && wall_us < due_us + 2_000,
            "frame at {} us rendered at {} us, due at {} us",
            media_us,
            wall_us,
            due_us
        );
    }
    assert!(!t.snapshot().await.drain_video_pending);
}

#[tokio::test(start_paused = true)]
async fn test_live_audio_defers_until_video_anchors() {
    let t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.set_live_stream(true).unwrap();
    t.handle.set_media_presence(StreamKind::Audio, true).unwrap();
    t.handle.set_media_presence(StreamKind::Video, true).unwrap();

    // Gate opens on the second frame with anchor media 0 and no real time
    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(20, 50_000), log.signal(0))
        .unwrap();
    t.handle
        .queue_buffer(StreamKind::Video, video_frame(0), log.signal(1))
        .unwrap();
    t.handle
        .queue_buffer(StreamKind::Video, video_frame(33_333), log.signal(2))
        .unwrap();

    sleep_ms(3).await;
    let snapshot = t.snapshot().await;
    assert_eq!(t.probe.bytes_written(), 0);
    assert_eq!(log.rendered(0), None);
    assert_eq!(log.rendered(1), Some(true));
    assert_eq!(snapshot.anchor_media_us, Some(0));
    assert!(snapshot.anchor_real_us.is_some());

    // Next poll finds the anchor complete
    sleep_ms(30).await;
    assert_eq!(log.rendered(0), Some(true));
    assert_eq!(t.probe.bytes_written(), 20 * helpers::FRAME_BYTES as u64);
}

#[tokio::test(start_paused = true)]
async fn test_flush_ends_queue_sync() {
    let mut t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.set_media_presence(StreamKind::Audio, true).unwrap();
    t.handle.set_media_presence(StreamKind::Video, true).unwrap();
    t.handle.signal_discontinuity().await.unwrap();

    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(20, 0), log.signal(0))
        .unwrap();
    sleep_ms(50).await;

    // Audio is held waiting for a video head that never comes
    assert!(t.snapshot().await.sync_queues);
    assert_eq!(t.probe.bytes_written(), 0);

    t.handle.flush(StreamKind::Video).unwrap();
    t.wait_for_event(|e| matches!(e, RendererEvent::FlushComplete { .. }))
        .await;
    sleep_ms(50).await;

    assert!(!t.snapshot().await.sync_queues);
    assert_eq!(log.entries(), vec![(0, true)]);
}

#[tokio::test(start_paused = true)]
async fn test_eos_ends_queue_sync() {
    let mut t = TestRenderer::start();
    let log = ConsumedLog::new();

    t.handle.set_media_presence(StreamKind::Audio, true).unwrap();
    t.handle.set_media_presence(StreamKind::Video, true).unwrap();
    t.handle.signal_discontinuity().await.unwrap();

    t.handle
        .queue_buffer(StreamKind::Audio, audio_buffer(20, 0), log.signal(0))
        .unwrap();
    sleep_ms(50).await;
    assert!(t.snapshot().await.sync_queues);

    t.handle
        .queue_eos(StreamKind::Video, avsync_common::FinalResult::EndOfStream)
        .unwrap();
    let event = t
        .wait_for_event(|e| matches!(e, RendererEvent::Eos { .. }))
        .await;
    assert!(matches!(
        event,
        RendererEvent::Eos {
            stream: StreamKind::Video,
            ..
        }
    ));
    sleep_ms(50).await;

    assert!(!t.snapshot().await.sync_queues);
    assert_eq!(log.entries(), vec![(0, true)]);
}
