//! End-to-end capture flow on tokio's paused clock: confirmation, countdown, cue
//! choreography, validation, persistence and the step sequence.

mod helpers;

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use tokio::time::{sleep, Duration, Instant};

use bodyscan_lib::camera::CameraMode;
use bodyscan_lib::capture::{CaptureCue, CaptureSource, StepFailure, StepPhase};
use bodyscan_lib::{ScanError, ScanEvent, ScanStep, SessionStatus, WeightUnit};

use helpers::{collect_until, harness, harness_with, step_succeeded, test_config, wait_for, PoseScript};

fn is_confirmed(event: &ScanEvent) -> bool {
    matches!(event, ScanEvent::Confirmed { .. })
}

fn confirmation_counts(events: &[ScanEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            ScanEvent::Alignment {
                confirmation_count, ..
            } => Some(*confirmation_count),
            _ => None,
        })
        .collect()
}

fn png_upload() -> Vec<u8> {
    let image = RgbImage::from_pixel(16, 24, Rgb([200, 180, 160]));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

#[tokio::test(start_paused = true)]
async fn interrupted_run_confirms_on_the_tenth_tick() {
    let poses = PoseScript::new(true).then(&[
        true, true, true, true, false, true, true, true, true, true,
    ]);
    let mut h = harness(poses);
    h.controller.start().await.unwrap();

    let seen = collect_until(&mut h.events, Duration::from_secs(5), is_confirmed).await;

    assert_eq!(confirmation_counts(&seen), vec![1, 2, 3, 4, 0, 1, 2, 3, 4, 5]);
    assert_eq!(h.poses.calls(), 10);

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, StepPhase::Counting);
    assert!(snapshot.confirmed);
}

#[tokio::test(start_paused = true)]
async fn confirmation_fires_once_and_sampling_pauses_until_saved() {
    let mut h = harness(PoseScript::new(true));
    h.controller.start().await.unwrap();

    let seen = collect_until(
        &mut h.events,
        Duration::from_secs(10),
        step_succeeded(ScanStep::Front),
    )
    .await;

    assert_eq!(seen.iter().filter(|event| is_confirmed(event)).count(), 1);
    let confirmed_at = seen.iter().position(is_confirmed).unwrap();
    assert!(
        !seen[confirmed_at..]
            .iter()
            .any(|event| matches!(event, ScanEvent::Alignment { .. })),
        "no overlay updates once the countdown owns the step"
    );

    let ticks: Vec<u8> = seen
        .iter()
        .filter_map(|event| match event {
            ScanEvent::CountdownTick { remaining, .. } => Some(*remaining),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, vec![3, 2, 1]);

    // Five sampling ticks plus the validation grab.
    assert_eq!(h.poses.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn capture_cues_fire_at_fixed_offsets_after_the_countdown() {
    let mut h = harness(PoseScript::new(true));
    h.controller.start().await.unwrap();

    wait_for(&mut h.events, is_confirmed).await;
    let confirmed_at = Instant::now();

    let mut seen = collect_until(&mut h.events, Duration::from_secs(10), |event| {
        matches!(
            event,
            ScanEvent::CaptureCue {
                cue: CaptureCue::ReleaseLock,
                ..
            }
        )
    })
    .await;
    let release_at = Instant::now();
    seen.extend(
        collect_until(
            &mut h.events,
            Duration::from_secs(10),
            step_succeeded(ScanStep::Front),
        )
        .await,
    );

    let cues: Vec<(CaptureCue, u64)> = seen
        .iter()
        .filter_map(|event| match event {
            ScanEvent::CaptureCue { cue, offset_ms, .. } => Some((*cue, *offset_ms)),
            _ => None,
        })
        .collect();

    let order: Vec<CaptureCue> = cues.iter().map(|(cue, _)| *cue).collect();
    assert_eq!(
        order,
        vec![
            CaptureCue::ClearOverlay,
            CaptureCue::FlashStart,
            CaptureCue::FlashEnd,
            CaptureCue::GrabFrame,
            CaptureCue::ReleaseLock,
        ]
    );
    for ((cue, actual), expected) in cues.iter().zip([100u64, 200, 350, 450, 700]) {
        assert!(
            actual.abs_diff(expected) <= 5,
            "{cue:?} fired at {actual}ms, expected {expected}ms"
        );
    }

    // Countdown of three seconds, then the cue sequence.
    let elapsed = release_at.duration_since(confirmed_at);
    assert!(elapsed >= Duration::from_millis(3700), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3705), "{elapsed:?}");

    let snapshot = h.controller.snapshot().await.unwrap();
    assert!(!snapshot.capture_lock);
    assert_eq!(snapshot.phase, StepPhase::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn misaligned_frame_at_capture_keeps_nothing_and_resumes_sampling() {
    let mut h = harness(PoseScript::new(false).then(&[true; 5]));
    h.controller.start().await.unwrap();

    wait_for(&mut h.events, is_confirmed).await;
    assert_eq!(h.poses.calls(), 5);

    let seen = collect_until(&mut h.events, Duration::from_secs(10), |event| {
        matches!(event, ScanEvent::StepFailed { .. })
    })
    .await;
    assert!(seen.iter().any(|event| matches!(
        event,
        ScanEvent::FrameValidated {
            is_aligned: false,
            ..
        }
    )));
    assert!(matches!(
        seen.last(),
        Some(ScanEvent::StepFailed {
            step: ScanStep::Front,
            reason: StepFailure::MisalignedAtCapture,
        })
    ));

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, StepPhase::Idle);
    assert!(!snapshot.has_capture);
    assert_eq!(snapshot.confirmation_count, 0);
    assert!(!snapshot.capture_lock);
    assert!(h.store.scans().is_empty());

    let before = h.poses.calls();
    wait_for(&mut h.events, |event| {
        matches!(event, ScanEvent::Alignment { .. })
    })
    .await;
    assert!(h.poses.calls() > before);
}

#[tokio::test(start_paused = true)]
async fn exit_stops_every_tick() {
    let mut h = harness(PoseScript::new(false));
    h.controller.start().await.unwrap();
    sleep(Duration::from_millis(500)).await;
    assert!(h.poses.calls() >= 5);

    h.controller.exit().await.unwrap();
    let calls = h.poses.calls();
    let grabs = h.cameras.grabs();

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.poses.calls(), calls);
    assert_eq!(h.cameras.grabs(), grabs);

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Exited);

    h.controller.exit().await.unwrap();
    let exits = collect_until(&mut h.events, Duration::from_secs(1), |event| {
        matches!(event, ScanEvent::SessionExited { .. })
    })
    .await;
    assert!(matches!(exits.last(), Some(ScanEvent::SessionExited { .. })));
    assert!(h.events.try_recv().is_err(), "second exit emits nothing");
}

#[tokio::test(start_paused = true)]
async fn exit_during_countdown_cancels_the_capture() {
    let mut h = harness(PoseScript::new(true));
    h.controller.start().await.unwrap();

    wait_for(&mut h.events, |event| {
        matches!(event, ScanEvent::CountdownTick { remaining: 2, .. })
    })
    .await;
    h.controller.exit().await.unwrap();
    let calls = h.poses.calls();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.poses.calls(), calls);
    assert!(h.store.scans().is_empty());

    let mut late = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        late.push(event);
    }
    assert!(!late
        .iter()
        .any(|event| matches!(event, ScanEvent::CaptureCue { .. } | ScanEvent::Saving { .. })));
}

#[tokio::test(start_paused = true)]
async fn full_session_saves_three_steps_and_completes_with_weight() {
    let mut h = harness(PoseScript::new(true));
    h.controller.start().await.unwrap();

    for step in ScanStep::ALL {
        wait_for(&mut h.events, step_succeeded(step)).await;
        let snapshot = h.controller.snapshot().await.unwrap();
        assert_eq!(snapshot.active_step, step);
        assert_eq!(snapshot.phase, StepPhase::Succeeded);
        assert!(snapshot.has_capture);
        assert!(snapshot.completed_steps.contains(&step));

        let snapshot = h.controller.advance().await.unwrap();
        match step.next() {
            Some(next) => {
                assert_eq!(snapshot.active_step, next);
                assert_eq!(snapshot.phase, StepPhase::Idle);
                assert_eq!(snapshot.confirmation_count, 0);
                assert_eq!(snapshot.countdown_remaining, 0);
                assert!(!snapshot.has_capture);
                assert!(snapshot.feedback.is_none());
            }
            None => assert_eq!(snapshot.status, SessionStatus::AwaitingWeight),
        }
    }

    let err = h
        .controller
        .submit_weight(0.0, WeightUnit::Kg)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidInput(_)));

    let completed = h
        .controller
        .submit_weight(72.5, WeightUnit::Kg)
        .await
        .unwrap();
    assert_eq!(completed.scan_index, 1);

    let event = wait_for(&mut h.events, |event| {
        matches!(event, ScanEvent::SessionCompleted { .. })
    })
    .await;
    if let ScanEvent::SessionCompleted { weight, .. } = event {
        assert_eq!(weight.value, 72.5);
        assert_eq!(weight.unit, WeightUnit::Kg);
    }

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Complete);
    assert_eq!(snapshot.progress, 1.0);

    let scans = h.store.scans();
    let steps: Vec<ScanStep> = scans.iter().map(|scan| scan.step).collect();
    assert_eq!(steps, ScanStep::ALL.to_vec());
    for scan in &scans {
        assert_eq!(scan.source, CaptureSource::Camera);
        assert_eq!(scan.metadata.alignment_score, 100);
        assert!(scan.metadata.shoulders_level);
        assert!(scan.bytes > 0);
    }
    assert_eq!(h.store.completed()[0].scans.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn operations_out_of_order_are_rejected() {
    let h = harness(PoseScript::new(false));

    assert!(h.controller.snapshot().await.is_none());
    assert!(matches!(
        h.controller.advance().await,
        Err(ScanError::InvalidState(_))
    ));

    h.controller.start().await.unwrap();
    assert!(matches!(
        h.controller.start().await,
        Err(ScanError::InvalidState(_))
    ));
    assert!(matches!(
        h.controller.advance().await,
        Err(ScanError::InvalidState(_))
    ));
    assert!(matches!(
        h.controller.retry_save().await,
        Err(ScanError::InvalidState(_))
    ));
    assert!(matches!(
        h.controller.submit_weight(70.0, WeightUnit::Kg).await,
        Err(ScanError::InvalidState(_))
    ));

    h.controller.exit().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_save_keeps_the_still_for_a_retry() {
    let mut h = harness(PoseScript::new(true));
    h.store.fail_next(1);
    h.controller.start().await.unwrap();

    wait_for(&mut h.events, |event| {
        matches!(
            event,
            ScanEvent::StepFailed {
                reason: StepFailure::PersistenceFailed { .. },
                ..
            }
        )
    })
    .await;

    let snapshot = h.controller.snapshot().await.unwrap();
    assert!(matches!(snapshot.phase, StepPhase::Failed { .. }));
    assert!(snapshot.has_capture);

    let calls = h.poses.calls();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.poses.calls(), calls, "no sampling while a save is pending");

    let scan = h.controller.retry_save().await.unwrap();
    assert_eq!(scan.step, ScanStep::Front);
    assert_eq!(
        h.controller.snapshot().await.unwrap().phase,
        StepPhase::Succeeded
    );
    assert_eq!(h.store.scans().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retake_discards_the_capture_and_confirms_again() {
    let mut h = harness(PoseScript::new(true));
    h.controller.start().await.unwrap();
    wait_for(&mut h.events, step_succeeded(ScanStep::Front)).await;

    let snapshot = h.controller.retake().await.unwrap();
    assert_eq!(snapshot.active_step, ScanStep::Front);
    assert_eq!(snapshot.phase, StepPhase::Idle);
    assert!(!snapshot.has_capture);
    assert!(snapshot.completed_steps.is_empty());
    assert_eq!(snapshot.confirmation_count, 0);

    wait_for(&mut h.events, step_succeeded(ScanStep::Front)).await;
    assert_eq!(h.store.scans().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn uploaded_image_replaces_the_camera_capture() {
    let h = harness(PoseScript::new(false));
    h.controller.start().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let err = h
        .controller
        .upload_image(b"not an image".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidInput(_)));

    let scan = h.controller.upload_image(png_upload()).await.unwrap();
    assert_eq!(scan.step, ScanStep::Front);
    assert_eq!(
        h.controller.snapshot().await.unwrap().phase,
        StepPhase::Succeeded
    );

    let stored = h.store.scans();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].source, CaptureSource::Upload);
    assert_eq!(stored[0].metadata.source, "upload");

    let calls = h.poses.calls();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.poses.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn switching_cameras_reopens_the_device_and_keeps_sampling() {
    let mut h = harness(PoseScript::new(false));
    h.controller.start().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let snapshot = h.controller.toggle_camera().await.unwrap();
    assert_eq!(snapshot.camera_mode, CameraMode::User);
    assert_eq!(
        h.cameras.opened(),
        vec![CameraMode::Environment, CameraMode::User]
    );
    wait_for(&mut h.events, |event| {
        matches!(event, ScanEvent::CameraSwitched { mode: CameraMode::User })
    })
    .await;

    let calls = h.poses.calls();
    sleep(Duration::from_millis(500)).await;
    assert!(h.poses.calls() > calls);
}

#[tokio::test(start_paused = true)]
async fn camera_failure_faults_the_session() {
    let mut h = harness(PoseScript::new(false));
    h.controller.start().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    h.cameras.break_device();
    wait_for(&mut h.events, |event| {
        matches!(event, ScanEvent::SessionFaulted { .. })
    })
    .await;

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Faulted);

    let calls = h.poses.calls();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.poses.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn countdown_can_abort_when_the_pose_drifts() {
    let mut config = test_config();
    config.capture.abort_countdown_on_misalignment = true;
    let mut h = harness_with(config, PoseScript::new(false).then(&[true; 5]));
    h.controller.start().await.unwrap();

    let seen = collect_until(&mut h.events, Duration::from_secs(10), |event| {
        matches!(event, ScanEvent::CountdownAborted { .. })
    })
    .await;
    assert!(!seen
        .iter()
        .any(|event| matches!(event, ScanEvent::CaptureCue { .. })));

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, StepPhase::Idle);
    assert_eq!(snapshot.confirmation_count, 0);
    assert!(h.store.scans().is_empty());
}

#[tokio::test(start_paused = true)]
async fn auto_advance_moves_to_the_next_step_after_a_save() {
    let mut config = test_config();
    config.capture.auto_advance = true;
    let mut h = harness_with(config, PoseScript::new(true));
    h.controller.start().await.unwrap();

    wait_for(&mut h.events, |event| {
        matches!(
            event,
            ScanEvent::StepEntered {
                step: ScanStep::Side,
                ..
            }
        )
    })
    .await;
    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.active_step, ScanStep::Side);
    assert_eq!(snapshot.completed_steps, vec![ScanStep::Front]);
}

#[tokio::test(start_paused = true)]
async fn save_in_flight_refuses_restarts_and_still_lands() {
    let mut h = harness(PoseScript::new(true));
    h.store.set_delay(Duration::from_secs(2));
    h.controller.start().await.unwrap();

    wait_for(&mut h.events, |event| {
        matches!(event, ScanEvent::Saving { step: ScanStep::Front })
    })
    .await;
    let calls = h.poses.calls();

    assert!(matches!(
        h.controller.retry_save().await,
        Err(ScanError::InvalidState(_))
    ));
    assert!(matches!(
        h.controller.retake().await,
        Err(ScanError::InvalidState(_))
    ));
    assert!(matches!(
        h.controller.toggle_camera().await,
        Err(ScanError::InvalidState(_))
    ));
    assert!(matches!(
        h.controller.upload_image(png_upload()).await,
        Err(ScanError::InvalidState(_))
    ));
    assert_eq!(h.controller.snapshot().await.unwrap().phase, StepPhase::Saving);
    assert_eq!(h.cameras.opened(), vec![CameraMode::Environment]);

    wait_for(&mut h.events, step_succeeded(ScanStep::Front)).await;
    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, StepPhase::Succeeded);
    assert_eq!(snapshot.completed_steps, vec![ScanStep::Front]);
    assert_eq!(h.store.scans().len(), 1);
    assert_eq!(h.poses.calls(), calls, "no sampling while saving");
}

#[tokio::test(start_paused = true)]
async fn retake_during_countdown_cancels_the_capture() {
    let mut h = harness(PoseScript::new(true));
    h.controller.start().await.unwrap();

    wait_for(&mut h.events, |event| {
        matches!(event, ScanEvent::CountdownTick { remaining: 2, .. })
    })
    .await;
    let snapshot = h.controller.retake().await.unwrap();
    assert_eq!(snapshot.phase, StepPhase::Idle);
    assert_eq!(snapshot.countdown_remaining, 0);
    assert_eq!(snapshot.confirmation_count, 0);

    let seen = collect_until(
        &mut h.events,
        Duration::from_secs(10),
        step_succeeded(ScanStep::Front),
    )
    .await;
    let confirmed_at = seen.iter().position(is_confirmed).unwrap();
    assert!(
        !seen[..confirmed_at].iter().any(|event| matches!(
            event,
            ScanEvent::CountdownTick { .. } | ScanEvent::CaptureCue { .. }
        )),
        "the cancelled countdown kept running"
    );
    assert_eq!(confirmation_counts(&seen), vec![1, 2, 3, 4, 5]);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.store.scans().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retake_during_capture_releases_the_lock_and_saves_nothing() {
    let mut h = harness(PoseScript::new(true));
    h.controller.start().await.unwrap();

    wait_for(&mut h.events, |event| {
        matches!(
            event,
            ScanEvent::CaptureCue {
                cue: CaptureCue::FlashStart,
                ..
            }
        )
    })
    .await;
    let snapshot = h.controller.retake().await.unwrap();
    assert_eq!(snapshot.phase, StepPhase::Idle);
    assert!(!snapshot.capture_lock);
    assert!(!snapshot.has_capture);

    let seen = collect_until(
        &mut h.events,
        Duration::from_secs(10),
        step_succeeded(ScanStep::Front),
    )
    .await;
    let confirmed_at = seen.iter().position(is_confirmed).unwrap();
    assert!(
        !seen[..confirmed_at].iter().any(|event| matches!(
            event,
            ScanEvent::CaptureCue { .. }
                | ScanEvent::FrameValidated { .. }
                | ScanEvent::Saving { .. }
        )),
        "the cancelled capture kept running"
    );

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.store.scans().len(), 1);
}
