//! End-to-end session tests.
//!
//! Drives a `RunSession` the way the host app does: inertial samples at 20 Hz,
//! GPS fixes once a second, cadence ticks driven manually so the results are
//! deterministic.
//!
//! Run with: `cargo test --test session_flow`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use stride_meter::{
    CadenceConfig, CadenceListener, CadenceUpdate, CalibrationRecord, GpsFix, RunSession,
    SensorSample, SessionConfig, StrideModelFitter,
};

const HZ: usize = 20;
/// One foot strikes every 0.8 s -> 150 SPM
const STRIKE_EVERY: usize = 16;
/// ~5.6 m of latitude per second (a brisk run)
const LAT_PER_SECOND: f64 = 0.00005;

fn manual_session() -> RunSession {
    let _ = env_logger::builder().is_test(true).try_init();
    RunSession::with_config(SessionConfig {
        cadence: CadenceConfig {
            update_interval_seconds: 3.0,
            auto_tick: false,
            ..CadenceConfig::default()
        },
        ..SessionConfig::default()
    })
}

fn sample(i: usize) -> SensorSample {
    let gyro_z = if i % STRIKE_EVERY == 5 { -3.0 } else { 0.6 };
    SensorSample::new(i as f64 / HZ as f64, [1.0, 0.4, 0.1], [0.0, 0.1, gyro_z]).with_heart_rate(155)
}

/// Feed seconds [from, to) of samples, with a fix per second at `accuracy`,
/// ticking every 3 s of data.
fn run(session: &RunSession, from: usize, to: usize, accuracy: f64) {
    for second in from..to {
        for i in second * HZ..(second + 1) * HZ {
            session.add_sample(sample(i));
        }
        session.add_location(GpsFix::new(
            51.5 + second as f64 * LAT_PER_SECOND,
            -0.1278,
            accuracy,
            second as f64,
        ));
        if (second + 1) % 3 == 0 {
            session.tick();
        }
    }
}

fn calibration_records() -> Vec<CalibrationRecord> {
    // 100 m course at increasing effort
    vec![
        CalibrationRecord::new(135, 150.0, 54.0),
        CalibrationRecord::new(128, 158.0, 48.6),
        CalibrationRecord::new(121, 166.0, 43.7),
        CalibrationRecord::new(116, 172.0, 40.5),
        CalibrationRecord::new(109, 180.0, 36.3),
        CalibrationRecord::new(104, 188.0, 33.2),
    ]
}

#[test]
fn test_gps_only_run() {
    let session = manual_session();
    session.start();
    run(&session, 0, 30, 5.0);

    assert!((session.current_cadence() - 150.0).abs() < 1e-6);
    assert!(session.current_steps() > 0);

    let summary = session.stop();
    // 29 intervals of ~5.56 m
    assert!((summary.total_distance - 29.0 * 5.56).abs() < 2.0);
    assert_eq!(summary.pedometer_distance, 0.0);
    assert_eq!(summary.path.len(), 30);
    assert!((summary.path_length - summary.total_distance).abs() < 1e-6);
    assert!((summary.final_cadence - 150.0).abs() < 1e-6);
    assert_eq!(summary.average_heart_rate, Some(155.0));
    // Strikes at 5, 21, ..., 597 over 600 samples: 38 peaks -> 76 steps
    assert_eq!(summary.total_steps, 76);
}

#[test]
fn test_pedometer_fallback_when_gps_weak() {
    let fitter = StrideModelFitter::new();
    let model = fitter.fit(&calibration_records()).expect("calibration should fit");

    let session = manual_session();
    session.set_stride_model(model.clone());
    session.start();
    run(&session, 0, 30, 80.0);

    let summary = session.stop();
    assert_eq!(summary.gps_distance, 0.0);
    assert!(summary.pedometer_distance > 0.0);
    assert_eq!(summary.path.len(), 30);

    // Credited for the time the samples cover, 0.00 .. 29.95 s, at 150 SPM
    let expected = model.predict(150.0) * 150.0 / 60.0 * 29.95;
    assert!(
        (summary.pedometer_distance - expected).abs() < 1e-6,
        "credited {:.2}m, expected {:.2}m",
        summary.pedometer_distance,
        expected
    );
}

#[test]
fn test_extra_ticks_do_not_add_distance() {
    let model = StrideModelFitter::new()
        .fit(&calibration_records())
        .expect("calibration should fit");

    let session = manual_session();
    session.set_stride_model(model);
    session.start();
    run(&session, 0, 9, 80.0);
    let before = session.total_distance();
    for _ in 0..10 {
        session.tick();
    }
    assert_eq!(session.total_distance(), before);
    session.stop();
}

#[test]
fn test_restart_without_stop_starts_clean() {
    let model = StrideModelFitter::new()
        .fit(&calibration_records())
        .expect("calibration should fit");

    let session = manual_session();
    session.set_stride_model(model);
    session.start();
    run(&session, 0, 9, 80.0);
    assert!(session.total_distance() > 0.0);

    session.start();
    assert!(session.tick().is_some());
    assert_eq!(session.total_distance(), 0.0);
    assert_eq!(session.current_steps(), 0);

    run(&session, 0, 3, 80.0);
    assert!(session.total_distance() > 0.0);
    session.stop();
}

#[test]
fn test_outage_is_not_double_counted() {
    let model = StrideModelFitter::new()
        .fit(&calibration_records())
        .expect("calibration should fit");

    let session = manual_session();
    session.set_stride_model(model);
    session.start();

    run(&session, 0, 12, 5.0);
    let before_outage = session.total_distance();
    run(&session, 12, 24, 120.0);
    let after_outage = session.total_distance();
    run(&session, 24, 36, 5.0);

    let summary = session.stop();
    assert!(after_outage > before_outage);
    // GPS after recovery is measured from the re-anchored fix at second 24,
    // so the outage span is never paid twice
    let gps_after = summary.total_distance - after_outage;
    assert!((gps_after - 11.0 * 5.56).abs() < 2.0, "gps after outage {}", gps_after);
}

#[test]
fn test_distance_never_decreases_across_session() {
    let session = manual_session();
    session.set_stride_model(
        StrideModelFitter::new()
            .fit(&calibration_records())
            .expect("calibration should fit"),
    );
    session.start();

    let accuracies = [4.0, 12.0, 75.0, -1.0, 35.0, 6.0];
    let mut last = 0.0;
    for block in 0..12 {
        run(&session, block * 3, block * 3 + 3, accuracies[block % accuracies.len()]);
        let now = session.total_distance();
        assert!(now >= last);
        last = now;
    }
    session.stop();
}

#[test]
fn test_restart_clears_session_but_keeps_model() {
    let session = manual_session();
    session.set_stride_model(
        StrideModelFitter::new()
            .fit(&calibration_records())
            .expect("calibration should fit"),
    );
    session.start();
    run(&session, 0, 9, 5.0);
    session.stop();

    session.start();
    assert_eq!(session.total_distance(), 0.0);
    assert_eq!(session.current_steps(), 0);
    assert!(session.path().is_empty());
    assert!(session.stride_model().is_some());

    session.add_location(GpsFix::new(51.6, -0.12, 5.0, 0.0));
    assert_eq!(session.total_distance(), 0.0);
    assert_eq!(session.path().len(), 1);
    session.stop();
}

struct CountingListener(AtomicUsize);

impl CadenceListener for CountingListener {
    fn on_cadence_update(&self, _update: &CadenceUpdate) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_tick_after_stop_is_ignored() {
    let session = manual_session();
    let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
    session.add_listener(listener.clone());
    session.start();
    run(&session, 0, 6, 5.0);

    let estimator = session.cadence_estimator();
    let pending = estimator.tick_token();
    let summary = session.stop();
    let ticks = listener.0.load(Ordering::SeqCst);
    let steps = session.current_steps();

    assert!(estimator.run_tick(pending).is_none());
    assert!(session.tick().is_none());
    assert_eq!(listener.0.load(Ordering::SeqCst), ticks);
    assert_eq!(session.current_steps(), steps);
    assert_eq!(summary.total_steps, steps);
}

#[test]
fn test_concurrent_producer_and_ticker() {
    let session = Arc::new(RunSession::with_config(SessionConfig {
        cadence: CadenceConfig {
            update_interval_seconds: 0.005,
            ..CadenceConfig::default()
        },
        ..SessionConfig::default()
    }));
    session.start();

    let producer = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            for i in 0..(HZ * 20) {
                session.add_sample(sample(i));
            }
        })
    };
    producer.join().expect("producer thread panicked");
    session.tick();

    let summary = session.stop();
    assert!(summary.total_steps > 0);
    assert!((summary.final_cadence - 150.0).abs() < 1e-6);
    // Peaks are counted once no matter how many ticks saw them
    assert!(summary.total_steps <= 2 * (HZ * 20 / STRIKE_EVERY + 1) as u64);
}

#[test]
fn test_summary_serializes() {
    let session = manual_session();
    session.start();
    run(&session, 0, 3, 5.0);
    let json = session.stop().to_json();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value.get("total_distance").is_some());
    assert_eq!(value["path"].as_array().map(|p| p.len()), Some(3));
}
