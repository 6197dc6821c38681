//! Thread-based synthesizer against the mock dual-stream server

mod common;

use common::*;
use nopause::blocking::Synthesizer;
use nopause::{Pull, SessionConfig, SessionState, SynthesisError};
use nopause_protocol::MockServerConfig;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn paced_chars(text: &'static str) -> impl Iterator<Item = String> + Send + 'static {
    text.chars().map(|c| {
        thread::sleep(Duration::from_millis(10));
        c.to_string()
    })
}

fn synthesizer(handle: &nopause_protocol::MockServerHandle) -> Synthesizer {
    Synthesizer::new(SessionConfig::default(), &settings_for(handle, API_KEY))
        .expect("Failed to build synthesizer")
}

#[test_log::test]
fn test_frames_in_order() {
    let handle = start_server(MockServerConfig::default());
    let synth = synthesizer(&handle);

    let chunks: Vec<_> = synth
        .synthesize(vec!["Hello ", "world"])
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1].samples_i16()[0], 'w' as i16);
    assert_eq!(
        text_frames(&handle.frames_on(1)),
        vec![
            ("Hello ".to_string(), false),
            ("world".to_string(), false),
            (String::new(), true),
        ]
    );
    assert_eq!(synth.state(), SessionState::Idle);
    assert!(!synth.in_use());
}

#[test_log::test]
fn test_empty_frames_never_reach_the_caller() {
    let handle = start_server(MockServerConfig {
        empty_frames: true,
        ..Default::default()
    });
    let synth = synthesizer(&handle);

    let chunks = synth
        .synthesize(vec!["ab", "cd"])
        .unwrap()
        .collect_chunks()
        .unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|chunk| chunk.n_samples() == 2));
}

#[test_log::test]
fn test_api_error_terminates_request() {
    let handle = start_server(MockServerConfig {
        fail_with: Some((50000, "synthesis backend unavailable".to_string())),
        ..Default::default()
    });
    let synth = synthesizer(&handle);

    let mut receiver = synth.synthesize(vec!["a"]).unwrap();
    assert!(matches!(
        receiver.pull(),
        Err(SynthesisError::Api { code: 50000, .. })
    ));
    assert!(receiver.next().is_none());
    assert_eq!(synth.state(), SessionState::Terminated);
    assert!(!synth.in_use());
}

#[test_log::test]
fn test_concurrent_requests_single_writer() {
    let handle = start_server(MockServerConfig::default());
    let synth = synthesizer(&handle);
    let barrier = Arc::new(Barrier::new(6));

    let attempts: Vec<_> = (0..6)
        .map(|_| {
            let synth = synth.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                synth.synthesize(paced_chars(CANCEL_TEXT))
            })
        })
        .collect();
    let results: Vec<_> = attempts
        .into_iter()
        .map(|attempt| attempt.join().expect("thread panicked"))
        .collect();

    let (mut winners, losers): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    assert_eq!(winners.len(), 1);
    assert!(losers
        .iter()
        .all(|result| matches!(result, Err(SynthesisError::AlreadyInUse))));
    assert!(wait_until(Duration::from_secs(2), || handle.connections() == 1));

    winners.pop().unwrap().unwrap().terminate().unwrap();
    assert!(!synth.in_use());
}

#[test_log::test]
fn test_terminate_mid_stream() {
    let handle = start_server(MockServerConfig::default());
    let synth = synthesizer(&handle);

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).unwrap();
    let first = receiver.pull().unwrap().into_chunk().unwrap();
    assert_eq!(first.samples_i16(), vec!['T' as i16]);

    receiver.terminate().unwrap();
    receiver.terminate().unwrap();

    assert!(!synth.in_use());
    assert!(!synth.is_connected());
    assert_eq!(synth.state(), SessionState::Terminated);
    assert_eq!(receiver.pull().unwrap(), Pull::EndOfStream);

    thread::sleep(Duration::from_millis(100));
    let sent = handle.frames_on(1);
    assert!(text_frames(&sent).len() < CANCEL_TEXT.len());
    assert_eq!(eos_count(&sent), 0);
}

#[test_log::test]
fn test_interrupt_then_reuse() {
    let handle = start_server(MockServerConfig::default());
    let synth = synthesizer(&handle);

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).unwrap();
    receiver.pull().unwrap();
    receiver.interrupt().unwrap();
    assert!(synth.is_connected());
    assert!(wait_until(Duration::from_secs(2), || handle.connections() == 2));

    for text in ["one", "two"] {
        let chunks = synth.synthesize(vec![text]).unwrap().collect_chunks().unwrap();
        assert_eq!(chunks.len(), 1);
    }
    let frames = handle.frames_on(2);
    assert_eq!(handshakes(&frames), 1);
    assert_eq!(eos_count(&frames), 2);
    assert_eq!(handle.connections(), 2);
}

#[test_log::test]
fn test_synthesizer_interrupt_cancels_request() {
    let handle = start_server(MockServerConfig::default());
    let synth = synthesizer(&handle);

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).unwrap();
    receiver.pull().unwrap();

    synth.interrupt().unwrap();
    assert!(!synth.in_use());
    assert!(synth.is_connected());

    // The old request sees its connection gone
    assert!(matches!(
        receiver.pull(),
        Err(SynthesisError::InvalidRequest { .. })
    ));
    assert!(synth.is_connected());
    drop(receiver);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(eos_count(&handle.frames_on(1)), 0);
}

#[test_log::test]
fn test_close_terminates_running_request() {
    let handle = start_server(MockServerConfig::default());
    let synth = synthesizer(&handle);

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).unwrap();
    receiver.pull().unwrap();

    synth.close();
    assert_eq!(synth.state(), SessionState::Terminated);
    assert!(!synth.in_use());
    assert!(!synth.is_connected());

    assert!(receiver.pull().is_err());
    assert_eq!(synth.state(), SessionState::Terminated);
    assert!(format!("{:?}", receiver).contains("finished: true"));
}

#[test_log::test]
fn test_one_shot() {
    let handle = start_server(MockServerConfig::default());
    let settings = settings_for(&handle, API_KEY);

    let chunks = Synthesizer::one_shot(SessionConfig::default(), &settings, vec!["just once"])
        .unwrap()
        .collect_chunks()
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].n_samples(), "just once".len());
}

#[test_log::test]
fn test_dropping_receiver_frees_synthesizer() {
    let handle = start_server(MockServerConfig::default());
    let synth = synthesizer(&handle);

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).unwrap();
    receiver.pull().unwrap();
    drop(receiver);

    assert!(!synth.in_use());
    assert!(!synth.is_connected());
    assert_eq!(synth.state(), SessionState::Terminated);
}

#[test_log::test]
fn test_rejected_key_reports_settings_without_key() {
    let handle = start_server(MockServerConfig {
        api_key: Some(API_KEY.to_string()),
        ..Default::default()
    });
    let wrong_key = "np-wrong-key-9876543210";
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, wrong_key)).unwrap();

    let err = synth.synthesize(vec!["hello"]).unwrap_err();
    let message = err.to_string();

    assert!(matches!(err, SynthesisError::InvalidRequest { .. }));
    assert!(message.contains("API_URL: ws://"));
    assert!(!message.contains(wrong_key));
    assert!(!synth.in_use());
    assert_eq!(synth.state(), SessionState::Idle);
}
