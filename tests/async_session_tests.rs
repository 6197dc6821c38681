//! Async synthesizer against the mock dual-stream server

mod common;

use common::*;
use futures_util::StreamExt;
use nopause::config::{API_KEY_ENV, API_BASE_ENV};
use nopause::{
    AudioChunk, Pull, SessionConfig, SessionState, SynthesisError, Synthesizer,
};
use nopause_protocol::{ClientFrame, MockServerConfig};
use serial_test::serial;
use std::time::Duration;

fn paced_chars(text: &'static str) -> impl futures_util::Stream<Item = String> + Send + 'static {
    async_stream::stream! {
        for c in text.chars() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            yield c.to_string();
        }
    }
}

async fn drain(receiver: &mut nopause::AudioReceiver) -> Vec<AudioChunk> {
    let mut chunks = Vec::new();
    while let Pull::Chunk(chunk) = receiver.pull().await.expect("pull failed") {
        chunks.push(chunk);
    }
    chunks
}

#[test_log::test(tokio::test)]
async fn test_frames_in_order_on_current_thread_runtime() {
    let handle = start_server(MockServerConfig::default());
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let mut receiver = synth
        .synthesize_iter(vec!["Hello ", "from ", "NoPause"])
        .await
        .unwrap();
    let chunks = drain(&mut receiver).await;

    let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.data.len()).collect();
    assert_eq!(sizes, vec![12, 10, 14]);
    assert!(chunks.iter().all(|chunk| chunk.sample_rate == 24000 && chunk.channels == 1));
    assert_eq!(chunks[0].samples_i16()[0], 'H' as i16);

    let frames = handle.frames_on(1);
    assert!(matches!(frames[0], ClientFrame::Handshake(_)));
    assert_eq!(
        text_frames(&frames),
        vec![
            ("Hello ".to_string(), false),
            ("from ".to_string(), false),
            ("NoPause".to_string(), false),
            (String::new(), true),
        ]
    );
    assert_eq!(synth.state(), SessionState::Idle);
    assert!(!synth.in_use());
    assert!(synth.is_connected());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_empty_frames_never_reach_the_caller() {
    let handle = start_server(MockServerConfig {
        empty_frames: true,
        ..Default::default()
    });
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let chunks = synth
        .synthesize_iter(vec!["ab", "cd", "ef"])
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|chunk| !chunk.data.is_empty()));
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_final_frame_audio_is_delivered_last() {
    let handle = start_server(MockServerConfig {
        audio_on_final: true,
        ..Default::default()
    });
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let mut receiver = synth.synthesize_iter(vec!["hey"]).await.unwrap();
    let chunks = drain(&mut receiver).await;

    assert_eq!(chunks.len(), 2);
    assert!(!chunks[0].is_last_chunk);
    assert!(chunks[1].is_last_chunk);
    assert_eq!(chunks[1].data.len(), 4);
    assert_eq!(receiver.pull().await.unwrap(), Pull::EndOfStream);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_api_error_terminates_request() {
    let handle = start_server(MockServerConfig {
        fail_with: Some((40301, "voice not allowed".to_string())),
        ..Default::default()
    });
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let mut receiver = synth.synthesize_iter(vec!["a", "b"]).await.unwrap();
    match receiver.pull().await {
        Err(SynthesisError::Api { code, status }) => {
            assert_eq!(code, 40301);
            assert_eq!(status, "voice not allowed");
        }
        other => panic!("expected an API error, got {:?}", other),
    }

    assert_eq!(synth.state(), SessionState::Terminated);
    assert!(!synth.in_use());
    assert!(!synth.is_connected());
    assert_eq!(receiver.pull().await.unwrap(), Pull::EndOfStream);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_requests_single_writer() {
    let handle = start_server(MockServerConfig::default());
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let attempts = (0..8).map(|_| {
        let synth = synth.clone();
        tokio::spawn(async move {
            synth
                .synthesize(futures_util::stream::pending::<String>())
                .await
        })
    });
    let results: Vec<_> = futures_util::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let (mut winners, losers): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    assert_eq!(winners.len(), 1);
    assert!(losers
        .iter()
        .all(|result| matches!(result, Err(SynthesisError::AlreadyInUse))));
    assert!(wait_until(Duration::from_secs(2), || handle.connections() == 1));

    let mut receiver = winners.pop().unwrap().unwrap();
    receiver.terminate().await.unwrap();
    assert!(!synth.in_use());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_terminate_mid_stream() {
    let handle = start_server(MockServerConfig::default());
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).await.unwrap();
    let first = receiver.pull().await.unwrap().into_chunk().unwrap();
    assert_eq!(first.samples_i16(), vec!['T' as i16]);

    receiver.terminate().await.unwrap();

    assert!(!synth.in_use());
    assert!(!synth.is_connected());
    assert_eq!(synth.state(), SessionState::Terminated);
    assert_eq!(receiver.pull().await.unwrap(), Pull::EndOfStream);

    // Nothing more goes out once the sender has been cancelled
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = handle.frames_on(1);
    let texts = text_frames(&sent);
    assert!(texts.len() < CANCEL_TEXT.len());
    assert_eq!(eos_count(&sent), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_terminate_twice_is_harmless() {
    let handle = start_server(MockServerConfig::default());
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).await.unwrap();
    receiver.pull().await.unwrap();

    receiver.terminate().await.unwrap();
    receiver.terminate().await.unwrap();
    assert_eq!(synth.state(), SessionState::Terminated);
    assert!(!synth.in_use());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_interrupt_reconnects_for_next_request() {
    let handle = start_server(MockServerConfig::default());
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).await.unwrap();
    receiver.pull().await.unwrap();
    receiver.interrupt().await.unwrap();
    receiver.interrupt().await.unwrap();

    assert!(synth.is_connected());
    assert!(!synth.in_use());
    assert!(wait_until(Duration::from_secs(2), || handle.connections() == 2));

    let chunks = synth
        .synthesize_iter(vec!["ok"])
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(handshakes(&handle.frames_on(2)), 1);
    assert_eq!(eos_count(&handle.frames_on(2)), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_connection_reused_across_requests() {
    let handle = start_server(MockServerConfig::default());
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();
    synth.connect().await.unwrap();
    assert_eq!(synth.state(), SessionState::Active);

    for text in ["first", "second"] {
        let chunks = synth
            .synthesize_iter(vec![text])
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(synth.state(), SessionState::Idle);
    }

    assert_eq!(handle.connections(), 1);
    let frames = handle.frames_on(1);
    assert_eq!(handshakes(&frames), 1);
    assert_eq!(eos_count(&frames), 2);

    synth.close().await;
    assert!(!synth.is_connected());
    assert_eq!(synth.state(), SessionState::Idle);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_one_shot_as_stream() {
    let handle = start_server(MockServerConfig::default());
    let settings = settings_for(&handle, API_KEY);

    let receiver = Synthesizer::one_shot(
        SessionConfig::default(),
        &settings,
        tokio_stream::iter(vec!["one ".to_string(), "shot".to_string()]),
    )
    .await
    .unwrap();

    let chunks: Vec<_> = receiver.into_stream().collect().await;
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(Result::is_ok));
    assert_eq!(handshakes(&handle.frames_on(1)), 1);
    assert_eq!(eos_count(&handle.frames_on(1)), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_dropping_receiver_frees_synthesizer() {
    let handle = start_server(MockServerConfig::default());
    let synth = Synthesizer::new(SessionConfig::default(), &settings_for(&handle, API_KEY)).unwrap();

    let mut receiver = synth.synthesize(paced_chars(CANCEL_TEXT)).await.unwrap();
    receiver.pull().await.unwrap();
    drop(receiver);

    assert!(!synth.in_use());
    assert!(!synth.is_connected());

    let chunks = synth
        .synthesize_iter(vec!["again"])
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(wait_until(Duration::from_secs(2), || handle.connections() == 2));
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_rejected_key_reports_settings_without_key() {
    let handle = start_server(MockServerConfig {
        api_key: Some(API_KEY.to_string()),
        ..Default::default()
    });
    let wrong_key = "np-wrong-key-9876543210";
    let synth =
        Synthesizer::new(SessionConfig::default(), &settings_for(&handle, wrong_key)).unwrap();

    let err = synth.connect().await.unwrap_err();
    let message = err.to_string();

    assert!(matches!(err, SynthesisError::InvalidRequest { source: Some(_), .. }));
    assert!(message.contains(&format!("API_URL: ws://{}/v1/tts/dual-stream", handle.address())));
    assert!(message.contains(&format!("environment: {}", API_BASE_ENV)));
    assert!(!message.contains(wrong_key));
    assert_eq!(synth.state(), SessionState::Idle);
    assert!(wait_until(Duration::from_secs(2), || handle.rejected() == 1));
    assert_eq!(handle.connections(), 0);
}

#[test]
#[serial]
fn test_missing_key_fails_before_connecting() {
    std::env::remove_var(API_KEY_ENV);

    match Synthesizer::from_env(SessionConfig::default()) {
        Err(SynthesisError::Config(e)) => {
            assert!(e.to_string().contains("provided"));
        }
        Err(other) => panic!("expected a configuration error, got {}", other),
        Ok(_) => panic!("synthesizer built without an API key"),
    }
}
