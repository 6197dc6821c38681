#![allow(dead_code)]

use nopause::config::{
    ApiSettings, Defaults, Environment, API_BASE_ENV, API_KEY_ENV, WS_PROTOCOL_ENV,
};
use nopause_protocol::{ClientFrame, MockServerConfig, MockServerHandle, MockTtsServer};
use std::thread;
use std::time::{Duration, Instant};

pub const API_KEY: &str = "np-test-key-0123456789";

/// 31 characters, one audio frame per character when streamed char by char
pub const CANCEL_TEXT: &str = "This is a test for cancellation";

pub fn start_server(config: MockServerConfig) -> MockServerHandle {
    env_logger::try_init().ok();
    MockTtsServer::new(config)
        .start_background()
        .expect("Failed to start mock server")
}

/// Settings pointing at the mock over plain `ws://`
pub fn settings_for(handle: &MockServerHandle, key: &str) -> ApiSettings {
    let environment = Environment::from_pairs([
        (API_KEY_ENV, key.to_string()),
        (API_BASE_ENV, handle.address()),
        (WS_PROTOCOL_ENV, "ws".to_string()),
    ]);
    ApiSettings::resolve(&Default::default(), &environment, &Defaults::default())
        .expect("Failed to resolve settings")
}

/// (text, is_end) of every text frame, handshakes left out
pub fn text_frames(frames: &[ClientFrame]) -> Vec<(String, bool)> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ClientFrame::Text(text) => Some((text.content.text.clone(), text.content.is_end)),
            ClientFrame::Handshake(_) => None,
        })
        .collect()
}

pub fn handshakes(frames: &[ClientFrame]) -> usize {
    frames
        .iter()
        .filter(|frame| matches!(frame, ClientFrame::Handshake(_)))
        .count()
}

pub fn eos_count(frames: &[ClientFrame]) -> usize {
    text_frames(frames).iter().filter(|(_, is_end)| *is_end).count()
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
