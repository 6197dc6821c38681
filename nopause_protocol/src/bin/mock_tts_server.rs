use clap::Parser;
use log::info;
use nopause_protocol::{MockServerConfig, MockTtsServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mock_tts_server")]
#[command(about = "Mock NoPause dual-stream server that echoes one audio frame per text fragment")]
struct Args {
    /// Address to bind the WebSocket server to
    #[arg(short, long, default_value = "127.0.0.1:8765")]
    address: String,

    /// Only accept this API key (any non-empty key otherwise)
    #[arg(long)]
    api_key: Option<String>,

    /// Delay before each reply frame, in milliseconds
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Follow each audio frame with an empty, non-final frame
    #[arg(long)]
    empty_frames: bool,

    /// Answer every request with this error code
    #[arg(long)]
    fail_code: Option<i64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("🚀 Starting mock TTS server with args: {:?}", args);

    let config = MockServerConfig {
        bind_address: args.address,
        api_key: args.api_key,
        reply_delay: Duration::from_millis(args.delay_ms),
        empty_frames: args.empty_frames,
        audio_on_final: false,
        fail_with: args.fail_code.map(|code| (code, "mock failure".to_string())),
    };

    let handle = MockTtsServer::new(config).start_background()?;
    info!(
        "🎵 Mock TTS server ready: NO_PAUSE_WS_PROTOCOL=ws NO_PAUSE_API_BASE={}",
        handle.address()
    );

    // Handle Ctrl+C gracefully
    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = Arc::clone(&should_stop);
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down...");
        should_stop_clone.store(true, Ordering::Relaxed);
    })?;

    while !should_stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    handle.stop();
    info!("🛑 Mock TTS server stopped");

    Ok(())
}
