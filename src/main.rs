use anyhow::Context;
use clap::Parser;
use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;
use nopause::blocking;
use nopause::config::{ApiSettings, SettingsOverrides};
use nopause::{AudioChunk, Pull, SessionConfig, Synthesizer};
use nopause_protocol::protocol::{
    DualStreamConfig, DEFAULT_LANGUAGE, DEFAULT_MODEL_NAME, DEFAULT_SAMPLE_RATE, DEFAULT_VOICE_ID,
};
use secrecy::SecretString;
use std::fs::File;
use std::io::{BufRead, BufWriter};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

type Wav = WavWriter<BufWriter<File>>;

/// Stream text to NoPause and save the synthesized speech as a WAV file
#[derive(Parser, Debug)]
#[command(name = "nopause-say", version)]
struct Args {
    /// Text to speak; read line by line from stdin when omitted
    text: Option<String>,

    #[arg(short, long, default_value = "nopause.wav")]
    output: PathBuf,

    #[arg(long, default_value = DEFAULT_VOICE_ID)]
    voice: String,

    #[arg(long, default_value = DEFAULT_MODEL_NAME)]
    model: String,

    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    language: String,

    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Overrides NO_PAUSE_API_KEY
    #[arg(long)]
    api_key: Option<String>,

    /// Overrides NO_PAUSE_API_BASE
    #[arg(long)]
    api_base: Option<String>,

    /// Overrides NO_PAUSE_API_VERSION
    #[arg(long)]
    api_version: Option<String>,

    /// Use the thread-based client instead of tokio
    #[arg(long)]
    blocking: bool,

    /// Interrupt the request after this many chunks
    #[arg(long)]
    stop_after: Option<usize>,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            api_key: self.api_key.clone().map(SecretString::from),
            api_base: self.api_base.clone(),
            api_version: self.api_version.clone(),
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            voice_id: self.voice.clone(),
            model_name: self.model.clone(),
            language: self.language.clone(),
            sample_rate: self.sample_rate,
            channels: 1,
            dual_stream: DualStreamConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Summary {
    chunks: usize,
    samples: usize,
    audio_secs: f64,
}

impl Summary {
    fn record(&mut self, wav: &mut Wav, chunk: &AudioChunk) -> anyhow::Result<()> {
        for sample in chunk.samples_i16() {
            wav.write_sample(sample)?;
        }
        self.chunks += 1;
        self.samples += chunk.n_samples();
        self.audio_secs += chunk.duration_secs();
        Ok(())
    }

    fn should_stop(&self, stop_after: Option<usize>) -> bool {
        stop_after.is_some_and(|limit| self.chunks >= limit)
    }
}

/// Word-sized fragments so the text streams the way an LLM would produce it
fn split_fragments(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

fn async_fragments(text: Option<String>) -> ReceiverStream<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        match text {
            Some(text) => {
                for fragment in split_fragments(&text) {
                    if tx.send(fragment).await.is_err() {
                        return;
                    }
                }
            }
            None => {
                let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(format!("{} ", line)).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
    ReceiverStream::new(rx)
}

fn blocking_fragments(text: Option<String>) -> crossbeam_channel::IntoIter<String> {
    let (tx, rx) = crossbeam_channel::bounded(16);
    thread::spawn(move || match text {
        Some(text) => {
            for fragment in split_fragments(&text) {
                if tx.send(fragment).is_err() {
                    return;
                }
            }
        }
        None => {
            for line in std::io::stdin().lock().lines().map_while(Result::ok) {
                if tx.send(format!("{} ", line)).is_err() {
                    return;
                }
            }
        }
    });
    rx.into_iter()
}

async fn run_async(
    config: SessionConfig,
    settings: &ApiSettings,
    text: Option<String>,
    stop_after: Option<usize>,
    wav: &mut Wav,
) -> anyhow::Result<Summary> {
    let synthesizer = Synthesizer::new(config, settings)?;
    synthesizer.connect().await?;

    let mut receiver = synthesizer.synthesize(async_fragments(text)).await?;
    let mut summary = Summary::default();
    while let Pull::Chunk(chunk) = receiver.pull().await? {
        summary.record(wav, &chunk)?;
        if summary.should_stop(stop_after) {
            info!("✋ Interrupting after {} chunks", summary.chunks);
            receiver.interrupt().await?;
            break;
        }
    }

    synthesizer.close().await;
    Ok(summary)
}

fn run_blocking(
    config: SessionConfig,
    settings: &ApiSettings,
    text: Option<String>,
    stop_after: Option<usize>,
    wav: &mut Wav,
) -> anyhow::Result<Summary> {
    let synthesizer = blocking::Synthesizer::new(config, settings)?;
    synthesizer.connect()?;

    let mut receiver = synthesizer.synthesize(blocking_fragments(text))?;
    let mut summary = Summary::default();
    while let Pull::Chunk(chunk) = receiver.pull()? {
        summary.record(wav, &chunk)?;
        if summary.should_stop(stop_after) {
            info!("✋ Interrupting after {} chunks", summary.chunks);
            receiver.interrupt()?;
            break;
        }
    }

    synthesizer.close();
    Ok(summary)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = ApiSettings::from_env_with(&args.overrides())?;
    let config = args.session_config();
    info!("🚀 Synthesizing with voice {} via {}", config.voice_id, settings.endpoint());

    let spec = WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut wav = WavWriter::create(&args.output, spec)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let started = Instant::now();
    let summary = if args.blocking {
        run_blocking(config, &settings, args.text.clone(), args.stop_after, &mut wav)?
    } else {
        tokio::runtime::Runtime::new()?.block_on(run_async(
            config,
            &settings,
            args.text.clone(),
            args.stop_after,
            &mut wav,
        ))?
    };
    wav.finalize()?;

    println!(
        "🔊 Wrote {} chunks ({} samples, {:.2}s of audio) to {} in {:.2}s",
        summary.chunks,
        summary.samples,
        summary.audio_secs,
        args.output.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fragments_keeps_spacing() {
        assert_eq!(
            split_fragments("Hello there world"),
            vec!["Hello ", "there ", "world"]
        );
        assert!(split_fragments("").is_empty());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["nopause-say", "--blocking", "--stop-after", "3", "hi"]);
        assert!(args.blocking);
        assert_eq!(args.stop_after, Some(3));
        assert_eq!(args.text.as_deref(), Some("hi"));
        assert_eq!(args.session_config().voice_id, DEFAULT_VOICE_ID);
    }
}
