//! Pieces shared by the async and blocking synthesizers: the usage guard, the
//! session state cell, request bookkeeping and the interpretation of server frames.

pub mod guard;
pub(crate) mod shared;
pub mod state;

pub use guard::{Lease, UsageGuard};
pub(crate) use shared::{
    eos_failed, fragment_failed, Ending, Outgoing, SessionCore, Ticket, SENDER_GRACE,
};
pub use state::{SessionState, StateCell};

use crate::audio::AudioChunk;
use crate::error::{Result, SynthesisError};
use nopause_protocol::protocol;

/// Result of one pull on an audio receiver
#[derive(Debug, Clone, PartialEq)]
pub enum Pull {
    Chunk(AudioChunk),
    EndOfStream,
}

impl Pull {
    pub fn into_chunk(self) -> Option<AudioChunk> {
        match self {
            Pull::Chunk(chunk) => Some(chunk),
            Pull::EndOfStream => None,
        }
    }
}

/// What a single server frame means for the receive loop
#[derive(Debug, PartialEq)]
pub(crate) enum FrameOutcome {
    Chunk(AudioChunk),
    /// Terminal frame, possibly carrying the last chunk
    Final(Option<AudioChunk>),
    /// Neither data nor end of stream
    Skip,
}

/// Decode and classify one server text frame
pub(crate) fn classify(text: &str, sample_rate: u32, channels: u16) -> Result<FrameOutcome> {
    let frame = protocol::decode_server(text)?;
    if !frame.is_success() {
        return Err(SynthesisError::Api {
            code: frame.code,
            status: frame.status,
        });
    }

    let meta = frame.meta();
    let chunk = frame.audio()?.map(|data| AudioChunk {
        data,
        chunk_id: meta.chunk_id,
        sample_rate,
        channels,
        rtf: meta.rtf,
        chunk_size_us: meta.chunk_size_us,
        is_last_chunk: frame.is_end,
    });

    Ok(match (chunk, frame.is_end) {
        (chunk, true) => FrameOutcome::Final(chunk),
        (Some(chunk), false) => FrameOutcome::Chunk(chunk),
        (None, false) => FrameOutcome::Skip,
    })
}

/// Short id used to tag the log lines of one request
pub(crate) fn request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nopause_protocol::protocol::{ChunkMeta, ServerFrame};

    fn wire(frame: &ServerFrame) -> String {
        protocol::encode(frame).unwrap()
    }

    #[test]
    fn test_data_frame_becomes_chunk() {
        let meta = ChunkMeta {
            chunk_id: 4,
            rtf: 0.3,
            chunk_size_us: 125,
        };
        let outcome = classify(&wire(&ServerFrame::audio_chunk(&[1, 0, 2, 0], meta, false)), 16000, 1)
            .unwrap();

        match outcome {
            FrameOutcome::Chunk(chunk) => {
                assert_eq!(chunk.data, vec![1, 0, 2, 0]);
                assert_eq!(chunk.chunk_id, 4);
                assert_eq!(chunk.sample_rate, 16000);
                assert_eq!(chunk.chunk_size_us, 125);
                assert!(!chunk.is_last_chunk);
            }
            other => panic!("expected a chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_non_final_frame_is_skipped() {
        assert_eq!(
            classify(&wire(&ServerFrame::empty(false)), 24000, 1).unwrap(),
            FrameOutcome::Skip
        );
    }

    #[test]
    fn test_final_frame_with_and_without_audio() {
        assert_eq!(
            classify(&wire(&ServerFrame::empty(true)), 24000, 1).unwrap(),
            FrameOutcome::Final(None)
        );

        let last = ServerFrame::audio_chunk(&[9, 9], ChunkMeta::default(), true);
        match classify(&wire(&last), 24000, 1).unwrap() {
            FrameOutcome::Final(Some(chunk)) => assert!(chunk.is_last_chunk),
            other => panic!("expected a final chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_error_code_wins_over_payload() {
        let mut frame = ServerFrame::audio_chunk(&[1, 2], ChunkMeta::default(), false);
        frame.code = 50001;
        frame.status = "overloaded".to_string();

        match classify(&wire(&frame), 24000, 1) {
            Err(SynthesisError::Api { code, status }) => {
                assert_eq!(code, 50001);
                assert_eq!(status, "overloaded");
            }
            other => panic!("expected an API error, got {:?}", other),
        }
    }

    #[test]
    fn test_undecodable_frame_is_format_error() {
        assert!(matches!(
            classify("{\"code\": \"zero\"}", 24000, 1),
            Err(SynthesisError::Format(_))
        ));
    }

    #[test]
    fn test_request_id_is_short() {
        assert_eq!(request_id().len(), 8);
    }
}
