use crate::audio::encode_wav;
use crate::error::{ClientError, Result};

/// A microphone that can be acquired for one recording.
pub trait AudioInput {
    type Stream: InputStream;

    /// Request access to the device and start capturing. Denial or a missing
    /// device is reported as [`ClientError::Permission`].
    fn open(&mut self) -> Result<Self::Stream>;
}

/// A live capture holding the device. Dropping it releases the device.
pub trait InputStream {
    fn sample_rate(&self) -> u32;
    /// Mono 16-bit chunks captured since the last call.
    fn take_chunks(&mut self) -> Vec<Vec<i16>>;
    /// Stop the source, release the device and hand back whatever was still
    /// buffered.
    fn finish(self) -> Vec<Vec<i16>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState {
    Idle,
    RequestingPermission,
    Recording,
    Stopping,
    Encoding,
    Error(ClientError),
}

/// One finished recording, ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAudio {
    /// WAV-encoded mono PCM.
    pub payload: Vec<u8>,
    pub duration_secs: u32,
    pub sample_rate: u32,
}

impl RecordedAudio {
    pub const FILE_NAME: &'static str = "recording.wav";
    pub const MIME_TYPE: &'static str = "audio/wav";
}

struct RecordingSession<S> {
    stream: S,
    elapsed_secs: u32,
    chunks: Vec<Vec<i16>>,
}

/// `MM:SS` for the recording indicator.
pub fn format_elapsed(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// idle -> requesting-permission -> recording -> stopping -> encoding -> idle,
/// with `error` reachable from permission and encoding. The elapsed-second
/// timer is active only while recording.
pub struct CaptureMachine<I: AudioInput> {
    input: I,
    state: CaptureState,
    session: Option<RecordingSession<I::Stream>>,
    timer_active: bool,
}

impl<I: AudioInput> CaptureMachine<I> {
    pub fn new(input: I) -> Self {
        Self {
            input,
            state: CaptureState::Idle,
            session: None,
            timer_active: false,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    pub fn timer_active(&self) -> bool {
        self.timer_active
    }

    pub fn elapsed_secs(&self) -> u32 {
        self.session.as_ref().map(|s| s.elapsed_secs).unwrap_or(0)
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed_secs())
    }

    fn transition(&mut self, next: CaptureState) {
        log::debug!("[capture] {:?} -> {:?}", self.state, next);
        if next != CaptureState::Recording {
            self.timer_active = false;
        }
        self.state = next;
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != CaptureState::Idle {
            return Err(ClientError::InvalidState(format!(
                "cannot start recording while {:?}",
                self.state
            )));
        }
        self.transition(CaptureState::RequestingPermission);
        Ok(())
    }

    /// Resolve the pending permission request by acquiring the device.
    pub fn acquire(&mut self) -> Result<()> {
        if self.state != CaptureState::RequestingPermission {
            return Err(ClientError::InvalidState(format!(
                "no permission request pending ({:?})",
                self.state
            )));
        }
        match self.input.open() {
            Ok(stream) => {
                log::info!("[capture] recording at {}Hz", stream.sample_rate());
                self.session = Some(RecordingSession {
                    stream,
                    elapsed_secs: 0,
                    chunks: Vec::new(),
                });
                self.transition(CaptureState::Recording);
                self.timer_active = true;
                Ok(())
            }
            Err(e) => {
                log::warn!("[capture] microphone unavailable: {}", e);
                self.transition(CaptureState::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// One-second timer tick. Ignored outside `recording`.
    pub fn tick(&mut self) -> Option<u32> {
        if !self.timer_active || self.state != CaptureState::Recording {
            return None;
        }
        let session = self.session.as_mut()?;
        session.elapsed_secs = session.elapsed_secs.saturating_add(1);
        Some(session.elapsed_secs)
    }

    /// Move captured chunks off the device buffer.
    pub fn poll(&mut self) {
        if self.state != CaptureState::Recording {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            let chunks = session.stream.take_chunks();
            session.chunks.extend(chunks);
        }
    }

    /// Stop recording and encode. The device is released before encoding
    /// starts, whether or not encoding then succeeds.
    pub fn stop(&mut self) -> Result<RecordedAudio> {
        if self.state != CaptureState::Recording {
            return Err(ClientError::InvalidState(format!(
                "not recording ({:?})",
                self.state
            )));
        }
        self.transition(CaptureState::Stopping);
        let Some(session) = self.session.take() else {
            self.transition(CaptureState::Idle);
            return Err(ClientError::InvalidState("recording session missing".into()));
        };
        let RecordingSession {
            stream,
            elapsed_secs,
            mut chunks,
        } = session;
        let sample_rate = stream.sample_rate();
        chunks.extend(stream.finish());
        log::info!("[capture] stopped at {}", format_elapsed(elapsed_secs));

        self.transition(CaptureState::Encoding);
        let samples: Vec<i16> = chunks.into_iter().flatten().collect();
        if samples.is_empty() {
            self.transition(CaptureState::Error(ClientError::EmptyCapture));
            return Err(ClientError::EmptyCapture);
        }
        match encode_wav(&samples, sample_rate) {
            Ok(payload) => {
                self.transition(CaptureState::Idle);
                Ok(RecordedAudio {
                    payload,
                    duration_secs: elapsed_secs,
                    sample_rate,
                })
            }
            Err(e) => {
                self.transition(CaptureState::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Force back to idle from any state, releasing the device now.
    pub fn cancel(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            log::info!("[capture] recording cancelled");
        }
        self.transition(CaptureState::Idle);
    }

    /// Dismiss an error so a new capture can start.
    pub fn acknowledge(&mut self) {
        if matches!(self.state, CaptureState::Error(_)) {
            self.transition(CaptureState::Idle);
        }
    }
}
