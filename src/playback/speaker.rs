use super::{Speaker, Utterance};
use crate::error::{ClientError, Result};
use crate::model::MessageId;
use std::collections::HashMap;
use std::io::Cursor;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const CLIP_FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const STOP_POLL: Duration = Duration::from_millis(50);
/// espeak-style words per minute at rate 1.0.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

enum Active {
    Clip {
        stop: Arc<AtomicBool>,
        worker: JoinHandle<()>,
    },
    Speech(Child),
}

impl Active {
    fn finished(&mut self) -> bool {
        match self {
            Active::Clip { worker, .. } => worker.is_finished(),
            Active::Speech(child) => !matches!(child.try_wait(), Ok(None)),
        }
    }

    fn halt(self) {
        match self {
            Active::Clip { stop, .. } => stop.store(true, Ordering::SeqCst),
            Active::Speech(mut child) => {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Plays server clips through the default output device and speaks text
/// with an external synthesizer process.
pub struct DeviceSpeaker {
    speech_command: Option<String>,
    active: HashMap<MessageId, Active>,
}

impl DeviceSpeaker {
    pub fn new(speech_command: &str) -> Self {
        let command = speech_command.trim();
        Self {
            speech_command: (!command.is_empty()).then(|| command.to_string()),
            active: HashMap::new(),
        }
    }

    fn reap(&mut self) {
        self.active.retain(|_, a| !a.finished());
    }
}

impl Speaker for DeviceSpeaker {
    fn can_synthesize(&self) -> bool {
        self.speech_command.is_some()
    }

    fn play_clip(&mut self, id: &MessageId, url: &str, volume: f32) -> Result<()> {
        self.reap();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let url = url.to_string();
        let label = id.clone();
        let worker = std::thread::spawn(move || {
            if let Err(e) = play_clip_blocking(&url, volume, &stop_flag) {
                log::warn!("[playback] clip for {} failed: {}", label, e);
            }
        });
        self.active
            .insert(id.clone(), Active::Clip { stop, worker });
        Ok(())
    }

    fn speak(&mut self, id: &MessageId, utterance: &Utterance) -> Result<()> {
        self.reap();
        let Some(command) = self.speech_command.clone() else {
            return Err(ClientError::Playback("speech synthesis unavailable".into()));
        };
        let child = match synth_command(&command, utterance).spawn() {
            Ok(child) => child,
            Err(e) => {
                // Missing binary: stop offering synthesis for the rest of the run.
                log::warn!("[playback] '{}' failed to start: {}", command, e);
                self.speech_command = None;
                return Err(ClientError::Playback(format!(
                    "failed to start '{}': {}",
                    command, e
                )));
            }
        };
        log::debug!("[playback] speaking {} ({})", id, utterance.locale);
        self.active.insert(id.clone(), Active::Speech(child));
        Ok(())
    }

    fn is_active(&mut self, id: &MessageId) -> bool {
        self.reap();
        self.active.contains_key(id)
    }

    fn stop(&mut self, id: &MessageId) {
        if let Some(active) = self.active.remove(id) {
            active.halt();
        }
    }

    fn stop_all(&mut self) {
        for (_, active) in self.active.drain() {
            active.halt();
        }
    }
}

impl Drop for DeviceSpeaker {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn synth_command(program: &str, utterance: &Utterance) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg("-v")
        .arg(voice_for(&utterance.locale))
        .arg("-s")
        .arg(words_per_minute(utterance.rate).to_string())
        .arg(&utterance.text)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

fn voice_for(locale: &str) -> String {
    locale.trim().to_ascii_lowercase()
}

fn words_per_minute(rate: f32) -> u32 {
    (BASE_WORDS_PER_MINUTE * rate.clamp(0.1, 4.0)).round() as u32
}

fn play_clip_blocking(url: &str, volume: f32, stop: &AtomicBool) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(CLIP_FETCH_TIMEOUT)
        .build()?;
    let bytes = client.get(url).send()?.error_for_status()?.bytes()?;
    if stop.load(Ordering::SeqCst) {
        return Ok(());
    }

    let (_stream, handle) = rodio::OutputStream::try_default()
        .map_err(|e| ClientError::Playback(format!("no output device: {}", e)))?;
    let sink = rodio::Sink::try_new(&handle)
        .map_err(|e| ClientError::Playback(format!("failed to open sink: {}", e)))?;
    let source = rodio::Decoder::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| ClientError::Playback(format!("undecodable clip: {}", e)))?;
    sink.set_volume(volume);
    sink.append(source);

    while !sink.empty() {
        if stop.load(Ordering::SeqCst) {
            sink.stop();
            break;
        }
        std::thread::sleep(STOP_POLL);
    }
    Ok(())
}
