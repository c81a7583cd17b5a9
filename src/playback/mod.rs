pub mod speaker;

use crate::backend::audio_url;
use crate::error::Result;
use crate::language;
use crate::model::{Message, MessageId, Role};
use std::collections::HashMap;

pub const AUTOPLAY_VOLUME: f32 = 0.8;
pub const MANUAL_VOLUME: f32 = 1.0;
pub const SPEECH_RATE: f32 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub locale: String,
    pub rate: f32,
}

/// How a message would sound, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackPlan {
    /// Server-synthesized audio; suppresses local synthesis.
    ServerAudio { url: String },
    /// The speaker's own uploaded recording.
    Recording { url: String },
    Synthesize(Utterance),
    Silent,
}

/// Output device for clips and local speech, keyed by message id.
pub trait Speaker {
    fn can_synthesize(&self) -> bool;
    fn play_clip(&mut self, id: &MessageId, url: &str, volume: f32) -> Result<()>;
    fn speak(&mut self, id: &MessageId, utterance: &Utterance) -> Result<()>;
    fn is_active(&mut self, id: &MessageId) -> bool;
    fn stop(&mut self, id: &MessageId);
    fn stop_all(&mut self);
}

/// Per-message autoplay marker. `fired` is cleared only when an
/// audio-bearing field goes from absent to present.
#[derive(Debug, Clone, Copy, Default)]
struct Ticket {
    fired: bool,
    had_translation: bool,
    had_server_audio: bool,
}

impl Ticket {
    fn upgraded_by(&self, msg: &Message) -> bool {
        (!self.had_translation && msg.translation().is_some())
            || (!self.had_server_audio && msg.server_audio().is_some())
    }

    fn fired_for(&self, msg: &Message) -> bool {
        self.fired && !self.upgraded_by(msg)
    }
}

pub struct PlaybackCoordinator<S: Speaker> {
    speaker: S,
    api_base: String,
    speech_rate: f32,
    autoplay_volume: f32,
    tickets: HashMap<MessageId, Ticket>,
}

impl<S: Speaker> PlaybackCoordinator<S> {
    pub fn new(speaker: S, api_base: &str) -> Self {
        Self {
            speaker,
            api_base: api_base.to_string(),
            speech_rate: SPEECH_RATE,
            autoplay_volume: AUTOPLAY_VOLUME,
            tickets: HashMap::new(),
        }
    }

    pub fn with_speech_rate(mut self, rate: f32) -> Self {
        self.speech_rate = rate;
        self
    }

    pub fn with_autoplay_volume(mut self, volume: f32) -> Self {
        self.autoplay_volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Sound for the translation of `msg`.
    pub fn plan(&self, msg: &Message) -> PlaybackPlan {
        if let Some(file) = msg.server_audio() {
            return PlaybackPlan::ServerAudio {
                url: audio_url(&self.api_base, file),
            };
        }
        match msg.translation() {
            Some(text) if self.speaker.can_synthesize() => PlaybackPlan::Synthesize(Utterance {
                text: text.to_string(),
                locale: language::speech_locale(msg.target_language.as_deref().unwrap_or(""))
                    .to_string(),
                rate: self.speech_rate,
            }),
            _ => PlaybackPlan::Silent,
        }
    }

    /// Sound for what was originally said: the recording of a voice message,
    /// otherwise the original text spoken locally in its own language.
    pub fn plan_original(&self, msg: &Message) -> PlaybackPlan {
        if let Some(file) = msg.recording() {
            return PlaybackPlan::Recording {
                url: audio_url(&self.api_base, file),
            };
        }
        if msg.original_text.trim().is_empty() || !self.speaker.can_synthesize() {
            return PlaybackPlan::Silent;
        }
        PlaybackPlan::Synthesize(Utterance {
            text: msg.original_text.clone(),
            locale: language::speech_locale(&msg.original_language).to_string(),
            rate: self.speech_rate,
        })
    }

    /// Whether the manual play affordance is enabled.
    pub fn can_play(&self, msg: &Message) -> bool {
        self.plan(msg) != PlaybackPlan::Silent
    }

    /// Pure check: would showing `msg` now trigger autoplay?
    pub fn should_autoplay(&self, msg: &Message, viewer: Role, enabled: bool) -> bool {
        if !enabled || msg.role == viewer {
            return false;
        }
        let fired = self
            .tickets
            .get(&msg.id)
            .map(|t| t.fired_for(msg))
            .unwrap_or(false);
        !fired && self.can_play(msg)
    }

    /// Record that `msg` was shown and autoplay it if it qualifies. Every
    /// observation consumes the ticket, so a message seen while autoplay is
    /// off is not replayed when autoplay is switched back on.
    pub fn on_message_shown(&mut self, msg: &Message, viewer: Role, enabled: bool) -> Result<bool> {
        let play = self.should_autoplay(msg, viewer, enabled);
        self.tickets.insert(
            msg.id.clone(),
            Ticket {
                fired: true,
                had_translation: msg.translation().is_some(),
                had_server_audio: msg.server_audio().is_some(),
            },
        );
        if !play {
            return Ok(false);
        }
        log::info!("[playback] autoplay {}", msg.id);
        // One sound at a time: a new arrival cuts off whatever is playing.
        self.speaker.stop_all();
        let plan = self.plan(msg);
        self.start(&msg.id, plan, self.autoplay_volume)?;
        Ok(true)
    }

    /// Mark messages as already seen without playing them (history loads).
    pub fn mark_seen<'a>(&mut self, messages: impl IntoIterator<Item = &'a Message>) {
        for msg in messages {
            self.tickets.insert(
                msg.id.clone(),
                Ticket {
                    fired: true,
                    had_translation: msg.translation().is_some(),
                    had_server_audio: msg.server_audio().is_some(),
                },
            );
        }
    }

    /// User-triggered playback of the translation. Ignores tickets.
    pub fn play_manual(&mut self, msg: &Message) -> Result<bool> {
        let plan = self.plan(msg);
        self.start(&msg.id, plan, MANUAL_VOLUME)
    }

    pub fn play_original(&mut self, msg: &Message) -> Result<bool> {
        let plan = self.plan_original(msg);
        self.start(&msg.id, plan, MANUAL_VOLUME)
    }

    /// A new request for a message already playing stops the old instance.
    fn start(&mut self, id: &MessageId, plan: PlaybackPlan, volume: f32) -> Result<bool> {
        if plan == PlaybackPlan::Silent {
            return Ok(false);
        }
        if self.speaker.is_active(id) {
            log::debug!("[playback] restarting {}", id);
            self.speaker.stop(id);
        }
        match plan {
            PlaybackPlan::ServerAudio { url } | PlaybackPlan::Recording { url } => {
                self.speaker.play_clip(id, &url, volume)?
            }
            PlaybackPlan::Synthesize(utterance) => self.speaker.speak(id, &utterance)?,
            PlaybackPlan::Silent => {}
        }
        Ok(true)
    }

    /// Stop everything and forget tickets (conversation switch).
    pub fn reset(&mut self) {
        self.speaker.stop_all();
        self.tickets.clear();
    }
}
