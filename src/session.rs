use crate::capture::RecordedAudio;
use crate::error::{ClientError, Result};
use crate::live::{
    ChannelEvent, ChannelEventKind, ChannelHandle, CloseReason, Connector, Generation, LiveEvent,
};
use crate::model::{Conversation, LanguagePair, Message, Role, TextDraft};
use crate::timeline::{Timeline, TimelineChange};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryState {
    Idle,
    Loading,
    Loaded,
    Failed(ClientError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    Closed(CloseReason),
}

/// A history fetch the caller must perform and report back through
/// [`ConversationSession::on_history_loaded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub generation: Generation,
    pub conversation_id: String,
}

/// A voice message upload the caller must perform and report back through
/// [`ConversationSession::on_upload_result`].
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub generation: Generation,
    pub conversation_id: String,
    pub role: Role,
    pub source_language: String,
    pub recording: RecordedAudio,
}

#[derive(Debug, Clone)]
pub enum Draft {
    Text(String),
    Audio(RecordedAudio),
}

#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Handed to the live channel; the message shows up once the server
    /// broadcasts it back.
    Transmitted,
    NotConnected,
    Empty,
    Upload(UploadRequest),
}

/// What processing one input did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Timeline(TimelineChange),
    HistoryLoaded { count: usize },
    Participants(u32),
    Link(LinkState),
    Notice(String),
    Failed(ClientError),
    /// Stale generation or nothing to do.
    Ignored,
}

/// Owns the active conversation: its live channel, its timeline, and the
/// generation counter that fences off results from earlier activations.
pub struct ConversationSession<C: Connector> {
    connector: C,
    role: Role,
    languages: LanguagePair,
    conversation: Option<Conversation>,
    generation: Generation,
    channel: Option<C::Handle>,
    link: LinkState,
    history: HistoryState,
    timeline: Timeline,
    participants: u32,
}

impl<C: Connector> ConversationSession<C> {
    pub fn new(connector: C, role: Role, languages: LanguagePair) -> Self {
        Self {
            connector,
            role,
            languages,
            conversation: None,
            generation: Generation::default(),
            channel: None,
            link: LinkState::Disconnected,
            history: HistoryState::Idle,
            timeline: Timeline::new(),
            participants: 0,
        }
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn languages(&self) -> &LanguagePair {
        &self.languages
    }

    pub fn set_languages(&mut self, languages: LanguagePair) {
        self.languages = languages;
    }

    pub fn participants(&self) -> u32 {
        self.participants
    }

    pub fn link(&self) -> &LinkState {
        &self.link
    }

    pub fn history(&self) -> &HistoryState {
        &self.history
    }

    /// Switch to `conversation`: close the old channel, clear the timeline,
    /// open a fresh channel and ask the caller to fetch history.
    pub fn activate(&mut self, conversation: Conversation) -> HistoryRequest {
        if let Some(old) = self.channel.take() {
            old.close();
        }
        self.generation = self.generation.next();
        self.timeline.clear();
        self.participants = 0;
        self.languages = conversation.languages();
        self.history = HistoryState::Loading;
        self.link = LinkState::Connecting;

        let conversation_id = conversation.id.clone();
        log::info!(
            "[session] {} activating conversation {}",
            self.generation,
            conversation_id
        );
        self.channel = Some(self.connector.open(&conversation_id, self.generation));
        self.conversation = Some(conversation);

        HistoryRequest {
            generation: self.generation,
            conversation_id,
        }
    }

    /// Re-issue the history fetch for the current activation without
    /// touching the live channel.
    pub fn retry_history(&mut self) -> Result<HistoryRequest> {
        let conversation = self.conversation.as_ref().ok_or(ClientError::NoConversation)?;
        self.history = HistoryState::Loading;
        Ok(HistoryRequest {
            generation: self.generation,
            conversation_id: conversation.id.clone(),
        })
    }

    pub fn on_history_loaded(
        &mut self,
        generation: Generation,
        result: Result<Vec<Message>>,
    ) -> SessionUpdate {
        if generation != self.generation {
            log::debug!(
                "[session] discarding history for {} (current {})",
                generation,
                self.generation
            );
            return SessionUpdate::Ignored;
        }
        match result {
            Ok(messages) => {
                self.timeline.merge_history(messages);
                self.history = HistoryState::Loaded;
                SessionUpdate::HistoryLoaded {
                    count: self.timeline.len(),
                }
            }
            Err(e) => {
                log::warn!("[session] history fetch failed: {}", e);
                self.history = HistoryState::Failed(e.clone());
                SessionUpdate::Failed(e)
            }
        }
    }

    pub fn on_channel_event(&mut self, event: ChannelEvent) -> SessionUpdate {
        if event.generation != self.generation {
            log::debug!("[session] discarding event from {}", event.generation);
            return SessionUpdate::Ignored;
        }
        match event.kind {
            ChannelEventKind::Opened => {
                self.link = LinkState::Open;
                SessionUpdate::Link(self.link.clone())
            }
            ChannelEventKind::Closed(reason) => {
                self.link = LinkState::Closed(reason);
                SessionUpdate::Link(self.link.clone())
            }
            ChannelEventKind::Live(live) => self.on_live_event(event.generation, live),
        }
    }

    pub fn on_live_event(&mut self, generation: Generation, event: LiveEvent) -> SessionUpdate {
        if generation != self.generation {
            return SessionUpdate::Ignored;
        }
        match event {
            LiveEvent::Message(update) => match self.timeline.apply_update(update, Utc::now()) {
                TimelineChange::Rejected => {
                    log::warn!("[session] dropping message frame without an id");
                    SessionUpdate::Ignored
                }
                TimelineChange::Held(id) => {
                    log::debug!("[session] holding partial frame for unseen {}", id);
                    SessionUpdate::Timeline(TimelineChange::Held(id))
                }
                change => SessionUpdate::Timeline(change),
            },
            LiveEvent::System { participants, .. } => {
                self.participants = participants;
                SessionUpdate::Participants(participants)
            }
            LiveEvent::Error(text) => SessionUpdate::Notice(text),
        }
    }

    /// Text goes straight onto the live channel; audio becomes an upload
    /// request. Neither is inserted locally: the authoritative message comes
    /// back from the server and is merged by id like any other.
    pub fn send(&mut self, draft: Draft) -> Result<SendOutcome> {
        let conversation = self.conversation.as_ref().ok_or(ClientError::NoConversation)?;
        match draft {
            Draft::Text(content) => {
                if content.trim().is_empty() {
                    return Ok(SendOutcome::Empty);
                }
                let draft = TextDraft {
                    role: self.role,
                    content,
                    source_language: self.languages.spoken_by(self.role).to_string(),
                    target_language: self.languages.heard_by(self.role).to_string(),
                };
                let sent = self
                    .channel
                    .as_ref()
                    .map(|ch| ch.send(&draft))
                    .unwrap_or(false);
                Ok(if sent {
                    SendOutcome::Transmitted
                } else {
                    SendOutcome::NotConnected
                })
            }
            Draft::Audio(recording) => Ok(SendOutcome::Upload(UploadRequest {
                generation: self.generation,
                conversation_id: conversation.id.clone(),
                role: self.role,
                source_language: self.languages.spoken_by(self.role).to_string(),
                recording,
            })),
        }
    }

    pub fn on_upload_result(
        &mut self,
        generation: Generation,
        result: Result<Message>,
    ) -> SessionUpdate {
        match result {
            Ok(message) if generation == self.generation => {
                SessionUpdate::Timeline(self.timeline.upsert(message))
            }
            Ok(message) => {
                log::debug!(
                    "[session] upload result {} belongs to {}, dropping",
                    message.id,
                    generation
                );
                SessionUpdate::Ignored
            }
            Err(e) => {
                log::warn!("[session] upload failed: {}", e);
                SessionUpdate::Failed(e)
            }
        }
    }

    /// Close the live channel. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            log::info!("[session] {} teardown", channel.generation());
            channel.close();
        }
        self.link = LinkState::Disconnected;
    }

    /// Forget the active conversation after it was deleted. Advances the
    /// generation so its closing channel and pending requests are ignored.
    pub fn deactivate(&mut self) {
        self.teardown();
        self.generation = self.generation.next();
        self.conversation = None;
        self.timeline.clear();
        self.participants = 0;
        self.history = HistoryState::Idle;
    }
}
