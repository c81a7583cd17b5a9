use crate::audio;
use crate::backend::{share_link, BackendClient};
use crate::capture::{AudioInput, CaptureMachine, CaptureState};
use crate::console::{self, Command, HELP};
use crate::error::ClientError;
use crate::language;
use crate::live::{ChannelEvent, Connector};
use crate::model::{Conversation, LanguagePair, NewConversation, Role};
use crate::playback::{PlaybackCoordinator, Speaker};
use crate::session::{
    ConversationSession, Draft, HistoryRequest, LinkState, SendOutcome, SessionUpdate,
    UploadRequest,
};
use crate::settings::{self, Settings};
use crate::state::AppEvent;
use crate::timeline::TimelineChange;
use chrono::Local;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

const CAPTURE_POLL: Duration = Duration::from_millis(100);

/// Ties the session, capture machine and playback coordinator to user
/// commands and backend results. Output is buffered as lines so the caller
/// decides where it goes.
pub struct App<C: Connector, I: AudioInput, S: Speaker> {
    settings: Settings,
    settings_path: Option<PathBuf>,
    backend: BackendClient,
    session: ConversationSession<C>,
    capture: CaptureMachine<I>,
    playback: PlaybackCoordinator<S>,
    conversations: Vec<Conversation>,
    events: mpsc::UnboundedSender<AppEvent>,
    output: Vec<String>,
    quit: bool,
}

impl<C: Connector, I: AudioInput, S: Speaker> App<C, I, S> {
    pub fn new(
        settings: Settings,
        backend: BackendClient,
        connector: C,
        input: I,
        speaker: S,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let session = ConversationSession::new(connector, settings.role, settings.languages());
        let playback = PlaybackCoordinator::new(speaker, backend.base_url())
            .with_speech_rate(settings.speech_rate)
            .with_autoplay_volume(settings.autoplay_volume);
        Self {
            settings,
            settings_path: None,
            backend,
            session,
            capture: CaptureMachine::new(input),
            playback,
            conversations: Vec::new(),
            events,
            output: Vec::new(),
            quit: false,
        }
    }

    /// Persist preference changes to `path`.
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    pub fn session(&self) -> &ConversationSession<C> {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Recording indicator, shown only while recording.
    pub fn status_line(&self) -> Option<String> {
        self.capture
            .is_recording()
            .then(|| console::recording_indicator(self.capture.elapsed_secs()))
    }

    pub fn timer_active(&self) -> bool {
        self.capture.timer_active()
    }

    fn say(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    fn warn(&mut self, err: &ClientError) {
        let hint = if err.is_retryable() { " (try again)" } else { "" };
        self.say(format!("⚠ {}{}", err, hint));
    }

    fn persist(&mut self) {
        let Some(path) = self.settings_path.clone() else {
            return;
        };
        if let Err(e) = settings::save_to(&path, &self.settings) {
            log::warn!("[settings] {}", e);
        }
    }

    fn spawn_request<F>(&self, request: F)
    where
        F: Future<Output = AppEvent> + Send + 'static,
    {
        let tx = self.events.clone();
        tokio::spawn(async move {
            let _ = tx.send(request.await);
        });
    }

    /// Kick off the initial conversation listing, or open `conversation_id`
    /// directly.
    pub fn start(&mut self, conversation_id: Option<&str>) {
        self.say(format!(
            "MediTranslate: you are the {}, speaking {}. /help lists commands.",
            self.session.role(),
            language::display_name(self.session.languages().spoken_by(self.session.role()))
        ));
        match conversation_id {
            Some(id) => self.fetch_conversation(id.to_string()),
            None => self.list_conversations(),
        }
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Input(line) => self.handle_input(&line),
            AppEvent::InputClosed => self.quit = true,
            AppEvent::Conversations(Ok(list)) => {
                self.conversations = list;
                let active = self.session.conversation().map(|c| c.id.clone());
                let lines = console::render_conversations(&self.conversations, active.as_deref());
                self.output.extend(lines);
            }
            AppEvent::ConversationCreated(Ok(conversation)) => {
                self.conversations.insert(0, conversation.clone());
                self.activate(conversation);
            }
            AppEvent::ConversationFetched(Ok(conversation)) => self.activate(conversation),
            AppEvent::ConversationDeleted { id, result: Ok(()) } => {
                self.conversations.retain(|c| c.id != id);
                if self.active_id().as_deref() == Some(id.as_str()) {
                    if *self.capture.state() != CaptureState::Idle {
                        self.capture.cancel();
                        self.say("recording discarded");
                    }
                    self.playback.reset();
                    self.session.deactivate();
                }
                self.say(format!("consultation {} deleted", id));
            }
            AppEvent::History { generation, result } => {
                match self.session.on_history_loaded(generation, result) {
                    SessionUpdate::HistoryLoaded { count } => self.show_history(count),
                    SessionUpdate::Failed(e) => {
                        self.warn(&e);
                        self.say("history unavailable, /retry to reload");
                    }
                    _ => {}
                }
            }
            AppEvent::UploadFinished { generation, result } => {
                match self.session.on_upload_result(generation, result) {
                    SessionUpdate::Timeline(change) => self.show_change(change),
                    SessionUpdate::Failed(e) => {
                        self.warn(&e);
                        self.say("voice message not sent, /rec to record again");
                    }
                    _ => {}
                }
            }
            AppEvent::SearchFinished(Ok(resp)) => {
                let lines = console::render_search(&resp);
                self.output.extend(lines);
            }
            AppEvent::SummaryGenerated(Ok(summary)) => {
                let lines = console::render_summary_text(&summary);
                self.output.extend(lines);
            }
            AppEvent::Summaries(Ok(list)) => {
                if list.is_empty() {
                    self.say("no summaries yet, /summary generates one");
                }
                for summary in &list {
                    let lines = console::render_summary_text(summary);
                    self.output.extend(lines);
                }
            }
            AppEvent::Conversations(Err(e))
            | AppEvent::ConversationCreated(Err(e))
            | AppEvent::ConversationFetched(Err(e))
            | AppEvent::ConversationDeleted { result: Err(e), .. }
            | AppEvent::SearchFinished(Err(e))
            | AppEvent::SummaryGenerated(Err(e))
            | AppEvent::Summaries(Err(e)) => self.warn(&e),
        }
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match self.session.on_channel_event(event) {
            SessionUpdate::Timeline(change) => self.show_change(change),
            SessionUpdate::Participants(n) => self.say(format!("👥 {} connected", n)),
            SessionUpdate::Link(LinkState::Open) => self.say("🟢 live"),
            SessionUpdate::Link(LinkState::Closed(reason)) => {
                self.say(format!("🔴 live updates stopped: {}", reason))
            }
            SessionUpdate::Notice(text) => self.say(format!("⚠ {}", text)),
            SessionUpdate::Failed(e) => self.warn(&e),
            _ => {}
        }
    }

    /// One-second timer.
    pub fn on_tick(&mut self) {
        if let Some(secs) = self.capture.tick() {
            log::trace!("[capture] {}s", secs);
        }
    }

    pub fn poll_capture(&mut self) {
        self.capture.poll();
    }

    pub fn shutdown(&mut self) {
        self.capture.cancel();
        self.playback.reset();
        self.session.teardown();
    }

    fn handle_input(&mut self, line: &str) {
        let command = match console::parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return,
            Err(usage) => {
                self.say(usage);
                return;
            }
        };
        match command {
            Command::Say(text) => self.send_text(text),
            Command::New => self.create_conversation(),
            Command::List => self.list_conversations(),
            Command::Open(target) => self.open(&target),
            Command::Delete(target) => self.delete(&target),
            Command::Role(role) => self.set_role(role),
            Command::Lang { doctor, patient } => self.set_languages(LanguagePair::new(doctor, patient)),
            Command::Record => self.start_recording(),
            Command::Stop => self.stop_recording(),
            Command::Cancel => {
                if *self.capture.state() != CaptureState::Idle {
                    self.capture.cancel();
                    self.say("recording discarded");
                }
            }
            Command::Play(n) => self.play(n, false),
            Command::PlayOriginal(n) => self.play(n, true),
            Command::AutoSpeak(on) => {
                self.settings.auto_speak = on;
                self.persist();
                self.say(if on { "auto-speak on" } else { "auto-speak off" });
            }
            Command::Search(query) => self.search(query),
            Command::Summary => self.generate_summary(),
            Command::Summaries => self.list_summaries(),
            Command::Retry => match self.session.retry_history() {
                Ok(request) => self.fetch_history(request),
                Err(e) => self.warn(&e),
            },
            Command::Share => match self.session.conversation() {
                Some(c) => {
                    let link = share_link(&self.settings.api_base_url, &c.id);
                    self.say(link);
                }
                None => self.warn(&ClientError::NoConversation),
            },
            Command::Languages => {
                let lines = console::render_languages();
                self.output.extend(lines);
            }
            Command::Devices => {
                let devices = audio::list_input_devices();
                if devices.is_empty() {
                    self.say("no input devices found");
                }
                for name in devices {
                    let marker = if name == self.settings.mic_device { "*" } else { " " };
                    self.say(format!("{} {}", marker, name));
                }
            }
            Command::Help => self.say(HELP),
            Command::Quit => self.quit = true,
        }
    }

    fn active_id(&self) -> Option<String> {
        self.session.conversation().map(|c| c.id.clone())
    }

    fn activate(&mut self, conversation: Conversation) {
        if *self.capture.state() != CaptureState::Idle {
            self.capture.cancel();
            self.say("recording discarded");
        }
        self.playback.reset();
        let languages = conversation.languages();
        self.say(format!(
            "▶ {} ({} {} ↔ {} {})",
            conversation.title,
            language::flag(&languages.doctor),
            language::display_name(&languages.doctor),
            language::flag(&languages.patient),
            language::display_name(&languages.patient),
        ));
        let request = self.session.activate(conversation);
        self.settings.set_languages(&languages);
        self.persist();
        self.fetch_history(request);
    }

    fn fetch_history(&self, request: HistoryRequest) {
        let backend = self.backend.clone();
        self.spawn_request(async move {
            let result = backend.fetch_messages(&request.conversation_id).await;
            AppEvent::History {
                generation: request.generation,
                result,
            }
        });
    }

    fn show_history(&mut self, count: usize) {
        self.playback.mark_seen(self.session.timeline().messages());
        if count == 0 {
            self.say("no messages yet");
            return;
        }
        let lines: Vec<String> = self
            .session
            .timeline()
            .messages()
            .iter()
            .enumerate()
            .flat_map(|(i, m)| console::render_message(i + 1, m))
            .collect();
        self.output.extend(lines);
    }

    fn show_change(&mut self, change: TimelineChange) {
        let id = match &change {
            TimelineChange::Inserted(id) | TimelineChange::Replaced(id) => id,
            _ => return,
        };
        let messages = self.session.timeline().messages();
        let Some(index) = messages.iter().position(|m| &m.id == id) else {
            return;
        };
        let message = messages[index].clone();
        let lines = console::render_message(index + 1, &message);
        self.output.extend(lines);

        let viewer = self.session.role();
        if let Err(e) = self
            .playback
            .on_message_shown(&message, viewer, self.settings.auto_speak)
        {
            self.warn(&e);
        }
    }

    fn send_text(&mut self, text: String) {
        match self.session.send(Draft::Text(text)) {
            Ok(SendOutcome::Transmitted) | Ok(SendOutcome::Empty) => {}
            Ok(SendOutcome::NotConnected) => self.say("not connected, message not sent"),
            Ok(SendOutcome::Upload(request)) => self.upload(request),
            Err(e) => self.warn(&e),
        }
    }

    fn create_conversation(&self) {
        let languages = self.session.languages().clone();
        let body = NewConversation {
            title: format!("Consultation - {}", Local::now().format("%Y-%m-%d")),
            doctor_language: languages.doctor,
            patient_language: languages.patient,
        };
        let backend = self.backend.clone();
        self.spawn_request(async move {
            AppEvent::ConversationCreated(backend.create_conversation(&body).await)
        });
    }

    fn list_conversations(&self) {
        let backend = self.backend.clone();
        self.spawn_request(async move { AppEvent::Conversations(backend.list_conversations().await) });
    }

    fn fetch_conversation(&self, id: String) {
        let backend = self.backend.clone();
        self.spawn_request(async move {
            AppEvent::ConversationFetched(backend.get_conversation(&id).await)
        });
    }

    fn open(&mut self, target: &str) {
        if let Ok(n) = target.parse::<usize>() {
            match n.checked_sub(1).and_then(|i| self.conversations.get(i)).cloned() {
                Some(conversation) => self.activate(conversation),
                None => self.say(format!("no consultation {}, /list shows them", n)),
            }
            return;
        }
        self.fetch_conversation(target.to_string());
    }

    /// `/list` index or a raw id.
    fn resolve_conversation(&self, target: &str) -> Option<String> {
        match target.parse::<usize>() {
            Ok(n) => n
                .checked_sub(1)
                .and_then(|i| self.conversations.get(i))
                .map(|c| c.id.clone()),
            Err(_) => Some(target.to_string()),
        }
    }

    fn delete(&mut self, target: &str) {
        let Some(id) = self.resolve_conversation(target) else {
            self.say(format!("no consultation {}, /list shows them", target));
            return;
        };
        let backend = self.backend.clone();
        self.spawn_request(async move {
            let result = backend.delete_conversation(&id).await;
            AppEvent::ConversationDeleted { id, result }
        });
    }

    fn set_role(&mut self, role: Role) {
        self.session.set_role(role);
        self.settings.role = role;
        self.persist();
        let spoken = self.session.languages().spoken_by(role).to_string();
        self.say(format!(
            "you are now the {}, speaking {} {}",
            role,
            language::flag(&spoken),
            language::display_name(&spoken)
        ));
    }

    fn set_languages(&mut self, languages: LanguagePair) {
        self.settings.set_languages(&languages);
        self.persist();
        self.say(format!(
            "doctor {} {}, patient {} {}",
            language::flag(&languages.doctor),
            language::display_name(&languages.doctor),
            language::flag(&languages.patient),
            language::display_name(&languages.patient)
        ));
        self.session.set_languages(languages);
    }

    fn start_recording(&mut self) {
        if self.session.conversation().is_none() {
            self.warn(&ClientError::NoConversation);
            return;
        }
        self.capture.acknowledge();
        if let Err(e) = self.capture.start() {
            self.warn(&e);
            return;
        }
        match self.capture.acquire() {
            Ok(()) => self.say("● recording, /stop to send or /cancel to discard"),
            Err(e) => self.warn(&e),
        }
    }

    fn stop_recording(&mut self) {
        let elapsed = self.capture.elapsed_display();
        match self.capture.stop() {
            Ok(recording) => {
                self.say(format!("⏹ {} recorded, translating…", elapsed));
                match self.session.send(Draft::Audio(recording)) {
                    Ok(SendOutcome::Upload(request)) => self.upload(request),
                    Ok(_) => {}
                    Err(e) => self.warn(&e),
                }
            }
            Err(e) => self.warn(&e),
        }
    }

    fn upload(&self, request: UploadRequest) {
        let backend = self.backend.clone();
        self.spawn_request(async move {
            let result = backend
                .upload_audio(
                    &request.conversation_id,
                    &request.recording,
                    request.role,
                    &request.source_language,
                )
                .await;
            AppEvent::UploadFinished {
                generation: request.generation,
                result,
            }
        });
    }

    fn play(&mut self, n: usize, original: bool) {
        let Some(message) = self.session.timeline().messages().get(n - 1).cloned() else {
            self.say(format!("no message {}", n));
            return;
        };
        let played = if original {
            self.playback.play_original(&message)
        } else {
            self.playback.play_manual(&message)
        };
        match played {
            Ok(true) => {}
            Ok(false) => self.say(format!("nothing to play for message {}", n)),
            Err(e) => self.warn(&e),
        }
    }

    fn search(&self, query: String) {
        let scope = self.active_id();
        let backend = self.backend.clone();
        self.spawn_request(async move {
            AppEvent::SearchFinished(backend.search(&query, scope.as_deref()).await)
        });
    }

    fn generate_summary(&mut self) {
        let Some(id) = self.active_id() else {
            self.warn(&ClientError::NoConversation);
            return;
        };
        self.say("📋 generating summary…");
        let backend = self.backend.clone();
        self.spawn_request(async move { AppEvent::SummaryGenerated(backend.generate_summary(&id).await) });
    }

    fn list_summaries(&mut self) {
        let Some(id) = self.active_id() else {
            self.warn(&ClientError::NoConversation);
            return;
        };
        let backend = self.backend.clone();
        self.spawn_request(async move { AppEvent::Summaries(backend.list_summaries(&id).await) });
    }
}

/// Drive the app until the user quits or input closes. Must run on a
/// current-thread runtime: the microphone stream is not `Send`.
pub async fn run<C, I, S>(
    mut app: App<C, I, S>,
    mut events: mpsc::UnboundedReceiver<AppEvent>,
    mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    conversation_id: Option<String>,
) where
    C: Connector,
    I: AudioInput,
    S: Speaker,
{
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut poll = tokio::time::interval(CAPTURE_POLL);
    let mut timer_was_active = false;

    app.start(conversation_id.as_deref());
    flush(&mut app);

    while !app.should_quit() {
        tokio::select! {
            Some(event) = events.recv() => app.handle_event(event),
            Some(event) = channel_events.recv() => app.handle_channel_event(event),
            _ = tick.tick() => app.on_tick(),
            _ = poll.tick() => app.poll_capture(),
        }
        // Count whole seconds from the moment recording starts.
        let timer_active = app.timer_active();
        if timer_active && !timer_was_active {
            tick.reset();
        }
        timer_was_active = timer_active;
        flush(&mut app);
    }

    app.shutdown();
    flush(&mut app);
}

fn flush<C: Connector, I: AudioInput, S: Speaker>(app: &mut App<C, I, S>) {
    use std::io::Write;

    let lines = app.take_output();
    let status = app.status_line();
    let mut stdout = std::io::stdout().lock();
    if !lines.is_empty() {
        let _ = write!(stdout, "\r\x1b[2K");
        for line in lines {
            let _ = writeln!(stdout, "{}", line);
        }
    }
    if let Some(status) = status {
        let _ = write!(stdout, "\r\x1b[2K{}", status);
    }
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::InputStream;
    use crate::error::Result;
    use crate::live::{ChannelEventKind, ChannelHandle, CloseReason, Generation, LiveEvent};
    use crate::model::{Message, MessageId, MessageType, MessageUpdate, TextDraft};
    use crate::playback::Utterance;
    use chrono::{TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Loopback {
        sent: Rc<RefCell<Vec<TextDraft>>>,
        opened: Rc<RefCell<Vec<Generation>>>,
    }

    struct LoopbackHandle {
        generation: Generation,
        sent: Rc<RefCell<Vec<TextDraft>>>,
    }

    impl Connector for Loopback {
        type Handle = LoopbackHandle;

        fn open(&self, _conversation_id: &str, generation: Generation) -> LoopbackHandle {
            self.opened.borrow_mut().push(generation);
            LoopbackHandle {
                generation,
                sent: self.sent.clone(),
            }
        }
    }

    impl ChannelHandle for LoopbackHandle {
        fn generation(&self) -> Generation {
            self.generation
        }

        fn is_open(&self) -> bool {
            true
        }

        fn send(&self, draft: &TextDraft) -> bool {
            self.sent.borrow_mut().push(draft.clone());
            true
        }

        fn close(&self) {}
    }

    struct Tone;
    struct ToneStream;

    impl AudioInput for Tone {
        type Stream = ToneStream;

        fn open(&mut self) -> Result<ToneStream> {
            Ok(ToneStream)
        }
    }

    impl InputStream for ToneStream {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn take_chunks(&mut self) -> Vec<Vec<i16>> {
            vec![vec![1000; 160]]
        }

        fn finish(self) -> Vec<Vec<i16>> {
            vec![vec![1000; 160]]
        }
    }

    #[derive(Clone, Default)]
    struct Mute {
        played: Rc<RefCell<Vec<MessageId>>>,
        clips: Rc<RefCell<Vec<String>>>,
    }

    impl Speaker for Mute {
        fn can_synthesize(&self) -> bool {
            true
        }

        fn play_clip(&mut self, id: &MessageId, url: &str, _volume: f32) -> Result<()> {
            self.played.borrow_mut().push(id.clone());
            self.clips.borrow_mut().push(url.to_string());
            Ok(())
        }

        fn speak(&mut self, id: &MessageId, _utterance: &Utterance) -> Result<()> {
            self.played.borrow_mut().push(id.clone());
            Ok(())
        }

        fn is_active(&mut self, _id: &MessageId) -> bool {
            false
        }

        fn stop(&mut self, _id: &MessageId) {}

        fn stop_all(&mut self) {}
    }

    struct Harness {
        app: App<Loopback, Tone, Mute>,
        wire: Loopback,
        speaker: Mute,
        events: mpsc::UnboundedReceiver<AppEvent>,
    }

    fn harness() -> Harness {
        let (tx, events) = mpsc::unbounded_channel();
        let wire = Loopback::default();
        let speaker = Mute::default();
        // Nothing listens here; spawned requests fail fast.
        let backend = BackendClient::new("http://127.0.0.1:9").unwrap();
        let app = App::new(
            Settings::default(),
            backend,
            wire.clone(),
            Tone,
            speaker.clone(),
            tx,
        );
        Harness {
            app,
            wire,
            speaker,
            events,
        }
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            title: "Consultation - 2025-03-01".into(),
            doctor_language: "en".into(),
            patient_language: "es".into(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            message_count: None,
        }
    }

    fn message(id: &str, role: Role, minute: u32) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            role,
            message_type: MessageType::Text,
            original_text: "Hello".into(),
            original_language: "en".into(),
            translated_text: Some("Hola".into()),
            target_language: Some("es".into()),
            audio_file_path: None,
            audio_duration: None,
            tts_audio_path: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, minute, 0).unwrap(),
        }
    }

    fn input(h: &mut Harness, line: &str) -> Vec<String> {
        h.app.handle_event(AppEvent::Input(line.into()));
        h.app.take_output()
    }

    #[tokio::test]
    async fn opening_a_conversation_adopts_its_languages() {
        let mut h = harness();
        h.app
            .handle_event(AppEvent::Conversations(Ok(vec![conversation("c1")])));
        h.app.take_output();

        let out = input(&mut h, "/open 1");
        assert!(out[0].starts_with("▶ Consultation"));
        assert_eq!(h.app.session().languages(), &LanguagePair::new("en", "es"));
        assert_eq!(h.app.settings().patient_language, "es");
        assert_eq!(h.wire.opened.borrow().len(), 1);

        // The history request fails against the dead backend and offers retry.
        match h.events.recv().await {
            Some(event @ AppEvent::History { .. }) => h.app.handle_event(event),
            other => panic!("unexpected {:?}", other),
        }
        let out = h.app.take_output();
        assert!(out.iter().any(|l| l.contains("/retry")));
    }

    #[tokio::test]
    async fn text_is_sent_with_role_languages() {
        let mut h = harness();
        h.app
            .handle_event(AppEvent::ConversationFetched(Ok(conversation("c1"))));
        input(&mut h, "/role patient");
        input(&mut h, "Me duele la cabeza");

        let sent = h.wire.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].role, Role::Patient);
        assert_eq!(sent[0].source_language, "es");
        assert_eq!(sent[0].target_language, "en");
        assert!(h.app.session().timeline().is_empty());
    }

    #[tokio::test]
    async fn history_is_shown_but_not_autoplayed() {
        let mut h = harness();
        h.app
            .handle_event(AppEvent::ConversationFetched(Ok(conversation("c1"))));
        let generation = h.app.session().generation();
        h.app.take_output();

        h.app.handle_event(AppEvent::History {
            generation,
            result: Ok(vec![message("m1", Role::Patient, 0)]),
        });
        let out = h.app.take_output();
        assert_eq!(out.len(), 2);
        assert!(h.speaker.played.borrow().is_empty());

        // A live message from the other side is spoken once.
        let live = ChannelEvent {
            generation,
            kind: ChannelEventKind::Live(LiveEvent::Message(MessageUpdate::from(message(
                "m2",
                Role::Patient,
                1,
            )))),
        };
        h.app.handle_channel_event(live.clone());
        h.app.handle_channel_event(live);
        assert_eq!(*h.speaker.played.borrow(), vec![MessageId::from("m2")]);

        input(&mut h, "/play 1");
        assert_eq!(h.speaker.played.borrow().len(), 2);
        assert_eq!(input(&mut h, "/play 9"), vec!["no message 9".to_string()]);
    }

    #[tokio::test]
    async fn original_of_a_voice_message_plays_the_recording() {
        let mut h = harness();
        h.app
            .handle_event(AppEvent::ConversationFetched(Ok(conversation("c1"))));
        let generation = h.app.session().generation();
        let mut voice = message("m1", Role::Patient, 0);
        voice.message_type = MessageType::Audio;
        voice.audio_file_path = Some("rec_m1.wav".into());
        voice.audio_duration = Some("4".into());
        h.app.handle_event(AppEvent::History {
            generation,
            result: Ok(vec![voice]),
        });
        assert!(h.app.take_output().iter().any(|l| l.contains("🎤 (4s) Hello")));

        input(&mut h, "/orig 1");
        assert_eq!(
            *h.speaker.clips.borrow(),
            vec!["http://127.0.0.1:9/api/audio/rec_m1.wav".to_string()]
        );
    }

    #[tokio::test]
    async fn recording_requires_a_conversation_and_uploads_on_stop() {
        let mut h = harness();
        let out = input(&mut h, "/rec");
        assert!(out[0].contains("no active conversation"));

        h.app
            .handle_event(AppEvent::ConversationFetched(Ok(conversation("c1"))));
        input(&mut h, "/rec");
        assert_eq!(h.app.status_line().as_deref(), Some("● REC 00:00"));
        h.app.on_tick();
        h.app.poll_capture();
        assert_eq!(h.app.status_line().as_deref(), Some("● REC 00:01"));

        let out = input(&mut h, "/stop");
        assert!(out[0].starts_with("⏹ 00:01"));
        assert_eq!(h.app.status_line(), None);
        assert!(!h.app.timer_active());

        // History fetch first, then the upload result.
        let mut saw_upload = false;
        while let Some(event) = h.events.recv().await {
            if matches!(event, AppEvent::UploadFinished { .. }) {
                h.app.handle_event(event);
                saw_upload = true;
                break;
            }
        }
        assert!(saw_upload);
        assert!(h
            .app
            .take_output()
            .iter()
            .any(|l| l.contains("voice message not sent")));
    }

    #[tokio::test]
    async fn stale_results_do_not_leak_into_new_conversation() {
        let mut h = harness();
        h.app
            .handle_event(AppEvent::ConversationFetched(Ok(conversation("c1"))));
        let first = h.app.session().generation();
        h.app
            .handle_event(AppEvent::ConversationFetched(Ok(conversation("c2"))));
        h.app.take_output();

        h.app.handle_event(AppEvent::History {
            generation: first,
            result: Ok(vec![message("m1", Role::Patient, 0)]),
        });
        h.app.handle_event(AppEvent::UploadFinished {
            generation: first,
            result: Ok(message("m9", Role::Doctor, 2)),
        });
        assert!(h.app.session().timeline().is_empty());
        assert!(h.app.take_output().is_empty());
    }

    #[tokio::test]
    async fn deleting_the_active_conversation_stops_live_updates() {
        let mut h = harness();
        h.app
            .handle_event(AppEvent::Conversations(Ok(vec![conversation("c1"), conversation("c2")])));
        input(&mut h, "/open 2");
        let generation = h.app.session().generation();
        h.app.handle_event(AppEvent::ConversationDeleted {
            id: "c2".into(),
            result: Ok(()),
        });
        assert_eq!(h.app.session().link(), &LinkState::Disconnected);
        assert!(h.app.session().conversation().is_none());
        assert_eq!(
            h.app.take_output().last().map(String::as_str),
            Some("consultation c2 deleted")
        );

        // The channel's own close notice arrives afterwards and is not reported.
        h.app.handle_channel_event(ChannelEvent {
            generation,
            kind: ChannelEventKind::Closed(CloseReason::Local),
        });
        assert!(h.app.take_output().is_empty());
        assert!(input(&mut h, "/rec")[0].contains("no active conversation"));
        assert_eq!(input(&mut h, "/delete 5"), vec!["no consultation 5, /list shows them".to_string()]);
    }

    #[tokio::test]
    async fn share_and_quit() {
        let mut h = harness();
        h.app
            .handle_event(AppEvent::ConversationFetched(Ok(conversation("c1"))));
        h.app.take_output();
        assert_eq!(
            input(&mut h, "/share"),
            vec!["http://localhost:8000?conv=c1".to_string()]
        );
        input(&mut h, "/quit");
        assert!(h.app.should_quit());
    }
}
