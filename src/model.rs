use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
}

impl Role {
    /// The party on the other end of the consultation.
    pub fn other(self) -> Role {
        match self {
            Role::Doctor => Role::Patient,
            Role::Patient => Role::Doctor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doctor" => Ok(Role::Doctor),
            "patient" => Ok(Role::Patient),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Audio,
}

/// Backend-assigned message identity; the only deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

/// The doctor/patient language codes of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    pub doctor: String,
    pub patient: String,
}

impl LanguagePair {
    pub fn new(doctor: impl Into<String>, patient: impl Into<String>) -> Self {
        Self {
            doctor: doctor.into(),
            patient: patient.into(),
        }
    }

    pub fn spoken_by(&self, role: Role) -> &str {
        match role {
            Role::Doctor => &self.doctor,
            Role::Patient => &self.patient,
        }
    }

    pub fn heard_by(&self, role: Role) -> &str {
        self.spoken_by(role.other())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub doctor_language: String,
    pub patient_language: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: Option<u32>,
}

impl Conversation {
    pub fn languages(&self) -> LanguagePair {
        LanguagePair::new(&self.doctor_language, &self.patient_language)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewConversation {
    pub title: String,
    pub doctor_language: String,
    pub patient_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub conversation_id: String,
    pub role: Role,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub original_language: String,
    #[serde(default)]
    pub translated_text: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    /// Filename of the uploaded voice recording.
    #[serde(default)]
    pub audio_file_path: Option<String>,
    #[serde(default)]
    pub audio_duration: Option<String>,
    /// Filename of the server-synthesized speech for the translation.
    #[serde(default)]
    pub tts_audio_path: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn translation(&self) -> Option<&str> {
        self.translated_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn server_audio(&self) -> Option<&str> {
        self.tts_audio_path.as_deref().filter(|p| !p.is_empty())
    }

    /// Filename of the speaker's own recording, for voice messages.
    pub fn recording(&self) -> Option<&str> {
        if self.message_type != MessageType::Audio {
            return None;
        }
        self.audio_file_path.as_deref().filter(|p| !p.is_empty())
    }

    /// Overlay the fields present in `update`. Returns true if anything changed.
    pub fn apply(&mut self, update: &MessageUpdate) -> bool {
        let before = self.clone();
        if let Some(conversation_id) = &update.conversation_id {
            self.conversation_id = conversation_id.clone();
        }
        if let Some(role) = update.role {
            self.role = role;
        }
        if let Some(kind) = update.message_type {
            self.message_type = kind;
        }
        if let Some(text) = &update.original_text {
            self.original_text = text.clone();
        }
        if let Some(lang) = &update.original_language {
            self.original_language = lang.clone();
        }
        if update.translated_text.is_some() {
            self.translated_text = update.translated_text.clone();
        }
        if update.target_language.is_some() {
            self.target_language = update.target_language.clone();
        }
        if update.audio_file_path.is_some() {
            self.audio_file_path = update.audio_file_path.clone();
        }
        if update.audio_duration.is_some() {
            self.audio_duration = update.audio_duration.clone();
        }
        if update.tts_audio_path.is_some() {
            self.tts_audio_path = update.tts_audio_path.clone();
        }
        if let Some(created_at) = update.created_at {
            self.created_at = created_at;
        }
        *self != before
    }
}

/// A message as delivered on the live channel. Only `id` is guaranteed;
/// a frame for an already-known id may carry just the fields that changed
/// (for example a translation that completed late).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageUpdate {
    pub id: Option<MessageId>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub original_text: Option<String>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub translated_text: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub audio_file_path: Option<String>,
    #[serde(default)]
    pub audio_duration: Option<String>,
    #[serde(default)]
    pub tts_audio_path: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageUpdate {
    /// Fold a later frame for the same id into this one. Fields the later
    /// frame does not carry keep their earlier value.
    pub fn absorb(&mut self, later: &MessageUpdate) {
        fn take<T: Clone>(slot: &mut Option<T>, later: &Option<T>) {
            if later.is_some() {
                *slot = later.clone();
            }
        }
        take(&mut self.id, &later.id);
        take(&mut self.conversation_id, &later.conversation_id);
        take(&mut self.role, &later.role);
        take(&mut self.message_type, &later.message_type);
        take(&mut self.original_text, &later.original_text);
        take(&mut self.original_language, &later.original_language);
        take(&mut self.translated_text, &later.translated_text);
        take(&mut self.target_language, &later.target_language);
        take(&mut self.audio_file_path, &later.audio_file_path);
        take(&mut self.audio_duration, &later.audio_duration);
        take(&mut self.tts_audio_path, &later.tts_audio_path);
        take(&mut self.created_at, &later.created_at);
    }

    /// Build a full message for an id the timeline has not seen. A missing
    /// creation time falls back to `received_at`; a missing role cannot be
    /// recovered.
    pub fn into_message(self, received_at: DateTime<Utc>) -> Option<Message> {
        let id = self.id?;
        let role = self.role?;
        Some(Message {
            id,
            conversation_id: self.conversation_id.unwrap_or_default(),
            role,
            message_type: self.message_type.unwrap_or_default(),
            original_text: self.original_text.unwrap_or_default(),
            original_language: self.original_language.unwrap_or_default(),
            translated_text: self.translated_text,
            target_language: self.target_language,
            audio_file_path: self.audio_file_path,
            audio_duration: self.audio_duration,
            tts_audio_path: self.tts_audio_path,
            created_at: self.created_at.unwrap_or(received_at),
        })
    }
}

impl From<Message> for MessageUpdate {
    fn from(m: Message) -> Self {
        Self {
            id: Some(m.id),
            conversation_id: Some(m.conversation_id),
            role: Some(m.role),
            message_type: Some(m.message_type),
            original_text: Some(m.original_text),
            original_language: Some(m.original_language),
            translated_text: m.translated_text,
            target_language: m.target_language,
            audio_file_path: m.audio_file_path,
            audio_duration: m.audio_duration,
            tts_audio_path: m.tts_audio_path,
            created_at: Some(m.created_at),
        }
    }
}

/// Outbound text draft, sent as `{"type":"text", ...}` on the live channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextDraft {
    pub role: Role,
    pub content: String,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Text(TextDraft),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub conversation_id: String,
    pub summary_text: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub conversation_title: String,
    pub role: Role,
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub translated_text: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub match_context: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub query: String,
    pub total_results: usize,
    pub results: Vec<SearchResult>,
}

/// Backend timestamps arrive either as RFC 3339 or as naive ISO-8601
/// (no offset), which is read as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw))),
            None => Ok(None),
        }
    }
}
