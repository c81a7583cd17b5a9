use crate::capture::format_elapsed;
use crate::language::{self, LANGUAGES};
use crate::model::{Conversation, Message, MessageType, Role, SearchResponse, Summary};
use crate::search::highlight_segments;
use crate::summary::{render_summary, SummaryBlock};
use chrono::{DateTime, Local, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Say(String),
    New,
    List,
    Open(String),
    Delete(String),
    Role(Role),
    Lang { doctor: String, patient: String },
    Record,
    Stop,
    Cancel,
    Play(usize),
    PlayOriginal(usize),
    AutoSpeak(bool),
    Search(String),
    Summary,
    Summaries,
    Retry,
    Share,
    Languages,
    Devices,
    Help,
    Quit,
}

pub const HELP: &str = "\
/new                      start a new consultation
/list                     list consultations
/open <n|id>              open a consultation from /list or by id
/delete <n|id>            delete a consultation on the server
/role doctor|patient      switch who is speaking on this device
/lang <doctor> <patient>  set language codes (see /langs)
/rec  /stop  /cancel      record, send or discard a voice message
/play <n>  /orig <n>      play message n translated, or its original
                          (the recording itself for voice messages)
/autospeak on|off         speak incoming translations automatically
/search <words>           search messages
/summary  /summaries      generate or list medical summaries
/retry                    reload history after a failure
/share                    print a link to this consultation
/langs  /devices          list languages or microphones
/help  /quit
anything else             send as a text message";

/// Parse one input line. Blank lines yield `Ok(None)`; usage errors come
/// back as a message for the user.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or("").to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();

    let cmd = match (name.as_str(), args.as_slice()) {
        ("new", []) => Command::New,
        ("list", []) => Command::List,
        ("open", [target]) => Command::Open(target.to_string()),
        ("delete", [target]) => Command::Delete(target.to_string()),
        ("role", [role]) => Command::Role(role.parse()?),
        ("lang", [doctor, patient]) => {
            for code in [doctor, patient] {
                if !language::is_supported(code) {
                    return Err(format!("unsupported language '{}', see /langs", code));
                }
            }
            Command::Lang {
                doctor: doctor.to_ascii_lowercase(),
                patient: patient.to_ascii_lowercase(),
            }
        }
        ("rec", []) => Command::Record,
        ("stop", []) => Command::Stop,
        ("cancel", []) => Command::Cancel,
        ("play", [n]) => Command::Play(parse_index(n)?),
        ("orig", [n]) => Command::PlayOriginal(parse_index(n)?),
        ("autospeak", [flag]) => match flag.to_ascii_lowercase().as_str() {
            "on" => Command::AutoSpeak(true),
            "off" => Command::AutoSpeak(false),
            _ => return Err("usage: /autospeak on|off".into()),
        },
        ("search", words) if !words.is_empty() => Command::Search(words.join(" ")),
        ("summary", []) => Command::Summary,
        ("summaries", []) => Command::Summaries,
        ("retry", []) => Command::Retry,
        ("share", []) => Command::Share,
        ("langs", []) => Command::Languages,
        ("devices", []) => Command::Devices,
        ("help", []) => Command::Help,
        ("quit", []) | ("exit", []) => Command::Quit,
        ("new" | "list" | "rec" | "stop" | "cancel" | "summary" | "summaries" | "retry"
        | "share" | "langs" | "devices" | "help" | "quit", _) => {
            return Err(format!("/{} takes no arguments", name))
        }
        ("open" | "delete" | "role" | "lang" | "play" | "orig" | "autospeak" | "search", _) => {
            return Err(format!("bad arguments for /{}, see /help", name))
        }
        _ => return Err(format!("unknown command /{}, see /help", name)),
    };
    Ok(Some(cmd))
}

fn parse_index(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("'{}' is not a message number", raw)),
    }
}

fn clock(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M").to_string()
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Doctor => "🩺 Doctor",
        Role::Patient => "🧑 Patient",
    }
}

/// Two lines per message: what was said, then what the other side hears.
pub fn render_message(index: usize, msg: &Message) -> Vec<String> {
    let voice = match (msg.message_type, msg.audio_duration.as_deref()) {
        (MessageType::Audio, Some(secs)) if !secs.trim().is_empty() => {
            format!("🎤 ({}s) ", secs.trim())
        }
        (MessageType::Audio, _) => "🎤 ".to_string(),
        _ => String::new(),
    };
    let mut lines = vec![format!(
        "{:>3}. {} {} {} {}{}",
        index,
        clock(&msg.created_at),
        role_label(msg.role),
        language::flag(&msg.original_language),
        voice,
        msg.original_text
    )];
    let target = msg.target_language.as_deref().unwrap_or("");
    match msg.translation() {
        Some(text) => {
            let speaker = if msg.server_audio().is_some() {
                " 🔊"
            } else {
                ""
            };
            lines.push(format!(
                "     {} {}{}",
                language::flag(target),
                text,
                speaker
            ));
        }
        None => lines.push("     … translating".to_string()),
    }
    lines
}

pub fn render_conversations(list: &[Conversation], active: Option<&str>) -> Vec<String> {
    if list.is_empty() {
        return vec!["no consultations yet, /new starts one".into()];
    }
    list.iter()
        .enumerate()
        .map(|(i, c)| {
            let marker = if Some(c.id.as_str()) == active { "*" } else { " " };
            let count = c
                .message_count
                .map(|n| format!(" ({} messages)", n))
                .unwrap_or_default();
            format!(
                "{}{:>3}. {} {}→{} {}{}",
                marker,
                i + 1,
                c.title,
                language::flag(&c.doctor_language),
                language::flag(&c.patient_language),
                c.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                count
            )
        })
        .collect()
}

/// Search hits with matched spans wrapped in `«»`.
pub fn render_search(resp: &SearchResponse) -> Vec<String> {
    let mut lines = vec![format!(
        "{} result(s) for \"{}\"",
        resp.total_results, resp.query
    )];
    for hit in &resp.results {
        let context: String = highlight_segments(&hit.match_context)
            .into_iter()
            .map(|s| {
                if s.highlighted {
                    format!("«{}»", s.text)
                } else {
                    s.text.to_string()
                }
            })
            .collect();
        lines.push(format!(
            "  {} {} [{}] {}",
            clock(&hit.created_at),
            role_label(hit.role),
            hit.conversation_title,
            context
        ));
        if let Some(translated) = hit.translated_text.as_deref().filter(|t| !t.is_empty()) {
            lines.push(format!("      → {}", translated));
        }
    }
    lines
}

pub fn render_summary_text(summary: &Summary) -> Vec<String> {
    let mut lines = vec![format!(
        "📋 Medical summary, generated {}",
        summary
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
    )];
    for block in render_summary(&summary.summary_text) {
        lines.push(match block {
            SummaryBlock::Heading(title) => format!("■ {}", title),
            SummaryBlock::Bullet { text, warning: true } => format!("  ! {}", text),
            SummaryBlock::Bullet { text, .. } => format!("  • {}", text),
            SummaryBlock::Paragraph(text) => text,
            SummaryBlock::Spacer => String::new(),
        });
    }
    lines
}

pub fn render_languages() -> Vec<String> {
    LANGUAGES
        .iter()
        .map(|l| format!("  {} {:<3} {}", l.flag, l.code, l.name))
        .collect()
}

pub fn recording_indicator(elapsed_secs: u32) -> String {
    format!("● REC {}", format_elapsed(elapsed_secs))
}
