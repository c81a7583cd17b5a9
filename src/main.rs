mod app;
mod audio;
mod backend;
mod capture;
mod console;
mod error;
mod language;
mod live;
mod model;
mod playback;
mod search;
mod session;
mod settings;
mod state;
mod summary;
mod timeline;

use audio::Microphone;
use backend::BackendClient;
use live::connection::ConnectionManager;
use playback::speaker::DeviceSpeaker;
use state::AppEvent;
use std::io::BufRead;
use tokio::sync::mpsc;

/// Accepts a bare conversation id or a share link carrying `?conv=<id>`.
fn conversation_arg(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let id = match raw.split_once("conv=") {
        Some((_, rest)) => rest.split('&').next().unwrap_or(""),
        None => raw,
    };
    (!id.is_empty()).then(|| id.to_string())
}

fn spawn_stdin_reader(tx: mpsc::UnboundedSender<AppEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(AppEvent::Input(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!("[input] {}", e);
                    break;
                }
            }
        }
        let _ = tx.send(AppEvent::InputClosed);
    });
}

fn main() {
    env_logger::init();

    let settings = settings::load();
    let conversation_id = std::env::args().nth(1).as_deref().and_then(conversation_arg);
    log::info!(
        "[meditranslate] backend {} as {}",
        settings.api_base_url,
        settings.role
    );

    // Current-thread: the cpal input stream must stay on the thread that
    // created it.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[meditranslate] failed to create tokio runtime: {}", e);
            return;
        }
    };

    let backend = match BackendClient::new(&settings.api_base_url) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("[meditranslate] {}", e);
            return;
        }
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (channel_tx, channel_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(event_tx.clone());

    runtime.block_on(async move {
        let connector = ConnectionManager::new(&settings.api_base_url, channel_tx);
        let microphone = Microphone::new(&settings.mic_device, settings.sample_rate);
        let speaker = DeviceSpeaker::new(&settings.speech_command);
        let mut app = app::App::new(settings, backend, connector, microphone, speaker, event_tx);
        if let Ok(path) = settings::settings_path() {
            app = app.with_settings_path(path);
        }
        app::run(app, event_rx, channel_rx, conversation_id).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_from_id_or_share_link() {
        assert_eq!(conversation_arg("abc-123").as_deref(), Some("abc-123"));
        assert_eq!(
            conversation_arg("http://localhost:8000?conv=abc-123").as_deref(),
            Some("abc-123")
        );
        assert_eq!(
            conversation_arg("https://care.example.org/?conv=c9&x=1").as_deref(),
            Some("c9")
        );
        assert_eq!(conversation_arg("http://host?conv="), None);
        assert_eq!(conversation_arg("  "), None);
    }
}
