use crate::error::Result;
use crate::live::Generation;
use crate::model::{Conversation, Message, SearchResponse, Summary};

/// Events sent from the input thread and background requests to the app
/// loop.
#[derive(Debug)]
pub enum AppEvent {
    Input(String),
    InputClosed,
    Conversations(Result<Vec<Conversation>>),
    ConversationCreated(Result<Conversation>),
    ConversationFetched(Result<Conversation>),
    ConversationDeleted {
        id: String,
        result: Result<()>,
    },
    History {
        generation: Generation,
        result: Result<Vec<Message>>,
    },
    UploadFinished {
        generation: Generation,
        result: Result<Message>,
    },
    SearchFinished(Result<SearchResponse>),
    SummaryGenerated(Result<Summary>),
    Summaries(Result<Vec<Summary>>),
}
