#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Session
    SetSession {
        user_id: String,
        access_token: Option<String>,
    },
    ClearSession,

    // Chat
    OpenChat {
        chat_id: String,
    },
    CloseChat,
    SendMessage {
        chat_id: String,
        content: String,
    },
    AcknowledgeDraftRestore {
        chat_id: String,
    },

    // UI
    ClearToast,
}

impl AppAction {
    /// Log-safe action tag (never includes the access token or message text).
    pub fn tag(&self) -> &'static str {
        match self {
            // Session
            AppAction::SetSession { .. } => "SetSession",
            AppAction::ClearSession => "ClearSession",

            // Chat
            AppAction::OpenChat { .. } => "OpenChat",
            AppAction::CloseChat => "CloseChat",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::AcknowledgeDraftRestore { .. } => "AcknowledgeDraftRestore",

            // UI
            AppAction::ClearToast => "ClearToast",
        }
    }
}
