use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use anyhow::{Result, anyhow};
use tokio::task::JoinHandle;

use crate::rag::{QueryResponse, RagClient, Source};

/// At most this many sources are attached to an assistant message, no matter
/// how many the backend returns.
pub const SOURCE_LIMIT: usize = 3;
/// Selected text attached to a user message is truncated to this many chars.
pub const CONTEXT_PREVIEW_CHARS: usize = 200;
/// Selections outside (10, 2000) chars after trimming are ignored.
pub const SELECTION_MIN_CHARS: usize = 10;
pub const SELECTION_MAX_CHARS: usize = 2000;
/// The "ask about selection" prompt hides itself after this long.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(5);

pub const FALLBACK_ANSWER: &str = "No answer received.";

pub const SUGGESTED_QUESTIONS: [&str; 3] = [
    "What is this book about?",
    "How do I get started?",
    "What are the main modules?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    User,
    Assistant,
    Error,
}

/// One entry of the conversation. Immutable once appended; lives until the
/// process exits or the user clears the chat.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub kind: MessageKind,
    pub content: String,
    /// Truncated selection text, present on selection-scoped user messages
    pub context: Option<String>,
    /// Citations; only assistant messages carry any
    pub sources: Vec<Source>,
    pub timestamp: SystemTime,
}

/// Text the user highlighted in the content pane, plus the transient
/// "ask about selection" prompt window.
#[derive(Debug, Default)]
pub struct SelectionState {
    text: Option<String>,
    prompt_deadline: Option<Instant>,
}

impl SelectionState {
    /// Store a selection if its trimmed length is strictly between the min
    /// and max bounds. Out-of-bounds selections leave existing state alone.
    pub fn record(&mut self, raw: &str) -> bool {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if len <= SELECTION_MIN_CHARS || len >= SELECTION_MAX_CHARS {
            return false;
        }
        self.text = Some(trimmed.to_string());
        self.prompt_deadline = Some(Instant::now() + PROMPT_TIMEOUT);
        true
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.text.is_some()
    }

    pub fn prompt_visible(&self) -> bool {
        self.text.is_some()
            && self
                .prompt_deadline
                .map(|deadline| Instant::now() < deadline)
                .unwrap_or(false)
    }

    /// Re-open the prompt window, e.g. when the user acts on the affordance
    /// and needs time to type the question.
    pub fn rearm_prompt(&mut self) {
        if self.text.is_some() {
            self.prompt_deadline = Some(Instant::now() + PROMPT_TIMEOUT);
        }
    }

    pub fn clear(&mut self) {
        self.text = None;
        self.prompt_deadline = None;
    }

    /// Called from the tick event; drops the selection once the prompt
    /// window has passed unused.
    pub fn tick(&mut self) {
        self.expire_at(Instant::now());
    }

    fn expire_at(&mut self, now: Instant) {
        if let Some(deadline) = self.prompt_deadline {
            if now >= deadline {
                self.clear();
            }
        }
    }

    fn hide_prompt(&mut self) {
        self.prompt_deadline = None;
    }
}

struct PendingQuery {
    task: JoinHandle<Result<QueryResponse>>,
    selection_query: bool,
}

/// The chat panel: message history, input line, selection state, and the
/// single in-flight request slot. Submission is a no-op while a request is
/// pending, so at most one call is outstanding at a time.
pub struct ChatState {
    pub open: bool,
    pub messages: Vec<Message>,
    pub input: String,
    pub cursor: usize,
    pub loading: bool,
    pub error: Option<String>,
    pub selection: SelectionState,

    // Scroll state; width/height of the messages area are recorded during
    // render for the wrap math
    pub scroll: u16,
    pub panel_width: u16,
    pub panel_height: u16,

    pending: Option<PendingQuery>,
    last_id: u64,
}

impl ChatState {
    pub fn new() -> Self {
        Self {
            open: false,
            messages: Vec::new(),
            input: String::new(),
            cursor: 0,
            loading: false,
            error: None,
            selection: SelectionState::default(),
            scroll: 0,
            panel_width: 0,
            panel_height: 0,
            pending: None,
            last_id: 0,
        }
    }

    /// Ask a plain question. Blank input is a no-op, as is submitting while
    /// a request is already in flight.
    pub fn send_question(&mut self, rag: &RagClient, text: &str) {
        let question = text.trim();
        if question.is_empty() || self.pending.is_some() {
            return;
        }

        self.loading = true;
        self.error = None;
        self.push_message(MessageKind::User, question.to_string(), None, Vec::new());
        self.input.clear();
        self.cursor = 0;
        self.scroll_to_bottom();

        let rag = rag.clone();
        let question = question.to_string();
        self.pending = Some(PendingQuery {
            task: tokio::spawn(async move { rag.query(&question).await }),
            selection_query: false,
        });
    }

    /// Ask a question about the current selection. Requires an active
    /// selection; the selection is cleared once the request resolves,
    /// whatever the outcome.
    pub fn send_selection_question(&mut self, rag: &RagClient, text: &str) {
        let question = text.trim();
        let Some(selected) = self.selection.text().map(str::to_string) else {
            return;
        };
        if question.is_empty() || self.pending.is_some() {
            return;
        }

        self.loading = true;
        self.error = None;
        self.selection.hide_prompt();
        self.push_message(
            MessageKind::User,
            question.to_string(),
            Some(context_preview(&selected)),
            Vec::new(),
        );
        self.input.clear();
        self.cursor = 0;
        self.scroll_to_bottom();

        let rag = rag.clone();
        let question = question.to_string();
        self.pending = Some(PendingQuery {
            task: tokio::spawn(async move { rag.query_selected_text(&selected, &question).await }),
            selection_query: true,
        });
    }

    /// Empty the conversation. An in-flight request is not cancelled; its
    /// outcome is still appended when it resolves.
    pub fn clear_chat(&mut self) {
        self.messages.clear();
        self.error = None;
        self.scroll = 0;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_finished(&self) -> bool {
        self.pending
            .as_ref()
            .map(|p| p.task.is_finished())
            .unwrap_or(false)
    }

    /// True when submitting should hit the selected-text endpoint.
    pub fn selection_ready(&self) -> bool {
        self.selection.is_active() && self.selection.prompt_visible()
    }

    /// Apply the outcome of the in-flight request: an assistant message on
    /// success, an error message plus banner on failure. Clears the loading
    /// flag either way.
    pub async fn resolve_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let outcome = match pending.task.await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow!("query task panicked: {join_err}")),
        };

        match outcome {
            Ok(response) => self.apply_response(response),
            Err(err) => {
                tracing::warn!(error = %err, "RAG query failed");
                let (banner, message) = if pending.selection_query {
                    (
                        "Failed to get response.",
                        "Sorry, I could not process your question about the selected text.",
                    )
                } else {
                    (
                        "Failed to get response. Is the backend running?",
                        "Sorry, I could not connect to the knowledge base. \
                         Please ensure the backend is running.",
                    )
                };
                self.error = Some(banner.to_string());
                self.push_message(MessageKind::Error, message.to_string(), None, Vec::new());
            }
        }

        self.loading = false;
        if pending.selection_query {
            self.selection.clear();
        }
        self.scroll_to_bottom();
    }

    fn apply_response(&mut self, response: QueryResponse) {
        let content = if response.answer.trim().is_empty() {
            FALLBACK_ANSWER.to_string()
        } else {
            response.answer
        };
        let sources: Vec<Source> = response.sources.into_iter().take(SOURCE_LIMIT).collect();
        self.push_message(MessageKind::Assistant, content, None, sources);
    }

    fn push_message(
        &mut self,
        kind: MessageKind,
        content: String,
        context: Option<String>,
        sources: Vec<Source>,
    ) {
        let id = self.next_id();
        let message = Message {
            id,
            kind,
            content,
            context,
            sources,
            timestamp: SystemTime::now(),
        };
        tracing::debug!(id, kind = ?message.kind, at = ?message.timestamp, "chat message appended");
        self.messages.push(message);
    }

    /// Timestamp-derived ids, forced strictly increasing so two messages in
    /// the same millisecond never collide.
    fn next_id(&mut self) -> u64 {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let id = now_millis.max(self.last_id + 1);
        self.last_id = id;
        id
    }

    /// Scroll so the newest message (or the thinking indicator) is visible.
    /// Mirrors the line structure produced by the chat renderer.
    pub fn scroll_to_bottom(&mut self) {
        let wrap_width = if self.panel_width > 0 {
            self.panel_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in &self.messages {
            total_lines += 1; // role line
            total_lines += crate::ui::wrap_text(&msg.content, wrap_width).len() as u16;
            if msg.context.is_some() {
                total_lines += 1;
            }
            if !msg.sources.is_empty() {
                // "Sources" header plus a title line and snippet line each
                total_lines += 1;
                for source in &msg.sources {
                    total_lines += 1;
                    if source.content.is_some() {
                        total_lines += 1;
                    }
                }
            }
            total_lines += 1; // blank line after message
        }

        if self.loading {
            total_lines += 2; // role line + "Thinking..."
        }

        let visible_height = if self.panel_height > 0 {
            self.panel_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.scroll = total_lines.saturating_sub(visible_height);
        } else {
            self.scroll = 0;
        }
    }
}

fn context_preview(selected: &str) -> String {
    let preview: String = selected.chars().take(CONTEXT_PREVIEW_CHARS).collect();
    if selected.chars().count() > CONTEXT_PREVIEW_CHARS {
        format!("{}...", preview)
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_for(server: &mockito::Server) -> RagClient {
        RagClient::new(&server.url(), 5)
    }

    /// A client pointed at a port nothing listens on, for transport failures.
    fn unreachable_client() -> RagClient {
        RagClient::new("http://127.0.0.1:9", 5)
    }

    async fn settle(chat: &mut ChatState) {
        assert!(chat.has_pending());
        chat.resolve_pending().await;
    }

    #[tokio::test]
    async fn test_blank_question_is_a_no_op() {
        let mut chat = ChatState::new();
        let rag = unreachable_client();

        chat.send_question(&rag, "");
        chat.send_question(&rag, "   \n\t ");

        assert!(chat.messages.is_empty());
        assert!(!chat.loading);
        assert!(!chat.has_pending());
    }

    #[tokio::test]
    async fn test_successful_query_appends_user_then_assistant() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "answer": "Nodes talk over topics.",
                    "sources": [
                        {"title": "A", "module": "m1", "content": "..."},
                        {"title": "B", "module": "m1", "content": "..."},
                        {"title": "C", "module": "m2", "content": "..."},
                        {"title": "D", "module": "m2", "content": "..."},
                        {"title": "E", "module": "m3", "content": "..."}
                    ],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut chat = ChatState::new();
        let rag = client_for(&server);

        chat.send_question(&rag, "how do nodes communicate?");
        assert!(chat.loading);
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].kind, MessageKind::User);

        settle(&mut chat).await;

        assert!(!chat.loading);
        assert_eq!(chat.messages.len(), 2);
        let reply = &chat.messages[1];
        assert_eq!(reply.kind, MessageKind::Assistant);
        assert_eq!(reply.content, "Nodes talk over topics.");
        // Backend returned 5 sources; the message keeps the first 3
        assert_eq!(reply.sources.len(), SOURCE_LIMIT);
        assert_eq!(reply.sources[0].title, "A");
        assert!(chat.error.is_none());
    }

    #[tokio::test]
    async fn test_empty_answer_falls_back() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"answer": "", "sources": []}).to_string())
            .create_async()
            .await;

        let mut chat = ChatState::new();
        chat.send_question(&client_for(&server), "anything");
        settle(&mut chat).await;

        assert_eq!(chat.messages[1].content, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_failed_query_appends_error_and_clears_loading() {
        let mut chat = ChatState::new();
        chat.send_question(&unreachable_client(), "hello?");
        assert!(chat.loading);

        settle(&mut chat).await;

        assert!(!chat.loading);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].kind, MessageKind::User);
        assert_eq!(chat.messages[1].kind, MessageKind::Error);
        assert!(chat.error.as_deref().unwrap().contains("backend running"));
    }

    #[tokio::test]
    async fn test_second_submit_while_loading_is_ignored() {
        let mut chat = ChatState::new();
        let rag = unreachable_client();

        chat.send_question(&rag, "first");
        chat.send_question(&rag, "second");

        // Only the first question was accepted
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].content, "first");

        chat.resolve_pending().await;
        assert_eq!(chat.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_selection_question_requires_selection() {
        let mut chat = ChatState::new();
        chat.send_selection_question(&unreachable_client(), "what does this mean?");
        assert!(chat.messages.is_empty());
        assert!(!chat.has_pending());
    }

    #[tokio::test]
    async fn test_selection_cleared_after_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query-selected-text")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"answer": "Explained.", "sources": []}).to_string())
            .create_async()
            .await;

        let mut chat = ChatState::new();
        assert!(chat.selection.record("a selection long enough to count"));

        chat.send_selection_question(&client_for(&server), "explain this");
        settle(&mut chat).await;

        assert!(!chat.selection.is_active());
        assert_eq!(chat.messages[1].kind, MessageKind::Assistant);
        assert!(chat.messages[0].context.is_some());
    }

    #[tokio::test]
    async fn test_selection_cleared_after_failure() {
        let mut chat = ChatState::new();
        assert!(chat.selection.record("a selection long enough to count"));

        chat.send_selection_question(&unreachable_client(), "explain this");
        settle(&mut chat).await;

        assert!(!chat.selection.is_active());
        assert_eq!(chat.messages[1].kind, MessageKind::Error);
        assert!(!chat.loading);
    }

    #[tokio::test]
    async fn test_context_is_truncated_to_200_chars() {
        let mut chat = ChatState::new();
        let long = "x".repeat(500);
        assert!(chat.selection.record(&long));

        chat.send_selection_question(&unreachable_client(), "what is this?");
        let context = chat.messages[0].context.as_ref().unwrap();
        assert_eq!(context.chars().count(), CONTEXT_PREVIEW_CHARS + 3);
        assert!(context.ends_with("..."));
        chat.resolve_pending().await;
    }

    #[tokio::test]
    async fn test_clear_chat_empties_messages() {
        let mut chat = ChatState::new();
        chat.push_message(MessageKind::User, "a".into(), None, Vec::new());
        chat.push_message(MessageKind::Assistant, "b".into(), None, Vec::new());
        chat.error = Some("banner".into());

        chat.clear_chat();

        assert!(chat.messages.is_empty());
        assert!(chat.error.is_none());
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let mut chat = ChatState::new();
        let a = chat.next_id();
        let b = chat.next_id();
        let c = chat.next_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_selection_bounds() {
        let mut selection = SelectionState::default();

        assert!(!selection.record("short"));
        assert!(!selection.is_active());

        // Exactly at the bounds is still out of range
        assert!(!selection.record(&"x".repeat(SELECTION_MIN_CHARS)));
        assert!(!selection.record(&"x".repeat(SELECTION_MAX_CHARS)));

        assert!(selection.record(&"x".repeat(50)));
        assert!(selection.is_active());
        assert!(selection.prompt_visible());
    }

    #[test]
    fn test_whitespace_only_selection_ignored() {
        let mut selection = SelectionState::default();
        assert!(!selection.record("                    \n\n   "));
        assert!(!selection.is_active());
    }

    #[test]
    fn test_prompt_expires_after_timeout() {
        let mut selection = SelectionState::default();
        assert!(selection.record(&"y".repeat(50)));
        assert!(selection.prompt_visible());

        // Just before the deadline: still there
        selection.expire_at(Instant::now() + PROMPT_TIMEOUT - Duration::from_millis(100));
        assert!(selection.is_active());

        // Past the deadline: selection and prompt are gone
        selection.expire_at(Instant::now() + PROMPT_TIMEOUT + Duration::from_millis(100));
        assert!(!selection.is_active());
        assert!(!selection.prompt_visible());
    }

    #[test]
    fn test_context_preview_short_selection_unchanged() {
        assert_eq!(context_preview("short text"), "short text");
    }
}
