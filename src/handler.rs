use anyhow::Result;
use crossterm::event::{
    KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::layout::Rect;

use crate::app::{App, FocusPane, InputMode, Screen};
use crate::chat::SUGGESTED_QUESTIONS;
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick();
        }
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    // The chat panel is reachable from every screen
    if handle_chat_global(app, key) {
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

/// Chat keys available regardless of screen: toggle, clear, ask-about-
/// selection, suggested questions. Returns true when the key was consumed.
fn handle_chat_global(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        // Toggle the panel. Opening focuses the input; closing returns to
        // the navigation pane.
        KeyCode::Char('c') if app.input_mode == InputMode::Normal => {
            if app.chat.open {
                close_chat(app);
            } else {
                open_chat(app);
            }
            true
        }

        // Act on the "ask about selection" prompt: open the panel with the
        // selection bar showing and give the user a fresh prompt window.
        KeyCode::Char('a') if app.input_mode == InputMode::Normal => {
            if app.chat.selection.is_active() {
                app.chat.selection.rearm_prompt();
                open_chat(app);
            }
            true
        }

        KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            if app.chat.open {
                app.chat.clear_chat();
            }
            true
        }

        // Alt-1..3 submit a suggested question from the welcome screen
        KeyCode::Char(c @ '1'..='3') if key.modifiers.contains(KeyModifiers::ALT) => {
            if app.chat.open && app.chat.messages.is_empty() && !app.chat.loading {
                let idx = (c as usize) - ('1' as usize);
                if let Some(question) = SUGGESTED_QUESTIONS.get(idx) {
                    app.chat.send_question(&app.rag, question);
                }
            }
            true
        }

        _ => false,
    }
}

fn open_chat(app: &mut App) {
    app.chat.open = true;
    app.focus = FocusPane::ChatInput;
    app.input_mode = InputMode::Editing;
    app.chat.cursor = app.chat.input.chars().count();
}

fn close_chat(app: &mut App) {
    app.chat.open = false;
    if app.focus == FocusPane::ChatInput {
        app.focus = FocusPane::Navigation;
    }
    app.input_mode = InputMode::Normal;
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match app.screen {
        Screen::Read => handle_read_normal(app, key),
        Screen::Search => handle_search_normal(app, key),
    }
}

fn handle_read_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        // Quit, or put the chat away first
        KeyCode::Char('q') => {
            if app.chat.open {
                close_chat(app);
            } else {
                app.should_quit = true;
            }
        }
        KeyCode::Esc => {
            if app.chat.open {
                close_chat(app);
            }
        }

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::Navigation => app.nav_down(),
            FocusPane::Content => app.scroll_down(),
            FocusPane::ChatInput => app.chat.scroll = app.chat.scroll.saturating_add(1),
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::Navigation => app.nav_up(),
            FocusPane::Content => app.scroll_up(),
            FocusPane::ChatInput => app.chat.scroll = app.chat.scroll.saturating_sub(1),
        },
        KeyCode::Char('g') => {
            if app.focus == FocusPane::Content {
                app.content_scroll = 0;
            } else {
                app.nav_first();
            }
        }
        KeyCode::Char('G') => {
            if app.focus == FocusPane::Content {
                app.content_scroll = app
                    .total_content_lines()
                    .saturating_sub(app.content_height);
            } else {
                app.nav_last();
            }
        }

        // Enter/Select
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => {
            if app.focus == FocusPane::Navigation {
                app.nav_enter();
            }
        }

        // Back
        KeyCode::Char('h') | KeyCode::Left | KeyCode::Backspace => {
            if app.focus == FocusPane::Content {
                app.focus = FocusPane::Navigation;
            } else {
                app.nav_back();
            }
        }

        // Tab to switch focus
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Navigation => FocusPane::Content,
                FocusPane::Content => {
                    if app.chat.open {
                        app.input_mode = InputMode::Editing;
                        app.chat.cursor = app.chat.input.chars().count();
                        FocusPane::ChatInput
                    } else {
                        FocusPane::Navigation
                    }
                }
                FocusPane::ChatInput => {
                    app.input_mode = InputMode::Normal;
                    FocusPane::Navigation
                }
            };
        }

        // Half-page scroll
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_half_page_down();
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_half_page_up();
        }

        // Screen switching
        KeyCode::Char('/') => {
            app.screen = Screen::Search;
            app.input_mode = InputMode::Editing;
        }

        _ => {}
    }
}

fn handle_search_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        // Back to the reader
        KeyCode::Esc => {
            if app.chat.open {
                close_chat(app);
            } else {
                app.screen = Screen::Read;
                app.search_input.clear();
                app.search_results.clear();
            }
        }
        KeyCode::Char('q') => {
            if app.chat.open {
                close_chat(app);
            } else {
                app.should_quit = true;
            }
        }

        KeyCode::Char('j') | KeyCode::Down => app.search_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.search_nav_up(),

        // Edit search
        KeyCode::Char('i') | KeyCode::Char('/') => {
            app.input_mode = InputMode::Editing;
        }

        // View selected result
        KeyCode::Enter => app.open_search_result(),

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    if app.chat.open && app.focus == FocusPane::ChatInput {
        handle_chat_editing(app, key);
    } else if app.screen == Screen::Search {
        handle_search_editing(app, key);
    }
}

fn handle_search_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            app.perform_search();
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Backspace => {
            app.search_input.pop();
        }
        KeyCode::Char(c) => {
            app.search_input.push(c);
        }
        _ => {}
    }
}

fn handle_chat_editing(app: &mut App, key: KeyEvent) {
    // Dismiss the selection bar without closing the panel
    if key.code == KeyCode::Char('x') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.chat.selection.clear();
        return;
    }

    match key.code {
        KeyCode::Esc => close_chat(app),
        KeyCode::Enter => {
            let text = app.chat.input.clone();
            if app.chat.selection_ready() {
                app.chat.send_selection_question(&app.rag, &text);
            } else {
                app.chat.send_question(&app.rag, &text);
            }
        }
        KeyCode::Backspace => {
            if app.chat.cursor > 0 {
                app.chat.cursor -= 1;
                let byte_pos = char_to_byte_index(&app.chat.input, app.chat.cursor);
                app.chat.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.chat.input.chars().count();
            if app.chat.cursor < char_count {
                let byte_pos = char_to_byte_index(&app.chat.input, app.chat.cursor);
                app.chat.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.chat.cursor = app.chat.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.chat.input.chars().count();
            app.chat.cursor = (app.chat.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.chat.cursor = 0;
        }
        KeyCode::End => {
            app.chat.cursor = app.chat.input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.chat.input, app.chat.cursor);
            app.chat.input.insert(byte_pos, c);
            app.chat.cursor += 1;
        }
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    let in_nav = app.nav_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_content = app
        .content_area
        .map(|r| point_in_rect(x, y, r))
        .unwrap_or(false);
    let in_chat = app
        .chat
        .open
        .then_some(app.chat_area)
        .flatten()
        .map(|r| point_in_rect(x, y, r))
        .unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_chat {
                app.chat.scroll = app.chat.scroll.saturating_add(3);
            } else {
                match app.screen {
                    Screen::Read => {
                        if in_content {
                            app.scroll_down();
                            app.scroll_down();
                            app.scroll_down();
                        } else if in_nav {
                            app.nav_down();
                        }
                    }
                    Screen::Search => app.search_nav_down(),
                }
            }
        }
        MouseEventKind::ScrollUp => {
            if in_chat {
                app.chat.scroll = app.chat.scroll.saturating_sub(3);
            } else {
                match app.screen {
                    Screen::Read => {
                        if in_content {
                            app.scroll_up();
                            app.scroll_up();
                            app.scroll_up();
                        } else if in_nav {
                            app.nav_up();
                        }
                    }
                    Screen::Search => app.search_nav_up(),
                }
            }
        }

        MouseEventKind::Down(MouseButton::Left) => {
            // A press outside the open panel closes it, unless the user is
            // in the middle of a selection
            if app.chat.open
                && !in_chat
                && !app.chat.selection.is_active()
                && !app.drag_in_progress()
            {
                close_chat(app);
            }

            // The panel overlays part of the content pane; presses on it
            // must not start a drag underneath
            if in_content && !in_chat && app.screen == Screen::Read {
                app.begin_drag(x, y);
            }
        }
        MouseEventKind::Drag(MouseButton::Left) => {
            app.update_drag(x, y);
        }
        MouseEventKind::Up(MouseButton::Left) => {
            app.finish_drag();
        }

        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::Book;
    use crate::rag::RagClient;
    use std::fs;
    use tempfile::TempDir;

    async fn test_app() -> (TempDir, App) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("m1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("ch1.md"),
            "# One\n\nSome chapter text that is long enough to select with the mouse.",
        )
        .unwrap();
        let book = Book::load(tmp.path()).await.unwrap();
        let rag = RagClient::new("http://127.0.0.1:9", 5);
        (tmp, App::new(book, rag))
    }

    fn press(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn left_down(x: u16, y: u16) -> AppEvent {
        AppEvent::Mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: x,
            row: y,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[tokio::test]
    async fn test_toggle_chat_focuses_input() {
        let (_tmp, mut app) = test_app().await;

        handle_event(&mut app, press(KeyCode::Char('c'))).unwrap();
        assert!(app.chat.open);
        assert_eq!(app.focus, FocusPane::ChatInput);
        assert_eq!(app.input_mode, InputMode::Editing);

        handle_event(&mut app, press(KeyCode::Esc)).unwrap();
        assert!(!app.chat.open);
        assert_eq!(app.input_mode, InputMode::Normal);
    }

    #[tokio::test]
    async fn test_typing_and_blank_submit() {
        let (_tmp, mut app) = test_app().await;
        handle_event(&mut app, press(KeyCode::Char('c'))).unwrap();

        for c in "   ".chars() {
            handle_event(&mut app, press(KeyCode::Char(c))).unwrap();
        }
        handle_event(&mut app, press(KeyCode::Enter)).unwrap();

        // Whitespace-only input: nothing sent, nothing appended
        assert!(app.chat.messages.is_empty());
        assert!(!app.chat.has_pending());
    }

    #[tokio::test]
    async fn test_click_outside_closes_panel() {
        let (_tmp, mut app) = test_app().await;
        handle_event(&mut app, press(KeyCode::Char('c'))).unwrap();
        app.chat_area = Some(Rect::new(50, 0, 30, 20));

        handle_event(&mut app, left_down(5, 5)).unwrap();
        assert!(!app.chat.open);
    }

    #[tokio::test]
    async fn test_click_outside_keeps_panel_during_selection() {
        let (_tmp, mut app) = test_app().await;
        handle_event(&mut app, press(KeyCode::Char('c'))).unwrap();
        app.chat_area = Some(Rect::new(50, 0, 30, 20));
        assert!(app
            .chat
            .selection
            .record("an active selection that is long enough"));

        handle_event(&mut app, left_down(5, 5)).unwrap();
        assert!(app.chat.open);
    }

    #[tokio::test]
    async fn test_ask_about_selection_opens_chat() {
        let (_tmp, mut app) = test_app().await;
        assert!(app
            .chat
            .selection
            .record("an active selection that is long enough"));

        handle_event(&mut app, press(KeyCode::Char('a'))).unwrap();
        assert!(app.chat.open);
        assert!(app.chat.selection_ready());
    }

    #[tokio::test]
    async fn test_ask_without_selection_does_nothing() {
        let (_tmp, mut app) = test_app().await;
        handle_event(&mut app, press(KeyCode::Char('a'))).unwrap();
        assert!(!app.chat.open);
    }

    #[tokio::test]
    async fn test_search_flow() {
        let (_tmp, mut app) = test_app().await;

        handle_event(&mut app, press(KeyCode::Char('/'))).unwrap();
        assert_eq!(app.screen, Screen::Search);
        for c in "chapter".chars() {
            handle_event(&mut app, press(KeyCode::Char(c))).unwrap();
        }
        handle_event(&mut app, press(KeyCode::Enter)).unwrap();
        assert_eq!(app.search_results.len(), 1);

        handle_event(&mut app, press(KeyCode::Enter)).unwrap();
        assert_eq!(app.screen, Screen::Read);
        assert_eq!(app.content_title(), "One");
    }

    #[test]
    fn test_char_to_byte_index_multibyte() {
        let s = "héllo";
        assert_eq!(char_to_byte_index(s, 0), 0);
        assert_eq!(char_to_byte_index(s, 2), 3);
        assert_eq!(char_to_byte_index(s, 10), s.len());
    }
}
