use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{
        Block, Borders, Clear, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation,
        ScrollbarState,
    },
};

use crate::app::{App, FocusPane, InputMode, NavLevel, Screen};
use crate::chat::{MessageKind, SUGGESTED_QUESTIONS};

/// Snippets from cited sources are clipped to this many chars.
const SNIPPET_CHARS: usize = 120;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.screen {
        Screen::Read => render_read_screen(app, frame, body_area),
        Screen::Search => render_search_screen(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);

    // The chat panel overlays whichever screen is active
    if app.chat.open {
        render_chat_panel(app, frame, body_area);
    } else {
        app.chat_area = None;
        if app.chat.selection.prompt_visible() {
            render_selection_tooltip(frame, body_area);
        }
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let chat_indicator = if app.chat.loading {
        " [asking...]".to_string()
    } else if !app.chat.messages.is_empty() {
        format!(" [{} messages]", app.chat.messages.len())
    } else {
        String::new()
    };

    let title = Line::from(vec![
        Span::styled(" Ragbook ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("{} chapters", app.book.len()),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(chat_indicator, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_read_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [nav_area, content_area] =
        Layout::horizontal([Constraint::Length(30), Constraint::Min(0)]).areas(area);

    render_navigation(app, frame, nav_area);
    render_content(app, frame, content_area);
}

fn render_navigation(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Navigation;
    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(format!(" {} ", app.current_nav_title()));

    let items: Vec<ListItem> = match app.nav_level {
        NavLevel::Module => app
            .cached_modules
            .iter()
            .map(|m| ListItem::new(m.clone()))
            .collect(),
        NavLevel::Chapter => app
            .cached_chapters
            .iter()
            .map(|&idx| {
                let title = app
                    .book
                    .chapter(idx)
                    .map(|c| c.title.clone())
                    .unwrap_or_default();
                ListItem::new(title)
            })
            .collect(),
    };

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    app.nav_area = Some(area);

    match app.nav_level {
        NavLevel::Module => frame.render_stateful_widget(list, area, &mut app.module_state),
        NavLevel::Chapter => frame.render_stateful_widget(list, area, &mut app.chapter_state),
    }
}

fn render_content(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Content;
    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(format!(" {} ", app.content_title()));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    app.content_area = Some(inner);
    app.content_height = inner.height;
    app.ensure_wrapped(inner.width);

    let region = effective_region(app);
    let lines: Vec<Line> = app
        .content_lines
        .iter()
        .enumerate()
        .map(|(idx, line)| content_line(line, idx, region))
        .collect();

    let paragraph = Paragraph::new(lines).scroll((app.content_scroll, 0));
    frame.render_widget(paragraph, inner);

    // Scrollbar on the right edge of the content pane
    let total = app.total_content_lines() as usize;
    if total > inner.height as usize {
        let mut state = ScrollbarState::new(total.saturating_sub(inner.height as usize))
            .position(app.content_scroll as usize);
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight);
        frame.render_stateful_widget(scrollbar, area, &mut state);
    }
}

/// The highlight region: the live drag if one is underway, otherwise the
/// committed selection.
fn effective_region(app: &App) -> Option<((usize, usize), (usize, usize))> {
    match (app.drag_anchor, app.drag_head) {
        (Some(a), Some(b)) => {
            if a <= b {
                Some((a, b))
            } else {
                Some((b, a))
            }
        }
        _ => app.selection_region,
    }
}

/// Style one content line, reversing the span covered by the selection.
fn content_line(
    line: &str,
    idx: usize,
    region: Option<((usize, usize), (usize, usize))>,
) -> Line<'static> {
    let Some((start, end)) = region else {
        return Line::from(line.to_string());
    };
    if idx < start.0 || idx > end.0 {
        return Line::from(line.to_string());
    }

    let char_count = line.chars().count();
    let from = if idx == start.0 { start.1.min(char_count) } else { 0 };
    let to = if idx == end.0 {
        (end.1 + 1).min(char_count)
    } else {
        char_count
    };
    if from >= to {
        return Line::from(line.to_string());
    }

    let before: String = line.chars().take(from).collect();
    let selected: String = line.chars().skip(from).take(to - from).collect();
    let after: String = line.chars().skip(to).collect();

    let mut spans = Vec::new();
    if !before.is_empty() {
        spans.push(Span::raw(before));
    }
    spans.push(Span::styled(
        selected,
        Style::default().add_modifier(Modifier::REVERSED),
    ));
    if !after.is_empty() {
        spans.push(Span::raw(after));
    }
    Line::from(spans)
}

fn render_search_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [input_area, results_area] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).areas(area);

    let editing = app.input_mode == InputMode::Editing && !app.chat.open;
    let border_style = if editing {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let input = Paragraph::new(app.search_input.clone()).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title(" Search "),
    );
    frame.render_widget(input, input_area);
    if editing {
        let x = input_area.x + 1 + app.search_input.chars().count() as u16;
        frame.set_cursor_position((x.min(input_area.right().saturating_sub(2)), input_area.y + 1));
    }

    let items: Vec<ListItem> = app
        .search_results
        .iter()
        .map(|hit| {
            let chapter = app.book.chapter(hit.chapter);
            let title = chapter.map(|c| c.title.clone()).unwrap_or_default();
            let module = chapter.map(|c| c.module.clone()).unwrap_or_default();
            ListItem::new(Line::from(vec![
                Span::styled(title, Style::default().fg(Color::Yellow).bold()),
                Span::styled(format!("  {}", module), Style::default().fg(Color::DarkGray)),
                Span::raw(format!("  {}", truncate_chars(&hit.line, 60))),
            ]))
        })
        .collect();

    let results = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} results ", app.search_results.len())),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(results, results_area, &mut app.search_state);
}

fn render_chat_panel(app: &mut App, frame: &mut Frame, body: Rect) {
    let panel_width = (body.width * 2 / 5).clamp(32, 60).min(body.width);
    let panel = Rect {
        x: body.right().saturating_sub(panel_width),
        y: body.y,
        width: panel_width,
        height: body.height,
    };

    frame.render_widget(Clear, panel);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" Book Assistant ")
        .title_bottom(Line::from(" Powered by RAG ").right_aligned());
    let inner = block.inner(panel);
    frame.render_widget(block, panel);
    app.chat_area = Some(panel);

    // Panel layout: optional error banner, messages, optional selection
    // bar, input box
    let banner_height = u16::from(app.chat.error.is_some());
    let bar_height = u16::from(app.chat.selection_ready());
    let [banner_area, messages_area, bar_area, input_area] = Layout::vertical([
        Constraint::Length(banner_height),
        Constraint::Min(0),
        Constraint::Length(bar_height),
        Constraint::Length(3),
    ])
    .areas(inner);

    if let Some(error) = &app.chat.error {
        let banner = Paragraph::new(truncate_chars(error, messages_area.width as usize))
            .style(Style::default().fg(Color::White).bg(Color::Red));
        frame.render_widget(banner, banner_area);
    }

    render_chat_messages(app, frame, messages_area);

    if app.chat.selection_ready() {
        if let Some(selected) = app.chat.selection.text() {
            let label = format!("Asking about: \"{}...\"", truncate_chars(selected, 40));
            let bar = Paragraph::new(truncate_chars(&label, bar_area.width as usize))
                .style(Style::default().fg(Color::Black).bg(Color::Yellow));
            frame.render_widget(bar, bar_area);
        }
    }

    render_chat_input(app, frame, input_area);
}

fn render_chat_messages(app: &mut App, frame: &mut Frame, area: Rect) {
    app.chat.panel_width = area.width;
    app.chat.panel_height = area.height;

    if app.chat.messages.is_empty() && !app.chat.loading {
        render_chat_welcome(frame, area);
        return;
    }

    let width = area.width as usize;
    let mut lines: Vec<Line> = Vec::new();

    for msg in &app.chat.messages {
        let (label, style) = match msg.kind {
            MessageKind::User => ("You:", Style::default().fg(Color::Cyan).bold()),
            MessageKind::Assistant => ("Assistant:", Style::default().fg(Color::Green).bold()),
            MessageKind::Error => ("Error:", Style::default().fg(Color::Red).bold()),
        };
        lines.push(Line::from(Span::styled(label, style)));

        let content_style = match msg.kind {
            MessageKind::Error => Style::default().fg(Color::Red),
            _ => Style::default(),
        };
        for wrapped in wrap_text(&msg.content, width) {
            lines.push(Line::from(Span::styled(wrapped, content_style)));
        }

        if let Some(context) = &msg.context {
            let label = format!("Context: \"{}\"", context);
            lines.push(Line::from(Span::styled(
                truncate_chars(&label, width),
                Style::default().fg(Color::DarkGray).italic(),
            )));
        }

        if !msg.sources.is_empty() {
            lines.push(Line::from(Span::styled(
                "Sources:",
                Style::default().fg(Color::DarkGray).bold(),
            )));
            for source in &msg.sources {
                let mut title_line = format!("- {}", source.title);
                if let Some(module) = &source.module {
                    title_line.push_str(&format!(" ({})", module));
                }
                lines.push(Line::from(Span::styled(
                    truncate_chars(&title_line, width),
                    Style::default().fg(Color::Yellow),
                )));
                if let Some(content) = &source.content {
                    let snippet = format!("  {}...", truncate_chars(content, SNIPPET_CHARS));
                    lines.push(Line::from(Span::styled(
                        truncate_chars(&snippet, width),
                        Style::default().fg(Color::DarkGray),
                    )));
                }
            }
        }

        lines.push(Line::default());
    }

    if app.chat.loading {
        lines.push(Line::from(Span::styled(
            "Assistant:",
            Style::default().fg(Color::Green).bold(),
        )));
        let dots = ".".repeat(app.animation_frame as usize + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines).scroll((app.chat.scroll, 0));
    frame.render_widget(paragraph, area);
}

fn render_chat_welcome(frame: &mut Frame, area: Rect) {
    let width = area.width as usize;
    let mut lines = vec![
        Line::default(),
        Line::from(Span::styled("Welcome!", Style::default().bold())),
    ];
    for wrapped in wrap_text(
        "Ask me anything about this book, or try one of these:",
        width,
    ) {
        lines.push(Line::from(wrapped));
    }
    lines.push(Line::default());
    for (i, question) in SUGGESTED_QUESTIONS.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(
                format!(" Alt-{} ", i + 1),
                Style::default().bg(Color::DarkGray).fg(Color::White),
            ),
            Span::raw(format!(" {}", question)),
        ]));
    }
    lines.push(Line::default());
    for wrapped in wrap_text(
        "Tip: drag over text in a chapter, then press 'a' to ask about the selection.",
        width,
    ) {
        lines.push(Line::from(Span::styled(
            wrapped,
            Style::default().fg(Color::DarkGray),
        )));
    }

    frame.render_widget(Paragraph::new(lines), area);
}

fn render_chat_input(app: &mut App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing && app.focus == FocusPane::ChatInput;
    let border_style = if app.chat.loading {
        Style::default().fg(Color::DarkGray)
    } else if editing {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    let title = if app.chat.loading {
        " Waiting for answer... "
    } else {
        " Ask "
    };

    let text: Line = if app.chat.input.is_empty() {
        let placeholder = if app.chat.selection_ready() {
            "Ask about the selected text..."
        } else {
            "Ask a question about the book..."
        };
        Line::from(Span::styled(placeholder, Style::default().fg(Color::DarkGray)))
    } else {
        Line::from(app.chat.input.clone())
    };

    let input = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title(title),
    );
    frame.render_widget(input, area);

    if editing && !app.chat.loading {
        let x = area.x + 1 + app.chat.cursor as u16;
        frame.set_cursor_position((x.min(area.right().saturating_sub(2)), area.y + 1));
    }
}

fn render_selection_tooltip(frame: &mut Frame, body: Rect) {
    let label = " Ask about selection: press a ";
    let width = (label.chars().count() as u16).min(body.width);
    let tooltip = Rect {
        x: body.right().saturating_sub(width + 1),
        y: body.bottom().saturating_sub(2),
        width,
        height: 1,
    };
    frame.render_widget(Clear, tooltip);
    let prompt = Paragraph::new(label).style(Style::default().fg(Color::Black).bg(Color::Yellow));
    frame.render_widget(prompt, tooltip);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.screen {
        Screen::Read => " READ ",
        Screen::Search => " SEARCH ",
    };

    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints: Vec<(&str, &str)> = if app.chat.open {
        match app.input_mode {
            InputMode::Editing => vec![
                ("Enter", "send"),
                ("Esc", "close"),
                ("C-x", "drop selection"),
                ("C-l", "clear chat"),
            ],
            InputMode::Normal => vec![("c", "close chat"), ("Tab", "focus"), ("Ctrl-l", "clear")],
        }
    } else {
        match (app.screen, app.input_mode) {
            (Screen::Read, InputMode::Normal) => vec![
                ("j/k", "move"),
                ("Enter", "open"),
                ("/", "search"),
                ("c", "chat"),
                ("a", "ask selection"),
                ("q", "quit"),
            ],
            (Screen::Search, InputMode::Normal) => vec![
                ("j/k", "move"),
                ("Enter", "open"),
                ("i", "edit"),
                ("Esc", "back"),
            ],
            (_, InputMode::Editing) => vec![("Enter", "search"), ("Esc", "done")],
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
        spans.push(Span::raw(" "));
    }

    let footer = Paragraph::new(Line::from(spans));
    frame.render_widget(footer, area);
}

/// Greedy word wrap at the given width, splitting overlong words by chars.
/// The content pane renders these lines verbatim, so mouse selection offsets
/// match what is on screen; the chat scroll math counts them the same way.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for raw in text.lines() {
        if raw.trim().is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current = String::new();
        let mut current_len = 0usize;

        for word in raw.split_whitespace() {
            let word_len = word.chars().count();

            if current_len > 0 && current_len + 1 + word_len <= width {
                current.push(' ');
                current.push_str(word);
                current_len += 1 + word_len;
                continue;
            }

            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }

            if word_len <= width {
                current.push_str(word);
                current_len = word_len;
            } else {
                // Hard-split a word longer than the pane
                let chars: Vec<char> = word.chars().collect();
                let mut chunks = chars.chunks(width).peekable();
                while let Some(chunk) = chunks.next() {
                    if chunks.peek().is_some() {
                        lines.push(chunk.iter().collect());
                    } else {
                        current = chunk.iter().collect();
                        current_len = chunk.len();
                    }
                }
            }
        }

        if current_len > 0 {
            lines.push(current);
        }
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Clip a string to at most `max` chars.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_text_basic() {
        let lines = wrap_text("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }

    #[test]
    fn test_wrap_text_preserves_blank_lines() {
        let lines = wrap_text("para one\n\npara two", 20);
        assert_eq!(lines, vec!["para one", "", "para two"]);
    }

    #[test]
    fn test_wrap_text_hard_splits_long_words() {
        let lines = wrap_text("abcdefghij", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_wrap_text_empty_input() {
        assert_eq!(wrap_text("", 10), vec![String::new()]);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello");
        // Char-based, not byte-based
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn test_content_line_highlights_selection() {
        let line = content_line("hello world", 0, Some(((0, 2), (0, 6))));
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[0].content, "he");
        assert_eq!(line.spans[1].content, "llo w");
        assert_eq!(line.spans[2].content, "orld");
    }

    #[test]
    fn test_content_line_outside_region_unstyled() {
        let line = content_line("hello", 5, Some(((0, 0), (1, 2))));
        assert_eq!(line.spans.len(), 1);
    }
}
