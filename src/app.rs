use ratatui::layout::Rect;
use ratatui::widgets::ListState;

use crate::book::{Book, SearchHit};
use crate::chat::ChatState;
use crate::rag::RagClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Read,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavLevel {
    Module,
    Chapter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Navigation,
    Content,
    ChatInput,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // TOC navigation
    pub nav_level: NavLevel,
    pub module_state: ListState,
    pub chapter_state: ListState,
    pub cached_modules: Vec<String>,
    pub cached_chapters: Vec<usize>,

    // Content pane
    pub current_chapter: Option<usize>,
    pub content_lines: Vec<String>,
    pub content_scroll: u16,
    pub content_height: u16,
    wrapped_for: Option<(usize, u16)>,

    // Search state
    pub search_input: String,
    pub search_results: Vec<SearchHit>,
    pub search_state: ListState,

    // Chat widget + backend client
    pub chat: ChatState,
    pub rag: RagClient,

    // Mouse drag selection, as (line, column) offsets into content_lines.
    // The committed region is kept for highlighting until the selection is
    // consumed or expires.
    pub drag_anchor: Option<(usize, usize)>,
    pub drag_head: Option<(usize, usize)>,
    pub selection_region: Option<((usize, usize), (usize, usize))>,

    // Pane areas for mouse hit-testing (updated during render)
    pub nav_area: Option<Rect>,
    pub content_area: Option<Rect>,
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8,

    // Data
    pub book: Book,
}

impl App {
    pub fn new(book: Book, rag: RagClient) -> Self {
        let cached_modules = book.modules().to_vec();

        let mut module_state = ListState::default();
        module_state.select(Some(0));

        let mut app = Self {
            should_quit: false,
            screen: Screen::Read,
            input_mode: InputMode::Normal,
            focus: FocusPane::Navigation,

            nav_level: NavLevel::Module,
            module_state,
            chapter_state: ListState::default(),
            cached_modules,
            cached_chapters: Vec::new(),

            current_chapter: None,
            content_lines: Vec::new(),
            content_scroll: 0,
            content_height: 0,
            wrapped_for: None,

            search_input: String::new(),
            search_results: Vec::new(),
            search_state: ListState::default(),

            chat: ChatState::new(),
            rag,

            drag_anchor: None,
            drag_head: None,
            selection_region: None,

            nav_area: None,
            content_area: None,
            chat_area: None,

            animation_frame: 0,

            book,
        };

        // Open the first chapter so the content pane is never blank
        if let Some(module) = app.cached_modules.first().cloned() {
            app.cached_chapters = app.book.chapters_in(&module).to_vec();
            if let Some(&first) = app.cached_chapters.first() {
                app.open_chapter(first);
            }
        }

        app
    }

    // Navigation helpers
    pub fn selected_module(&self) -> Option<&String> {
        self.module_state
            .selected()
            .and_then(|i| self.cached_modules.get(i))
    }

    pub fn selected_chapter_index(&self) -> Option<usize> {
        self.chapter_state
            .selected()
            .and_then(|i| self.cached_chapters.get(i).copied())
    }

    // Navigation actions
    pub fn nav_down(&mut self) {
        match self.nav_level {
            NavLevel::Module => {
                let len = self.cached_modules.len();
                if len > 0 {
                    let i = self.module_state.selected().unwrap_or(0);
                    self.module_state.select(Some((i + 1).min(len - 1)));
                }
            }
            NavLevel::Chapter => {
                let len = self.cached_chapters.len();
                if len > 0 {
                    let i = self.chapter_state.selected().unwrap_or(0);
                    self.chapter_state.select(Some((i + 1).min(len - 1)));
                    self.open_selected_chapter();
                }
            }
        }
    }

    pub fn nav_up(&mut self) {
        match self.nav_level {
            NavLevel::Module => {
                let i = self.module_state.selected().unwrap_or(0);
                self.module_state.select(Some(i.saturating_sub(1)));
            }
            NavLevel::Chapter => {
                let i = self.chapter_state.selected().unwrap_or(0);
                self.chapter_state.select(Some(i.saturating_sub(1)));
                self.open_selected_chapter();
            }
        }
    }

    pub fn nav_enter(&mut self) {
        match self.nav_level {
            NavLevel::Module => {
                if let Some(module) = self.selected_module().cloned() {
                    self.cached_chapters = self.book.chapters_in(&module).to_vec();
                    if !self.cached_chapters.is_empty() {
                        self.chapter_state.select(Some(0));
                        self.nav_level = NavLevel::Chapter;
                        self.open_selected_chapter();
                    }
                }
            }
            NavLevel::Chapter => {
                // At chapter level, Enter focuses the content pane
                self.focus = FocusPane::Content;
            }
        }
    }

    pub fn nav_back(&mut self) {
        match self.nav_level {
            NavLevel::Module => {
                // Already at top, do nothing
            }
            NavLevel::Chapter => {
                self.nav_level = NavLevel::Module;
                self.chapter_state.select(None);
            }
        }
    }

    pub fn nav_first(&mut self) {
        match self.nav_level {
            NavLevel::Module => self.module_state.select(Some(0)),
            NavLevel::Chapter => {
                self.chapter_state.select(Some(0));
                self.open_selected_chapter();
            }
        }
    }

    pub fn nav_last(&mut self) {
        match self.nav_level {
            NavLevel::Module => {
                let len = self.cached_modules.len();
                if len > 0 {
                    self.module_state.select(Some(len - 1));
                }
            }
            NavLevel::Chapter => {
                let len = self.cached_chapters.len();
                if len > 0 {
                    self.chapter_state.select(Some(len - 1));
                    self.open_selected_chapter();
                }
            }
        }
    }

    fn open_selected_chapter(&mut self) {
        if let Some(idx) = self.selected_chapter_index() {
            self.open_chapter(idx);
        }
    }

    pub fn open_chapter(&mut self, idx: usize) {
        if self.book.chapter(idx).is_none() {
            return;
        }
        self.current_chapter = Some(idx);
        self.content_scroll = 0;
        self.wrapped_for = None;
        self.drag_anchor = None;
        self.drag_head = None;
        self.selection_region = None;
    }

    /// Re-wrap the current chapter for the given pane width. Called during
    /// render; a no-op when neither chapter nor width changed.
    pub fn ensure_wrapped(&mut self, width: u16) {
        let Some(idx) = self.current_chapter else {
            self.content_lines.clear();
            self.wrapped_for = None;
            return;
        };
        if self.wrapped_for == Some((idx, width)) {
            return;
        }
        if let Some(chapter) = self.book.chapter(idx) {
            self.content_lines = crate::ui::wrap_text(&chapter.body, width as usize);
            self.wrapped_for = Some((idx, width));
        }
    }

    pub fn total_content_lines(&self) -> u16 {
        self.content_lines.len() as u16
    }

    // Content scrolling
    pub fn scroll_down(&mut self) {
        if self.content_scroll < self.total_content_lines().saturating_sub(self.content_height) {
            self.content_scroll = self.content_scroll.saturating_add(1);
        }
    }

    pub fn scroll_up(&mut self) {
        self.content_scroll = self.content_scroll.saturating_sub(1);
    }

    pub fn scroll_half_page_down(&mut self) {
        let half_page = self.content_height / 2;
        let max_scroll = self.total_content_lines().saturating_sub(self.content_height);
        self.content_scroll = (self.content_scroll + half_page).min(max_scroll);
    }

    pub fn scroll_half_page_up(&mut self) {
        let half_page = self.content_height / 2;
        self.content_scroll = self.content_scroll.saturating_sub(half_page);
    }

    // Search
    pub fn perform_search(&mut self) {
        if self.search_input.is_empty() {
            return;
        }
        self.search_results = self.book.search(&self.search_input, 50);
        if !self.search_results.is_empty() {
            self.search_state.select(Some(0));
        } else {
            self.search_state.select(None);
        }
    }

    pub fn search_nav_down(&mut self) {
        let len = self.search_results.len();
        if len > 0 {
            let i = self.search_state.selected().unwrap_or(0);
            self.search_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn search_nav_up(&mut self) {
        let i = self.search_state.selected().unwrap_or(0);
        self.search_state.select(Some(i.saturating_sub(1)));
    }

    /// Jump from the selected search result to its chapter in the reader.
    pub fn open_search_result(&mut self) {
        let Some(hit) = self
            .search_state
            .selected()
            .and_then(|i| self.search_results.get(i))
        else {
            return;
        };
        let chapter_idx = hit.chapter;
        let Some(chapter) = self.book.chapter(chapter_idx) else {
            return;
        };
        let module = chapter.module.clone();

        if let Some(mod_pos) = self.cached_modules.iter().position(|m| *m == module) {
            self.module_state.select(Some(mod_pos));
            self.cached_chapters = self.book.chapters_in(&module).to_vec();
            if let Some(ch_pos) = self.cached_chapters.iter().position(|&c| c == chapter_idx) {
                self.chapter_state.select(Some(ch_pos));
            }
            self.nav_level = NavLevel::Chapter;
            self.open_chapter(chapter_idx);
            self.screen = Screen::Read;
            self.focus = FocusPane::Content;
        }
    }

    // Title helpers
    pub fn current_nav_title(&self) -> String {
        match self.nav_level {
            NavLevel::Module => "Modules".to_string(),
            NavLevel::Chapter => self.selected_module().cloned().unwrap_or_default(),
        }
    }

    pub fn content_title(&self) -> String {
        match self.current_chapter.and_then(|i| self.book.chapter(i)) {
            Some(chapter) => chapter.title.clone(),
            None => "Select a chapter".to_string(),
        }
    }

    /// Tick event: drives the loading animation, the selection-prompt
    /// timeout, and drops stale highlight regions.
    pub fn tick(&mut self) {
        if self.chat.loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        self.chat.selection.tick();
        if !self.chat.selection.is_active() && self.drag_anchor.is_none() {
            self.selection_region = None;
        }
    }

    // Mouse drag selection over the content pane
    pub fn begin_drag(&mut self, x: u16, y: u16) {
        if let Some(point) = self.content_point(x, y) {
            self.drag_anchor = Some(point);
            self.drag_head = Some(point);
        }
    }

    pub fn update_drag(&mut self, x: u16, y: u16) {
        if self.drag_anchor.is_some() {
            if let Some(point) = self.content_point_clamped(x, y) {
                self.drag_head = Some(point);
            }
        }
    }

    /// Commit the drag: extract the covered text and hand it to the
    /// selection state, which enforces the length bounds.
    pub fn finish_drag(&mut self) {
        let (anchor, head) = (self.drag_anchor.take(), self.drag_head.take());
        let (Some(anchor), Some(head)) = (anchor, head) else {
            return;
        };
        if anchor == head {
            // A plain click, not a drag
            return;
        }
        let (start, end) = order_points(anchor, head);
        let text = self.region_text(start, end);
        if self.chat.selection.record(&text) {
            self.selection_region = Some((start, end));
        }
    }

    pub fn drag_in_progress(&self) -> bool {
        self.drag_anchor.is_some()
    }

    /// The text covered by an inclusive (line, column) region of the
    /// wrapped content. Wrapped line breaks become newlines, like any
    /// terminal selection.
    fn region_text(&self, start: (usize, usize), end: (usize, usize)) -> String {
        let mut parts = Vec::new();
        for line_idx in start.0..=end.0 {
            let Some(line) = self.content_lines.get(line_idx) else {
                break;
            };
            let char_count = line.chars().count();
            let from = if line_idx == start.0 { start.1 } else { 0 };
            let to = if line_idx == end.0 {
                end.1.min(char_count.saturating_sub(1))
            } else {
                char_count.saturating_sub(1)
            };
            if char_count == 0 || from > to {
                parts.push(String::new());
                continue;
            }
            parts.push(line.chars().skip(from).take(to - from + 1).collect());
        }
        parts.join("\n")
    }

    /// Map absolute screen coordinates to a (line, column) offset into the
    /// wrapped content, if they fall inside the content pane.
    fn content_point(&self, x: u16, y: u16) -> Option<(usize, usize)> {
        let area = self.content_area?;
        if x < area.x || x >= area.x + area.width || y < area.y || y >= area.y + area.height {
            return None;
        }
        Some(self.point_at(area, x, y))
    }

    /// Same, but clamping coordinates into the pane so drags past the edge
    /// keep extending the selection.
    fn content_point_clamped(&self, x: u16, y: u16) -> Option<(usize, usize)> {
        let area = self.content_area?;
        if area.width == 0 || area.height == 0 {
            return None;
        }
        let x = x.clamp(area.x, area.x + area.width - 1);
        let y = y.clamp(area.y, area.y + area.height - 1);
        Some(self.point_at(area, x, y))
    }

    fn point_at(&self, area: Rect, x: u16, y: u16) -> (usize, usize) {
        let line = (self.content_scroll + (y - area.y)) as usize;
        let line = line.min(self.content_lines.len().saturating_sub(1));
        let col = (x - area.x) as usize;
        let col = col.min(
            self.content_lines
                .get(line)
                .map(|l| l.chars().count().saturating_sub(1))
                .unwrap_or(0),
        );
        (line, col)
    }
}

fn order_points(a: (usize, usize), b: (usize, usize)) -> ((usize, usize), (usize, usize)) {
    if (a.0, a.1) <= (b.0, b.1) {
        (a, b)
    } else {
        (b, a)
    }
}
