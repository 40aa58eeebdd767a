//! The editable surface a note is rendered into.
//!
//! Offsets are measured in `char`s of the serialized content.

/// A selection (or caret when `start == end`) inside the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn caret(at: usize) -> Self {
        Self { start: at, end: at }
    }

    /// Clamp both offsets into `[0, len]`.
    pub fn clamped(self, len: usize) -> Self {
        Self {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }
}

/// Live editable document owned by whichever view has the note open.
pub trait EditorSurface: Send {
    /// Full serialized content currently shown.
    fn content(&self) -> String;

    /// Replace the content wholesale. Implementations may drop the selection.
    fn replace_content(&mut self, content: &str);

    /// Current selection, if the surface has one.
    fn selection(&self) -> Option<Selection>;

    fn set_selection(&mut self, selection: Option<Selection>);

    /// Content length in the unit used by `Selection`.
    fn len(&self) -> usize {
        self.content().chars().count()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plain in-memory surface, used by the CLI and tests.
#[derive(Debug, Default, Clone)]
pub struct TextSurface {
    content: String,
    selection: Option<Selection>,
    replacements: usize,
}

impl TextSurface {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            selection: None,
            replacements: 0,
        }
    }

    /// Insert `text` at char offset `at` as a user would type it, leaving the
    /// caret after the inserted text.
    pub fn insert(&mut self, at: usize, text: &str) {
        let at = at.min(self.len());
        let byte = self
            .content
            .char_indices()
            .nth(at)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len());
        self.content.insert_str(byte, text);
        self.selection = Some(Selection::caret(at + text.chars().count()));
    }

    /// Append `text` at the end, as typing at the end of the document.
    pub fn type_text(&mut self, text: &str) {
        let end = self.len();
        self.insert(end, text);
    }

    /// Overwrite the content as the user would (select all + type).
    pub fn set_text(&mut self, text: &str) {
        self.content = text.to_string();
        self.selection = Some(Selection::caret(self.len()));
    }

    /// Number of wholesale replacements performed through `replace_content`.
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl EditorSurface for TextSurface {
    fn content(&self) -> String {
        self.content.clone()
    }

    fn replace_content(&mut self, content: &str) {
        self.content = content.to_string();
        self.selection = None;
        self.replacements += 1;
    }

    fn selection(&self) -> Option<Selection> {
        self.selection
    }

    fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
    }
}
