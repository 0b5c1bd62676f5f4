/// Authoritative client-side copy of the server log.
///
/// Lines are kept in arrival order and are never empty. The rendered form is
/// always the lines joined by `\n` with a trailing `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBuffer {
    lines: Vec<String>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a buffer from raw log text, dropping blank fragments.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: split_fragments(text).map(str::to_owned).collect(),
        }
    }

    /// A buffer holding a single status line such as `Cleared logs.`.
    pub fn placeholder(text: &str) -> Self {
        Self {
            lines: vec![text.to_owned()],
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.lines.len().checked_sub(1)
    }

    pub fn push(&mut self, line: String) {
        debug_assert!(!line.is_empty(), "log buffer lines are never empty");
        self.lines.push(line);
    }

    /// Overwrite the line at `index`. Returns `false` when out of range.
    pub fn overwrite(&mut self, index: usize, line: String) -> bool {
        match self.lines.get_mut(index) {
            Some(slot) => {
                *slot = line;
                true
            }
            None => false,
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Split raw text into non-empty lines, tolerating `\r\n` endings.
pub fn split_fragments(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
}

/// Index of the line currently being rewritten by progress updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCursor(Option<usize>);

impl ProgressCursor {
    pub fn unset() -> Self {
        Self(None)
    }

    pub fn at(index: usize) -> Self {
        Self(Some(index))
    }

    pub fn index(self) -> Option<usize> {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0.is_some()
    }

    pub fn set(&mut self, index: usize) {
        self.0 = Some(index);
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

impl From<Option<usize>> for ProgressCursor {
    fn from(value: Option<usize>) -> Self {
        Self(value)
    }
}
