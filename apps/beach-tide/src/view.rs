use crossterm::tty::IsTty;
use crossterm::{cursor, queue, style, terminal};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use unicode_width::UnicodeWidthStr;

use crate::buffer::LogBuffer;
use crate::collapse::MergeOutcome;
use crate::persistence::ViewportState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    /// The buffer was swapped out wholesale.
    Replaced,
    Merged(MergeOutcome),
}

/// Displays the log buffer. Implementations never mutate it.
pub trait LogView {
    fn present(&mut self, buffer: &LogBuffer, change: ViewChange) -> io::Result<()>;
    fn scroll_to_bottom(&mut self) -> io::Result<()>;
    fn viewport(&self) -> ViewportState;
    fn restore_viewport(&mut self, viewport: ViewportState);

    /// A line typed on the controlling terminal was echoed below the output.
    fn note_input(&mut self) {}
}

/// Rows kept for in-place rewrites. Anything older has scrolled away.
const PRINTED_HISTORY: usize = 1024;

/// One printed entry and the number of terminal rows it took.
#[derive(Debug, Clone, Copy)]
struct Printed {
    index: Option<usize>,
    rows: usize,
}

/// Streams the buffer to a terminal.
///
/// On a TTY an in-place progress update rewrites the existing row when its
/// position can be computed from the terminal width; otherwise the updated
/// line is appended. In plain mode progress ticks are skipped and only
/// appended lines are written.
pub struct TerminalView<W: Write> {
    out: W,
    tty: bool,
    size: Option<(u16, u16)>,
    printed: Vec<Printed>,
    shown: usize,
    height: u16,
    resume_offset: usize,
}

impl TerminalView<io::Stdout> {
    pub fn stdout() -> Self {
        let out = io::stdout();
        let tty = out.is_tty();
        Self::new(out, tty)
    }
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W, tty: bool) -> Self {
        Self {
            out,
            tty,
            size: None,
            printed: Vec::new(),
            shown: 0,
            height: 0,
            resume_offset: 0,
        }
    }

    /// A TTY view with a fixed `columns` x `rows` size.
    pub fn with_size(out: W, columns: u16, rows: u16) -> Self {
        let mut view = Self::new(out, true);
        view.size = Some((columns, rows));
        view
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn dimensions(&self) -> Option<(u16, u16)> {
        let size = match self.size {
            Some(size) => Some(size),
            None if self.tty => terminal::size().ok(),
            None => None,
        };
        size.filter(|&(columns, rows)| columns > 0 && rows > 0)
    }

    fn print_line(&mut self, index: usize, line: &str) -> io::Result<()> {
        queue!(self.out, style::Print(line), style::Print("\n"))?;
        if !self.tty {
            return Ok(());
        }
        let rows = self
            .dimensions()
            .map_or(1, |(columns, _)| rows_for(line, columns));
        self.track(Printed {
            index: Some(index),
            rows,
        });
        Ok(())
    }

    fn track(&mut self, entry: Printed) {
        if self.printed.len() == PRINTED_HISTORY {
            self.printed.remove(0);
        }
        self.printed.push(entry);
    }

    fn redraw(&mut self, buffer: &LogBuffer) -> io::Result<()> {
        if self.shown > 0 && self.tty {
            queue!(
                self.out,
                terminal::Clear(terminal::ClearType::All),
                cursor::MoveTo(0, 0)
            )?;
        }
        self.printed.clear();
        // Lines from an earlier run in this session may still be on screen.
        let resume = std::mem::take(&mut self.resume_offset);
        let start = if self.shown == 0 && resume <= buffer.len() {
            resume
        } else {
            0
        };
        for (index, line) in buffer.lines().iter().enumerate().skip(start) {
            self.print_line(index, line)?;
        }
        self.shown = buffer.len();
        Ok(())
    }

    fn apply(&mut self, buffer: &LogBuffer, outcome: MergeOutcome) -> io::Result<()> {
        if let (Some(index), true) = (outcome.replaced, self.tty) {
            if let Some(line) = buffer.get(index) {
                if !self.rewrite_in_place(index, line)? {
                    self.print_line(index, line)?;
                }
            }
        }
        let first_new = buffer.len().saturating_sub(outcome.appended);
        for (index, line) in buffer.lines().iter().enumerate().skip(first_new) {
            self.print_line(index, line)?;
        }
        self.shown = buffer.len();
        Ok(())
    }

    /// Rewrites the row of `index` if it is a single row still on screen.
    fn rewrite_in_place(&mut self, index: usize, line: &str) -> io::Result<bool> {
        let Some((columns, rows)) = self.dimensions() else {
            return Ok(false);
        };
        if rows_for(line, columns) != 1 {
            return Ok(false);
        }
        let mut up = 0;
        let mut found = false;
        for entry in self.printed.iter().rev() {
            up += entry.rows;
            if entry.index == Some(index) {
                found = entry.rows == 1;
                break;
            }
        }
        if !found || up >= usize::from(rows) {
            return Ok(false);
        }
        let Ok(up) = u16::try_from(up) else {
            return Ok(false);
        };
        queue!(
            self.out,
            cursor::MoveToPreviousLine(up),
            terminal::Clear(terminal::ClearType::CurrentLine),
            style::Print(line),
            cursor::MoveToNextLine(up)
        )?;
        Ok(true)
    }
}

/// Terminal rows a printed line occupies once wrapped.
fn rows_for(line: &str, columns: u16) -> usize {
    UnicodeWidthStr::width(line)
        .div_ceil(usize::from(columns))
        .max(1)
}

impl<W: Write> LogView for TerminalView<W> {
    fn present(&mut self, buffer: &LogBuffer, change: ViewChange) -> io::Result<()> {
        match change {
            ViewChange::Replaced => self.redraw(buffer)?,
            ViewChange::Merged(outcome) => self.apply(buffer, outcome)?,
        }
        self.out.flush()
    }

    fn scroll_to_bottom(&mut self) -> io::Result<()> {
        // New output is always written at the bottom of a terminal.
        Ok(())
    }

    fn viewport(&self) -> ViewportState {
        let height = self.dimensions().map_or(self.height, |(_, rows)| rows);
        ViewportState {
            height,
            scroll_offset: self.shown,
        }
    }

    fn restore_viewport(&mut self, viewport: ViewportState) {
        self.height = viewport.height;
        self.resume_offset = viewport.scroll_offset;
    }

    fn note_input(&mut self) {
        if self.tty {
            self.track(Printed {
                index: None,
                rows: 1,
            });
        }
    }
}

/// Records what the session asked to display.
#[derive(Debug, Clone, Default)]
pub struct MemoryView {
    state: Arc<Mutex<MemoryViewState>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryViewState {
    pub text: String,
    pub changes: Vec<ViewChange>,
    pub scrolls: usize,
    pub restored: Option<ViewportState>,
    pub inputs: usize,
}

impl MemoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MemoryViewState {
        self.state.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        self.state.lock().unwrap().text.clone()
    }
}

impl LogView for MemoryView {
    fn present(&mut self, buffer: &LogBuffer, change: ViewChange) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.text = buffer.render();
        state.changes.push(change);
        Ok(())
    }

    fn scroll_to_bottom(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().scrolls += 1;
        Ok(())
    }

    fn viewport(&self) -> ViewportState {
        let state = self.state.lock().unwrap();
        ViewportState {
            height: 24,
            scroll_offset: state.text.lines().count(),
        }
    }

    fn restore_viewport(&mut self, viewport: ViewportState) {
        self.state.lock().unwrap().restored = Some(viewport);
    }

    fn note_input(&mut self) {
        self.state.lock().unwrap().inputs += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ProgressCursor;
    use crate::collapse::{ProgressClassifier, merge_batch};

    fn plain_output(view: TerminalView<Vec<u8>>) -> String {
        String::from_utf8(view.into_inner()).unwrap()
    }

    #[test]
    fn plain_view_appends_and_skips_progress_ticks() {
        let mut view = TerminalView::new(Vec::new(), false);
        let mut buffer = LogBuffer::from_text("a\n1MB/s\n");
        let mut cursor = ProgressCursor::unset();
        view.present(&buffer, ViewChange::Replaced).unwrap();

        let classifier = ProgressClassifier::default();
        let tick = merge_batch(&mut buffer, &mut cursor, "2MB/s", &classifier).unwrap();
        view.present(&buffer, ViewChange::Merged(tick)).unwrap();
        let done = merge_batch(&mut buffer, &mut cursor, "done", &classifier).unwrap();
        view.present(&buffer, ViewChange::Merged(done)).unwrap();

        assert_eq!(plain_output(view), "a\n1MB/s\ndone\n");
    }

    fn tick(
        view: &mut TerminalView<Vec<u8>>,
        buffer: &mut LogBuffer,
        cursor: &mut ProgressCursor,
    ) {
        let outcome =
            merge_batch(buffer, cursor, "2MB/s", &ProgressClassifier::default()).unwrap();
        view.present(buffer, ViewChange::Merged(outcome)).unwrap();
    }

    #[test]
    fn tty_view_rewrites_progress_row_in_place() {
        let mut view = TerminalView::with_size(Vec::new(), 80, 24);
        let mut buffer = LogBuffer::from_text("a\n1MB/s\n");
        let mut cursor = ProgressCursor::unset();
        view.present(&buffer, ViewChange::Replaced).unwrap();

        tick(&mut view, &mut buffer, &mut cursor);

        let out = plain_output(view);
        assert!(out.starts_with("a\n1MB/s\n"));
        assert!(out.ends_with("2MB/s\x1b[1E"), "unexpected output {out:?}");
        assert_eq!(out.matches('\n').count(), 2);
    }

    #[test]
    fn rewrite_counts_wrapped_rows_below_the_progress_line() {
        let mut view = TerminalView::with_size(Vec::new(), 80, 24);
        let wide = "x".repeat(300);
        let mut buffer = LogBuffer::from_text(&format!("a\n1MB/s\n{wide}\n"));
        let mut cursor = ProgressCursor::at(1);
        view.present(&buffer, ViewChange::Replaced).unwrap();

        tick(&mut view, &mut buffer, &mut cursor);

        assert_eq!(buffer.lines()[1], "2MB/s");
        let out = plain_output(view);
        assert!(
            out.ends_with(&format!("{wide}\n\x1b[5F\x1b[2K2MB/s\x1b[5E")),
            "unexpected output {out:?}"
        );
    }

    #[test]
    fn typed_input_rows_are_skipped_when_rewriting() {
        let mut view = TerminalView::with_size(Vec::new(), 80, 24);
        let mut buffer = LogBuffer::from_text("a\n1MB/s\n");
        let mut cursor = ProgressCursor::at(1);
        view.present(&buffer, ViewChange::Replaced).unwrap();
        view.note_input();

        tick(&mut view, &mut buffer, &mut cursor);

        let out = plain_output(view);
        assert!(
            out.ends_with("\x1b[2F\x1b[2K2MB/s\x1b[2E"),
            "unexpected output {out:?}"
        );
    }

    #[test]
    fn wrapped_progress_line_is_appended_instead() {
        let mut view = TerminalView::with_size(Vec::new(), 10, 24);
        let mut buffer = LogBuffer::from_text("a\ndownloading 1MB/s\n");
        let mut cursor = ProgressCursor::at(1);
        view.present(&buffer, ViewChange::Replaced).unwrap();

        tick(&mut view, &mut buffer, &mut cursor);

        let out = plain_output(view);
        assert_eq!(out, "a\ndownloading 1MB/s\n2MB/s\n");
    }

    #[test]
    fn progress_row_scrolled_off_screen_is_appended_instead() {
        let mut view = TerminalView::with_size(Vec::new(), 80, 3);
        let mut buffer = LogBuffer::from_text("1MB/s\nb\nc\nd\n");
        let mut cursor = ProgressCursor::at(0);
        view.present(&buffer, ViewChange::Replaced).unwrap();

        tick(&mut view, &mut buffer, &mut cursor);

        let out = plain_output(view);
        assert_eq!(out, "1MB/s\nb\nc\nd\n2MB/s\n");
        assert!(!out.contains('\x1b'));
    }

    #[test]
    fn restored_offset_skips_lines_already_on_screen() {
        let mut view = TerminalView::new(Vec::new(), false);
        view.restore_viewport(ViewportState {
            height: 30,
            scroll_offset: 2,
        });
        let buffer = LogBuffer::from_text("a\nb\nc\n");
        view.present(&buffer, ViewChange::Replaced).unwrap();
        assert_eq!(view.viewport().scroll_offset, 3);
        assert_eq!(plain_output(view), "c\n");
    }

    #[test]
    fn restored_offset_past_end_redraws_everything() {
        let mut view = TerminalView::new(Vec::new(), false);
        view.restore_viewport(ViewportState {
            height: 30,
            scroll_offset: 10,
        });
        let buffer = LogBuffer::placeholder("Cleared logs.");
        view.present(&buffer, ViewChange::Replaced).unwrap();
        assert_eq!(plain_output(view), "Cleared logs.\n");
    }
}
