use std::collections::VecDeque;

/// Most lines kept in memory
pub const MAX_BUFFER_LINES: usize = 10_000;

/// Lines shown after a full reload
pub const INITIAL_DISPLAY_LINES: usize = 100;

/// Lines revealed per "load more"
pub const LOAD_MORE_LINES: usize = 200;

/// Size limits for a [`LogBuffer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLimits {
    pub max_lines: usize,
    pub initial_display: usize,
    pub load_more: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            max_lines: MAX_BUFFER_LINES,
            initial_display: INITIAL_DISPLAY_LINES,
            load_more: LOAD_MORE_LINES,
        }
    }
}

/// Capacity-bounded line buffer with a visible window at its tail
///
/// Only `lines[visible_from..]` is meant to be rendered. While the viewer is
/// stuck to the bottom, appends keep the window size constant; otherwise the
/// window start stays on the same line (shifted only when old lines are
/// evicted).
#[derive(Clone, Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,

    /// Start of the rendered window, `0..=lines.len()`
    visible_from: usize,

    stick_to_bottom: bool,

    limits: BufferLimits,

    /// Bumped on every change that can alter what is visible
    generation: u64,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(BufferLimits::default())
    }
}

impl LogBuffer {
    pub fn new(limits: BufferLimits) -> Self {
        let limits = BufferLimits {
            max_lines: limits.max_lines.max(1),
            ..limits
        };
        Self {
            lines: VecDeque::new(),
            visible_from: 0,
            stick_to_bottom: true,
            limits,
            generation: 0,
        }
    }

    /// Replace the contents (full reload) and show the initial window at the bottom
    pub fn replace(&mut self, lines: Vec<String>) {
        let skip = lines.len().saturating_sub(self.limits.max_lines);
        self.lines = lines.into_iter().skip(skip).collect();
        self.visible_from = self.lines.len().saturating_sub(self.limits.initial_display);
        self.stick_to_bottom = true;
        self.generation += 1;
    }

    /// Append newer lines, evicting the oldest past capacity.
    ///
    /// Returns how many lines were evicted.
    pub fn append(&mut self, lines: Vec<String>) -> usize {
        if lines.is_empty() {
            return 0;
        }

        let window = match self.window_len() {
            0 => self.limits.initial_display,
            n => n,
        };

        self.lines.extend(lines);
        let dropped = self.lines.len().saturating_sub(self.limits.max_lines);
        self.lines.drain(..dropped);

        self.visible_from = if self.stick_to_bottom {
            self.lines.len().saturating_sub(window)
        } else {
            self.visible_from.saturating_sub(dropped)
        };
        self.generation += 1;
        dropped
    }

    /// Reveal up to `count` earlier lines; returns how many were revealed
    pub fn load_more(&mut self, count: usize) -> usize {
        let revealed = count.min(self.visible_from);
        if revealed > 0 {
            self.visible_from -= revealed;
            self.generation += 1;
        }
        revealed
    }

    /// Reveal the configured "load more" step
    pub fn load_more_step(&mut self) -> usize {
        self.load_more(self.limits.load_more)
    }

    pub fn set_stick_to_bottom(&mut self, stick: bool) {
        self.stick_to_bottom = stick;
    }

    pub fn is_stuck_to_bottom(&self) -> bool {
        self.stick_to_bottom
    }

    pub fn visible_from(&self) -> usize {
        self.visible_from
    }

    /// Number of lines in the rendered window
    pub fn window_len(&self) -> usize {
        self.lines.len() - self.visible_from
    }

    /// Whether earlier lines are buffered but not shown
    pub fn has_more_above(&self) -> bool {
        self.visible_from > 0
    }

    /// Lines in the rendered window
    pub fn visible(&self) -> impl Iterator<Item = &str> {
        self.lines.range(self.visible_from..).map(String::as_str)
    }

    /// Every buffered line, oldest first
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn limits(&self) -> BufferLimits {
        self.limits
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Export all buffered lines
    pub fn export_raw(&self) -> String {
        self.all().collect::<Vec<_>>().join("\n")
    }

    /// Clear all lines
    pub fn clear(&mut self) {
        self.lines.clear();
        self.visible_from = 0;
        self.stick_to_bottom = true;
        self.generation += 1;
    }
}
