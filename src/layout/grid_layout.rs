use std::ops::Range;

use crate::config::GridConfig;

/// A contiguous, row-aligned slice of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderWindow {
    pub start_index: usize,
    pub end_index: usize,
    pub start_row: usize,
    pub end_row: usize,
}

impl RenderWindow {
    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.start_index == self.end_index
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && index < self.end_index
    }

    pub fn indices(&self) -> Range<usize> {
        self.start_index..self.end_index
    }
}

/// Absolute placement of one tile inside the scrollable content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Fixed-height column grid.
///
/// Every row is `item_height + gap` tall; tiles share the container width
/// evenly after subtracting the gaps between columns.
#[derive(Debug, Clone)]
pub struct GridLayout {
    pub columns: usize,
    pub item_height: f32,
    pub gap: f32,
    pub buffer_rows: usize,
    /// Width available to the grid (excludes scrollbars).
    pub container_width: f32,
}

impl GridLayout {
    pub fn from_config(config: &GridConfig) -> Self {
        Self {
            columns: config.columns.max(1),
            item_height: config.item_height.max(1.0),
            gap: config.gap.max(0.0),
            buffer_rows: config.buffer_rows,
            container_width: 0.0,
        }
    }

    pub fn row_height(&self) -> f32 {
        self.item_height + self.gap
    }

    pub fn total_rows(&self, item_count: usize) -> usize {
        item_count.div_ceil(self.columns)
    }

    /// Total scrollable extent for `item_count` items.
    pub fn content_height(&self, item_count: usize) -> f32 {
        let rows = self.total_rows(item_count);
        if rows == 0 {
            return 0.0;
        }
        rows as f32 * self.row_height() - self.gap
    }

    pub fn item_width(&self) -> f32 {
        let gaps = self.gap * (self.columns.saturating_sub(1)) as f32;
        ((self.container_width - gaps) / self.columns as f32).max(0.0)
    }

    pub fn item_rect(&self, index: usize) -> ItemRect {
        let row = index / self.columns;
        let col = index % self.columns;
        let item_width = self.item_width();
        ItemRect {
            x: col as f32 * (item_width + self.gap),
            y: row as f32 * self.row_height(),
            width: item_width,
            height: self.item_height,
        }
    }

    /// Rows to materialize: the viewport plus `buffer_rows` on each side.
    ///
    /// The window always starts on a row boundary and never holds more than
    /// `(visible_rows + 2 * buffer_rows) * columns` items.
    pub fn compute_visible_range(
        &self,
        item_count: usize,
        scroll_top: f32,
        viewport_height: f32,
    ) -> RenderWindow {
        let row_height = self.row_height();
        let total_rows = self.total_rows(item_count);

        let first_row = (scroll_top.max(0.0) / row_height).floor() as usize;
        let start_row = first_row.saturating_sub(self.buffer_rows).min(total_rows);
        let visible_rows = (viewport_height.max(0.0) / row_height).ceil() as usize;
        let end_row = total_rows.min(start_row + visible_rows + 2 * self.buffer_rows);

        self.window_for_rows(start_row, end_row, item_count)
    }

    /// Rows that actually intersect the viewport, without any buffer.
    pub fn compute_viewport_range(
        &self,
        item_count: usize,
        scroll_top: f32,
        viewport_height: f32,
    ) -> RenderWindow {
        let row_height = self.row_height();
        let total_rows = self.total_rows(item_count);
        let top = scroll_top.max(0.0);

        let start_row = ((top / row_height).floor() as usize).min(total_rows);
        let bottom = top + viewport_height.max(0.0);
        let end_row = ((bottom / row_height).ceil() as usize).clamp(start_row, total_rows);

        self.window_for_rows(start_row, end_row, item_count)
    }

    fn window_for_rows(&self, start_row: usize, end_row: usize, item_count: usize) -> RenderWindow {
        let start_index = (start_row * self.columns).min(item_count);
        let end_index = (end_row * self.columns).min(item_count);
        RenderWindow {
            start_index,
            end_index,
            start_row,
            end_row,
        }
    }
}
