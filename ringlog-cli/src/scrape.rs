//! Status page scraping.
//!
//! Modem status pages are old table-layout HTML. Rather than follow a full
//! selector path, the page is reduced to its leaf tables (tables with no
//! nested table) in document order, each a list of rows of cell texts. The
//! channel tables are picked out by index.

use ringlog::error::CollectorError;
use ringlog::sample::{SampleBatch, SampleBatchBuilder};
use tracing::warn;

use crate::config::{downstream_power, downstream_snr, upstream_power};

/// Rows of cell texts.
pub type Table = Vec<Vec<String>>;

/// Where the channel tables sit among the page's leaf tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    /// Leaf-table index of the downstream table.
    pub downstream_table: usize,
    /// Downstream channel rows read after the header row.
    pub downstream_channels: u32,
    /// Leaf-table index of the upstream table.
    pub upstream_table: usize,
    /// Upstream channel rows read after the header row.
    pub upstream_channels: u32,
}

/// Turns a status page into a batch stamped `timestamp`.
///
/// Downstream rows carry power in column 1 and SNR in column 2; upstream
/// rows carry power in column 1. Unreadable cells are left out of the batch.
pub fn parse_status_page(
    html: &str,
    layout: &TableLayout,
    timestamp: u64,
) -> Result<SampleBatch, CollectorError> {
    let tables = leaf_tables(html);
    let mut batch = SampleBatch::builder(timestamp);

    if layout.downstream_channels > 0 {
        let table = channel_table(&tables, layout.downstream_table, "downstream")?;
        for ch in 1..=layout.downstream_channels {
            read_cell(&mut batch, table, ch, 1, downstream_power(ch));
            read_cell(&mut batch, table, ch, 2, downstream_snr(ch));
        }
    }

    if layout.upstream_channels > 0 {
        let table = channel_table(&tables, layout.upstream_table, "upstream")?;
        for ch in 1..=layout.upstream_channels {
            read_cell(&mut batch, table, ch, 1, upstream_power(ch));
        }
    }

    Ok(batch.build()?)
}

fn channel_table<'a>(
    tables: &'a [Table],
    index: usize,
    direction: &str,
) -> Result<&'a Table, CollectorError> {
    tables.get(index).ok_or_else(|| CollectorError::Parse {
        reason: format!(
            "{direction} table {index} not found ({} leaf tables on page)",
            tables.len()
        ),
    })
}

fn read_cell(
    batch: &mut SampleBatchBuilder,
    table: &Table,
    row: u32,
    column: usize,
    source: String,
) {
    let cell = usize::try_from(row)
        .ok()
        .and_then(|r| table.get(r))
        .and_then(|cells| cells.get(column));
    match cell.and_then(|text| first_number(text)) {
        Some(value) => batch.push(source, value),
        None => warn!(%source, row, column, cell = ?cell, "unreadable cell, reading left unknown"),
    }
}

/// Extracts every leaf table of `html` in document order.
pub fn leaf_tables(html: &str) -> Vec<Table> {
    struct Frame {
        rows: Table,
        row: Option<Vec<String>>,
        cell: Option<String>,
        nested: bool,
    }

    impl Frame {
        fn close_cell(&mut self) {
            if let Some(cell) = self.cell.take() {
                let text = collapse_whitespace(&decode_entities(&cell));
                self.row.get_or_insert_with(Vec::new).push(text);
            }
        }

        fn close_row(&mut self) {
            self.close_cell();
            if let Some(row) = self.row.take() {
                self.rows.push(row);
            }
        }
    }

    let mut stack: Vec<Frame> = Vec::new();
    let mut tables = Vec::new();
    let mut rest = html;

    while !rest.is_empty() {
        let Some(open) = rest.find('<') else {
            append_text(stack.last_mut().and_then(|f| f.cell.as_mut()), rest);
            break;
        };
        append_text(stack.last_mut().and_then(|f| f.cell.as_mut()), &rest[..open]);
        rest = &rest[open..];

        if let Some(comment) = rest.strip_prefix("<!--") {
            rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
            continue;
        }

        let Some(close) = rest.find('>') else {
            break;
        };
        let tag = &rest[1..close];
        rest = &rest[close + 1..];

        let (closing, name) = match tag.strip_prefix('/') {
            Some(name) => (true, tag_name(name)),
            None => (false, tag_name(tag)),
        };

        match (closing, name.as_str()) {
            (false, "script" | "style") => {
                let end = format!("</{name}");
                rest = find_ignore_case(rest, &end).map_or("", |i| &rest[i..]);
            }
            (false, "table") => {
                if let Some(parent) = stack.last_mut() {
                    parent.nested = true;
                }
                stack.push(Frame {
                    rows: Vec::new(),
                    row: None,
                    cell: None,
                    nested: false,
                });
            }
            (true, "table") => {
                if let Some(mut frame) = stack.pop() {
                    frame.close_row();
                    if !frame.nested {
                        tables.push(frame.rows);
                    }
                }
            }
            (_, "tr") => {
                if let Some(frame) = stack.last_mut() {
                    frame.close_row();
                    if !closing {
                        frame.row = Some(Vec::new());
                    }
                }
            }
            (false, "td" | "th") => {
                if let Some(frame) = stack.last_mut() {
                    frame.close_cell();
                    frame.cell = Some(String::new());
                }
            }
            (true, "td" | "th") => {
                if let Some(frame) = stack.last_mut() {
                    frame.close_cell();
                }
            }
            (false, "br") => append_text(stack.last_mut().and_then(|f| f.cell.as_mut()), " "),
            _ => {}
        }
    }

    tables
}

fn append_text(cell: Option<&mut String>, text: &str) {
    if let Some(cell) = cell {
        cell.push_str(text);
    }
}

fn tag_name(tag: &str) -> String {
    tag.trim_start()
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

/// Decodes the character references status pages actually use.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "nbsp" => Some(' '),
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity.strip_prefix('#').and_then(|code| {
                    let value = match code.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => code.parse().ok(),
                    };
                    value.and_then(char::from_u32)
                }),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((ch, end)) => {
                out.push(if ch == '\u{a0}' { ' ' } else { ch });
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Trims and folds every whitespace run into one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The first number in `text`: `"-3.2 dBmV"` reads as `-3.2`.
pub fn first_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let start = (0..bytes.len()).find(|&i| {
        let digit_at = |j: usize| bytes.get(j).is_some_and(u8::is_ascii_digit);
        match bytes[i] {
            b'0'..=b'9' => true,
            b'-' | b'+' => digit_at(i + 1) || (bytes.get(i + 1) == Some(&b'.') && digit_at(i + 2)),
            b'.' => digit_at(i + 1),
            _ => false,
        }
    })?;

    let mut end = start + 1;
    let mut seen_dot = bytes[start] == b'.';
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => {}
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    text[start..end].parse().ok()
}
