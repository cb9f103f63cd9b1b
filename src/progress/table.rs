use std::io::{self, Write};

use super::store::ProgressRow;
use crate::calc;

const HEADERS: [&str; 8] = [
    "Stream id",
    "Height",
    "Current Timestamp",
    "Lag",
    "Avg Speed",
    "Speed",
    "Processed",
    "Remaining",
];

/// Right-aligned columns (numeric values).
const RIGHT_ALIGNED: [bool; 8] = [false, true, false, true, true, true, true, true];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receives each snapshot produced by the aggregator loop.
pub trait ProgressRenderer: Send {
    /// Redraws the whole table from `rows`.
    fn render(&mut self, rows: &[ProgressRow]) -> io::Result<()>;
}

/// Writes snapshots as a rounded box table.
///
/// Each snapshot is formatted in memory and emitted with a single
/// `write_all`, so readers never see half a table.
pub struct TableRenderer<W> {
    out: W,
}

impl<W: Write + Send> TableRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> ProgressRenderer for TableRenderer<W> {
    fn render(&mut self, rows: &[ProgressRow]) -> io::Result<()> {
        let table = render_table(rows);
        self.out.write_all(table.as_bytes())?;
        self.out.flush()
    }
}

fn row_cells(row: &ProgressRow) -> [String; 8] {
    [
        row.stream_id.clone(),
        row.height.to_string(),
        row.event_time.format(TIMESTAMP_FORMAT).to_string(),
        calc::format_duration(row.lag),
        format!("{:.2}", row.avg_speed),
        format!("{:.2}", row.window_speed),
        row.percent.clone(),
        row.eta.to_string(),
    ]
}

/// Formats rows into a complete table, header included.
pub fn render_table(rows: &[ProgressRow]) -> String {
    let header: [String; 8] = HEADERS.map(str::to_uppercase);
    let body: Vec<[String; 8]> = rows.iter().map(row_cells).collect();

    let mut widths = header.each_ref().map(|h| h.chars().count());
    for cells in &body {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_rule(&mut out, &widths, '╭', '┬', '╮');
    push_cells(&mut out, &widths, &header, &[false; 8]);
    push_rule(&mut out, &widths, '├', '┼', '┤');
    for cells in &body {
        push_cells(&mut out, &widths, cells, &RIGHT_ALIGNED);
    }
    push_rule(&mut out, &widths, '╰', '┴', '╯');
    out
}

fn push_rule(out: &mut String, widths: &[usize; 8], left: char, mid: char, right: char) {
    out.push(left);
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            out.push(mid);
        }
        out.extend(std::iter::repeat('─').take(width + 2));
    }
    out.push(right);
    out.push('\n');
}

fn push_cells(out: &mut String, widths: &[usize; 8], cells: &[String; 8], right: &[bool; 8]) {
    out.push('│');
    for ((cell, width), right) in cells.iter().zip(widths).zip(right) {
        let pad = width - cell.chars().count();
        out.push(' ');
        if *right {
            out.extend(std::iter::repeat(' ').take(pad));
            out.push_str(cell);
        } else {
            out.push_str(cell);
            out.extend(std::iter::repeat(' ').take(pad));
        }
        out.push_str(" │");
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::calc::Eta;

    fn row(stream_id: &str, height: i64) -> ProgressRow {
        ProgressRow {
            stream_id: stream_id.to_string(),
            height,
            event_time: Utc
                .with_ymd_and_hms(2024, 3, 1, 12, 30, 5)
                .single()
                .expect("valid time"),
            lag: Duration::from_secs(65),
            avg_speed: 12.346,
            window_speed: 3.0,
            percent: "42.00%".to_string(),
            eta: Eta::Remaining(Duration::from_secs(3600)),
        }
    }

    #[test]
    fn test_render_table_contents() {
        let table = render_table(&[row("stream-a", 1234)]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with('╭'));
        assert!(lines[1].contains("STREAM ID"));
        assert!(lines[1].contains("REMAINING"));
        assert!(lines[3].contains("stream-a"));
        assert!(lines[3].contains("1234"));
        assert!(lines[3].contains("2024-03-01 12:30:05"));
        assert!(lines[3].contains("00:01:05"));
        assert!(lines[3].contains("12.35"));
        assert!(lines[3].contains("42.00%"));
        assert!(lines[3].contains("01:00:00"));
        assert!(lines[4].starts_with('╰'));
    }

    #[test]
    fn test_render_table_lines_have_equal_width() {
        let table = render_table(&[row("a", 1), row("a-much-longer-stream-id", 99_999_999)]);
        let widths: Vec<usize> = table.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]), "widths={widths:?}");
    }

    #[test]
    fn test_render_table_empty() {
        let table = render_table(&[]);
        assert_eq!(table.lines().count(), 4);
    }

    #[test]
    fn test_table_renderer_single_write() {
        let mut renderer = TableRenderer::new(Vec::new());
        renderer.render(&[row("s1", 1)]).expect("render");
        renderer.render(&[row("s1", 2)]).expect("render");

        let out = String::from_utf8(renderer.into_inner()).expect("utf8");
        assert_eq!(out.matches('╭').count(), 2);
    }
}
