//! Table and text layout helpers used by the CLI.
//! Width calculations ignore ANSI color codes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// Render a text table. Column widths come from the widest cell (header or
/// row); `aligns` defaults to left for columns it does not cover.
pub fn render_table(headers: &[String], aligns: &[Align], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| display_len(h)).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(cols) {
            widths[i] = widths[i].max(display_len(cell));
        }
    }

    let header_line = format_row(headers, &widths, &[]);
    let mut out = header_line.clone();
    out.push('\n');
    out.push_str(&"-".repeat(display_len(&header_line)));
    for row in rows {
        out.push('\n');
        out.push_str(&format_row(row, &widths, aligns));
    }
    out
}

fn format_row(row: &[String], widths: &[usize], aligns: &[Align]) -> String {
    let parts: Vec<String> = row
        .iter()
        .zip(widths.iter())
        .enumerate()
        .map(|(i, (cell, width))| {
            let align = aligns.get(i).copied().unwrap_or(Align::Left);
            pad_field(cell, *width, align)
        })
        .collect();
    parts.join("  ").trim_end().to_string()
}

/// Pad a field to `target` visible columns.
pub fn pad_field(display: &str, target: usize, align: Align) -> String {
    let padding = " ".repeat(target.saturating_sub(display_len(display)));
    match align {
        Align::Left => format!("{display}{padding}"),
        Align::Right => format!("{padding}{display}"),
    }
}

/// Truncate text to a width, appending an ellipsis when needed.
pub fn truncate_with_ellipsis(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    let len = text.chars().count();
    if len <= max_width {
        return text.to_string();
    }
    if max_width == 1 {
        return "…".to_string();
    }
    let mut out =
        text.chars().take(max_width.saturating_sub(1)).collect::<String>();
    out.push('…');
    out
}

/// Compute visible length of a string, ignoring ANSI escape sequences.
pub fn display_len(s: &str) -> usize {
    let mut len = 0;
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
            continue;
        }
        len += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_len_skips_ansi() {
        assert_eq!(display_len("\x1b[1mWork\x1b[0m"), 4);
        assert_eq!(display_len("Urgent"), 6);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate_with_ellipsis("Invoices", 5), "Invo…");
        assert_eq!(truncate_with_ellipsis("Work", 10), "Work");
        assert_eq!(truncate_with_ellipsis("Work", 1), "…");
        assert_eq!(truncate_with_ellipsis("Work", 0), "");
    }

    #[test]
    fn test_render_table_alignment() {
        let headers = vec!["Name".to_string(), "Notes".to_string()];
        let rows = vec![
            vec!["Work".to_string(), "12".to_string()],
            vec!["Urgent".to_string(), "3".to_string()],
        ];
        let out = render_table(&headers, &[Align::Left, Align::Right], &rows);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Name    Notes");
        assert_eq!(lines[1], "-------------");
        assert_eq!(lines[2], "Work       12");
        assert_eq!(lines[3], "Urgent      3");
    }
}
