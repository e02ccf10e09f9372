//! A minimal fixed-width text table for human-mode command output. No
//! dependency on a terminal UI crate — the dispatcher's human mode is meant
//! to be `cat`-able and diffable, not interactive.

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.headers.len(), "row arity must match headers");
        self.rows.push(row);
    }

    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }

        let mut out = String::new();
        push_row_line(&mut out, &self.headers, &widths);
        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        push_row_line(&mut out, &separator, &widths);
        for row in &self.rows {
            push_row_line(&mut out, row, &widths);
        }
        out
    }
}

fn push_row_line(out: &mut String, cells: &[impl AsRef<str>], widths: &[usize]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{:<width$}", c.as_ref(), width = w))
        .collect();
    out.push_str(&padded.join("  "));
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_aligned_columns() {
        let mut table = Table::new(&["name", "state"]);
        table.push_row(vec!["gateway".to_string(), "closed".to_string()]);
        table.push_row(vec!["vector-store".to_string(), "open".to_string()]);
        let rendered = table.render();
        assert!(rendered.contains("name       state"));
        assert!(rendered.contains("vector-store  open"));
    }
}
