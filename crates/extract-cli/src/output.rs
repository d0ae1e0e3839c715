use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Print aligned columns. Widths count characters, so accented labels line up.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<String>| {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| pad(cell, widths.get(i).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.iter().map(|h| h.to_string()).collect()));
    println!(
        "{}",
        widths.iter().map(|&w| "-".repeat(w)).collect::<Vec<_>>().join("  ")
    );
    for row in rows {
        println!("{}", line(row));
    }
}

fn pad(cell: &str, width: usize) -> String {
    let len = cell.chars().count();
    format!("{cell}{}", " ".repeat(width.saturating_sub(len)))
}

/// `Some(x)` as text, `-` otherwise.
pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_counts_characters() {
        assert_eq!(pad("Dépôt", 7), "Dépôt  ");
        assert_eq!(pad("long value", 3), "long value");
    }

    #[test]
    fn dash_for_missing() {
        assert_eq!(or_dash(None::<u64>), "-");
        assert_eq!(or_dash(Some(4)), "4");
    }
}
