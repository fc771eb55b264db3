use sheetchat_engine::cell::Color;
use unicode_width::UnicodeWidthStr;

/// Display width of a string, accounting for CJK double-width, emoji, etc.
pub(crate) fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncate a string to fit within `width` display columns, adding ".." if truncated.
pub(crate) fn truncate_display(s: &str, width: usize) -> String {
    if width < 3 {
        for ch in s.chars() {
            let cw = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
            if cw <= width {
                return ch.to_string();
            }
        }
        return String::new();
    }

    if display_width(s) <= width {
        return s.to_string();
    }

    let budget = width - 2;
    let mut used = 0;
    let mut end_byte = 0;
    for (i, ch) in s.char_indices() {
        let cw = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + cw > budget {
            end_byte = i;
            break;
        }
        used += cw;
        end_byte = i + ch.len_utf8();
    }
    format!("{}..", &s[..end_byte])
}

/// Pad or truncate a string to exactly `width` display columns.
pub(crate) fn pad_right(s: &str, width: usize) -> String {
    let sw = display_width(s);
    if sw > width {
        truncate_display(s, width)
    } else {
        format!("{}{}", s, " ".repeat(width - sw))
    }
}

/// Convert column index to letter (0 -> A, 1 -> B, 26 -> AA, etc.)
pub(crate) fn col_to_letter(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Column letters to index (A -> 0, AA -> 26). Case-insensitive.
pub(crate) fn letter_to_col(letters: &str) -> Option<usize> {
    let letters = letters.trim();
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut n = 0usize;
    for c in letters.chars() {
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

/// `B3` -> (row 2, col 1), both 0-based.
pub(crate) fn parse_cell_ref(s: &str) -> Option<(usize, usize)> {
    let s = s.trim();
    let split = s.find(|c: char| c.is_ascii_digit())?;
    let col = letter_to_col(&s[..split])?;
    let row: usize = s[split..].parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col))
}

/// 1-based row number as typed by the user -> 0-based grid row.
pub(crate) fn parse_row_number(s: &str) -> Option<usize> {
    s.trim().parse::<usize>().ok().filter(|&n| n > 0).map(|n| n - 1)
}

/// A handful of names, or any hex form `Color::from_hex` accepts.
pub(crate) fn parse_color(s: &str) -> Option<Color> {
    match s.trim().to_ascii_lowercase().as_str() {
        "black" => Some(Color::BLACK),
        "white" => Some(Color::WHITE),
        "red" => Some(Color::rgb(0xFF, 0, 0)),
        "green" => Some(Color::rgb(0, 0x80, 0)),
        "blue" => Some(Color::rgb(0, 0, 0xFF)),
        "yellow" => Some(Color::rgb(0xFF, 0xFF, 0)),
        "orange" => Some(Color::rgb(0xFF, 0xA5, 0)),
        "gray" | "grey" => Some(Color::rgb(0x80, 0x80, 0x80)),
        other => Color::from_hex(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_width_cjk() {
        assert_eq!(display_width("\u{4e16}\u{754c}"), 4);
    }

    #[test]
    fn truncate_cuts() {
        assert_eq!(truncate_display("abc", 5), "abc");
        assert_eq!(truncate_display("abcdef", 5), "abc..");
        assert_eq!(truncate_display("abc", 2), "a");
    }

    #[test]
    fn pad_right_short_and_long() {
        assert_eq!(pad_right("ab", 5), "ab   ");
        assert_eq!(pad_right("abcdef", 5), "abc..");
    }

    #[test]
    fn col_letters_round_trip() {
        for (col, letters) in [(0, "A"), (25, "Z"), (26, "AA"), (701, "ZZ")] {
            assert_eq!(col_to_letter(col), letters);
            assert_eq!(letter_to_col(letters), Some(col));
        }
        assert_eq!(letter_to_col("b"), Some(1));
        assert_eq!(letter_to_col("A1"), None);
    }

    #[test]
    fn cell_refs() {
        assert_eq!(parse_cell_ref("A1"), Some((0, 0)));
        assert_eq!(parse_cell_ref("c12"), Some((11, 2)));
        assert_eq!(parse_cell_ref("A0"), None);
        assert_eq!(parse_cell_ref("12"), None);
        assert_eq!(parse_cell_ref("B"), None);
    }

    #[test]
    fn rows_and_colors() {
        assert_eq!(parse_row_number("3"), Some(2));
        assert_eq!(parse_row_number("0"), None);
        assert_eq!(parse_color("Red"), Some(Color::rgb(255, 0, 0)));
        assert_eq!(parse_color("#00ff00"), Some(Color::rgb(0, 255, 0)));
        assert_eq!(parse_color("teal-ish"), None);
    }
}
