const MAX_REPORT_CHARS: usize = 8192;

enum EscapeMode {
    Esc,
    Csi,
    Osc,
    OscEsc,
    StTerminated,
    StEsc,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Newlines {
    Keep,
    Space,
}

/// First `max_chars` characters of `input`, with escape sequences and
/// control characters removed and line breaks folded into spaces.
///
/// The limit applies to the raw text, so the result never exceeds it.
pub fn excerpt(input: &str, max_chars: usize) -> String {
    let head: String = input.chars().take(max_chars).collect();
    strip(&head, Newlines::Space, max_chars)
}

/// Multi-line diagnostic text for the report sink. Keeps `\n`, drops
/// everything else a terminal would interpret.
pub fn sanitize_report(input: &str) -> String {
    let mut out = strip(input, Newlines::Keep, MAX_REPORT_CHARS);
    if input.chars().count() > MAX_REPORT_CHARS && !out.ends_with("...[truncated]") {
        out.push_str(" ...[truncated]");
    }
    out
}

fn strip(input: &str, newlines: Newlines, limit: usize) -> String {
    let mut out = String::with_capacity(input.len().min(limit));
    let mut esc_mode: Option<EscapeMode> = None;
    let mut char_count = 0usize;

    for c in input.chars() {
        if let Some(mode) = esc_mode.as_ref() {
            esc_mode = match mode {
                EscapeMode::Esc => match c {
                    '[' => Some(EscapeMode::Csi),
                    ']' => Some(EscapeMode::Osc),
                    'P' | 'X' | '^' | '_' => Some(EscapeMode::StTerminated),
                    _ => None,
                },
                EscapeMode::Csi if ('@'..='~').contains(&c) => None,
                EscapeMode::Csi => Some(EscapeMode::Csi),
                EscapeMode::Osc => match c {
                    '\x07' => None,
                    '\x1b' => Some(EscapeMode::OscEsc),
                    _ => Some(EscapeMode::Osc),
                },
                EscapeMode::OscEsc => match c {
                    '\\' => None,
                    '\x1b' => Some(EscapeMode::OscEsc),
                    _ => Some(EscapeMode::Osc),
                },
                EscapeMode::StTerminated if c == '\x1b' => Some(EscapeMode::StEsc),
                EscapeMode::StTerminated => Some(EscapeMode::StTerminated),
                EscapeMode::StEsc => match c {
                    '\\' => None,
                    '\x1b' => Some(EscapeMode::StEsc),
                    _ => Some(EscapeMode::StTerminated),
                },
            };
            continue;
        }

        match c {
            '\x1b' => {
                esc_mode = Some(EscapeMode::Esc);
                continue;
            }
            '\r' => continue,
            '\n' if newlines == Newlines::Keep => out.push('\n'),
            '\n' | '\t' => out.push(' '),
            c if c.is_control() || is_format_control(c) => continue,
            c => out.push(c),
        }

        char_count += 1;
        if char_count >= limit {
            break;
        }
    }

    out
}

fn is_format_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::{excerpt, sanitize_report};

    #[test]
    fn excerpt_is_bounded_by_raw_length() {
        let body = "x".repeat(500);
        assert_eq!(excerpt(&body, 200).chars().count(), 200);
        assert_eq!(excerpt("short", 200), "short");
    }

    #[test]
    fn excerpt_strips_escapes_and_folds_lines() {
        let input = "<html>\n\u{1b}[31mbad gateway\u{1b}[0m\r\n</html>";
        assert_eq!(excerpt(input, 200), "<html> bad gateway </html>");
    }

    #[test]
    fn report_keeps_lines_and_drops_osc_titles() {
        let input = "line one\n\u{1b}]0;pwned\u{7}line two\u{202e}";
        assert_eq!(sanitize_report(input), "line one\nline two");
    }
}
