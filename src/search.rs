//! Client-side rendering of search match context.
//!
//! The backend wraps each matched span in `**` pairs. Splitting yields
//! alternating plain and highlighted segments; a `**` that never closes on
//! the same line is kept as literal text.

const MARKER: &str = "**";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub highlighted: bool,
}

impl<'a> Segment<'a> {
    fn plain(text: &'a str) -> Self {
        Self {
            text,
            highlighted: false,
        }
    }

    fn highlight(text: &'a str) -> Self {
        Self {
            text,
            highlighted: true,
        }
    }
}

pub fn highlight_segments(context: &str) -> Vec<Segment<'_>> {
    let bytes = context.as_bytes();
    let mut segments = Vec::new();
    let mut plain_start = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'*' {
            let inner_start = i + MARKER.len();
            if let Some(rel) = context[inner_start..].find(MARKER) {
                let inner = &context[inner_start..inner_start + rel];
                if !inner.contains('\n') {
                    push(&mut segments, Segment::plain(&context[plain_start..i]));
                    push(&mut segments, Segment::highlight(inner));
                    i = inner_start + rel + MARKER.len();
                    plain_start = i;
                    continue;
                }
            }
        }
        // `*` never appears inside a multi-byte sequence, so every index we
        // slice at is a char boundary.
        i += 1;
    }
    push(&mut segments, Segment::plain(&context[plain_start..]));
    segments
}

fn push<'a>(segments: &mut Vec<Segment<'a>>, segment: Segment<'a>) {
    if !segment.text.is_empty() {
        segments.push(segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(context: &str) -> Vec<(String, bool)> {
        highlight_segments(context)
            .into_iter()
            .map(|s| (s.text.to_string(), s.highlighted))
            .collect()
    }

    #[test]
    fn single_match() {
        assert_eq!(
            render("Patient reports **fever** since Monday"),
            vec![
                ("Patient reports ".to_string(), false),
                ("fever".to_string(), true),
                (" since Monday".to_string(), false),
            ]
        );
    }

    #[test]
    fn several_matches_and_edges() {
        assert_eq!(
            render("**Fever** and **fever**"),
            vec![
                ("Fever".to_string(), true),
                (" and ".to_string(), false),
                ("fever".to_string(), true),
            ]
        );
        assert_eq!(render(""), vec![]);
        assert_eq!(render("no markers"), vec![("no markers".to_string(), false)]);
    }

    #[test]
    fn unpaired_markers_stay_literal() {
        assert_eq!(
            render("dose 2**3 mg"),
            vec![("dose 2**3 mg".to_string(), false)]
        );
        assert_eq!(
            render("**fever** then 5 * 2 ** x"),
            vec![
                ("fever".to_string(), true),
                (" then 5 * 2 ** x".to_string(), false),
            ]
        );
        assert_eq!(
            render("a ** b\nc ** d"),
            vec![("a ** b\nc ** d".to_string(), false)]
        );
    }

    #[test]
    fn non_ascii_text_survives() {
        assert_eq!(
            render("रोगी को **बुखार** है"),
            vec![
                ("रोगी को ".to_string(), false),
                ("बुखार".to_string(), true),
                (" है".to_string(), false),
            ]
        );
    }

    #[test]
    fn plain_text_is_preserved_exactly() {
        let context = "x ** y **z** w *";
        let joined: String = highlight_segments(context)
            .iter()
            .map(|s| {
                if s.highlighted {
                    format!("**{}**", s.text)
                } else {
                    s.text.to_string()
                }
            })
            .collect();
        assert_eq!(joined, context);
    }
}
