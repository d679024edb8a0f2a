//! In-band error detection for shell payloads.
//!
//! The shell endpoint has no acknowledgement frame: a failed attach is
//! reported as ordinary payload text on the same channel as terminal output.
//! A payload is treated as an error when, after stripping escape sequences,
//! it contains one of [`ERROR_MARKERS`]. Regular output that happens to
//! contain a marker is misclassified, and a marker split across two frames
//! is missed.

/// Literal markers that flag a payload as remote diagnostic text.
pub const ERROR_MARKERS: [&str; 3] = ["ERROR:", "error:", "\u{2550}\u{2550}\u{2550} ERROR"];

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Classification {
    Normal,
    ErrorText(String),
}

pub fn classify(payload: &[u8]) -> Classification {
    let text = strip_escapes(payload);
    if ERROR_MARKERS.iter().any(|marker| text.contains(marker)) {
        Classification::ErrorText(text.trim().to_string())
    } else {
        Classification::Normal
    }
}

/// Plain text of a payload with colour and cursor sequences removed.
pub fn strip_escapes(payload: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(payload);
    String::from_utf8_lossy(&stripped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{Classification, classify, strip_escapes};

    #[test]
    fn shell_prompt_is_normal() {
        assert_eq!(classify(b"$ "), Classification::Normal);
        assert_eq!(classify(b"root@api-7d9f:/# "), Classification::Normal);
        assert_eq!(classify(b""), Classification::Normal);
    }

    #[test]
    fn marker_alone_is_error_and_removing_it_is_normal() {
        assert_eq!(
            classify(b"ERROR:"),
            Classification::ErrorText("ERROR:".to_string())
        );
        let without_marker = "ERROR:".replace("ERROR:", "");
        assert_eq!(classify(without_marker.as_bytes()), Classification::Normal);

        assert!(matches!(
            classify(b"error: unable to upgrade connection"),
            Classification::ErrorText(_)
        ));
        assert_eq!(classify(b"unable to upgrade connection"), Classification::Normal);
    }

    #[test]
    fn error_text_is_reported_verbatim_without_escapes() {
        let payload = b"\x1b[31mERROR: container not found\x1b[0m\r\n";
        assert_eq!(
            classify(payload),
            Classification::ErrorText("ERROR: container not found".to_string())
        );
    }

    #[test]
    fn marker_split_by_colour_codes_is_still_detected() {
        let payload = b"\x1b[1mERR\x1b[0mOR: exec failed";
        assert_eq!(
            classify(payload),
            Classification::ErrorText("ERROR: exec failed".to_string())
        );
    }

    #[test]
    fn banner_marker_is_detected() {
        let banner = concat!(
            "\u{2554}\u{2550}\u{2550}\u{2550} ERROR \u{2550}\u{2550}\u{2550}\u{2557}\n",
            " shell not found\n"
        );
        assert!(matches!(
            classify(banner.as_bytes()),
            Classification::ErrorText(_)
        ));
    }

    #[test]
    fn lowercase_error_word_without_colon_is_normal() {
        assert_eq!(classify(b"0 errors, 2 warnings\r\n"), Classification::Normal);
        assert_eq!(classify(b"Error handling enabled"), Classification::Normal);
    }

    #[test]
    fn ordinary_output_containing_marker_is_misclassified() {
        let log_line = b"2024-01-01T00:00:00Z error: disk almost full";
        assert!(matches!(
            classify(log_line),
            Classification::ErrorText(_)
        ));
    }

    #[test]
    fn strip_escapes_keeps_plain_text() {
        assert_eq!(strip_escapes(b"\x1b[32mok\x1b[0m"), "ok");
        assert_eq!(strip_escapes("naïve".as_bytes()), "naïve");
    }
}
