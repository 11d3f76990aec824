//! Inbound terminal frames and outbound UTF-8 reassembly.

use serde::Deserialize;

use crate::config::PtySize;

/// What an inbound text frame asks the bridge to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFrame<'a> {
    /// Change the pty dimensions.
    Resize(PtySize),
    /// A resize frame with a zero dimension. Dropped.
    Ignored,
    /// Raw terminal input, forwarded byte-for-byte.
    Input(&'a str),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlFrame {
    Resize { cols: u32, rows: u32 },
}

/// Classify a text frame. Only a well-formed `{"type":"resize",...}`
/// object is treated as control; everything else is keystrokes.
pub fn parse_frame(text: &str) -> InboundFrame<'_> {
    if !text.trim_start().starts_with('{') {
        return InboundFrame::Input(text);
    }
    match serde_json::from_str::<ControlFrame>(text) {
        Ok(ControlFrame::Resize { cols, rows }) if cols == 0 || rows == 0 => InboundFrame::Ignored,
        Ok(ControlFrame::Resize { cols, rows }) => InboundFrame::Resize(PtySize { cols, rows }),
        Err(_) => InboundFrame::Input(text),
    }
}

/// Turns a byte stream into text without splitting multi-byte characters
/// across chunk boundaries. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete character at the end; keep it for the next chunk.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let tail = rest.to_vec();
        self.pending = tail;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_frame_is_control() {
        assert_eq!(
            parse_frame(r#"{"type":"resize","cols":120,"rows":40}"#),
            InboundFrame::Resize(PtySize {
                cols: 120,
                rows: 40
            })
        );
    }

    #[test]
    fn plain_text_is_input() {
        assert_eq!(parse_frame("ls -la\n"), InboundFrame::Input("ls -la\n"));
    }

    #[test]
    fn other_json_is_input() {
        let text = r#"{"type":"ping"}"#;
        assert_eq!(parse_frame(text), InboundFrame::Input(text));

        let text = r#"{"type":"resize","cols":"wide"}"#;
        assert_eq!(parse_frame(text), InboundFrame::Input(text));

        let text = "{not json";
        assert_eq!(parse_frame(text), InboundFrame::Input(text));
    }

    #[test]
    fn zero_sized_resize_is_ignored() {
        assert_eq!(
            parse_frame(r#"{"type":"resize","cols":0,"rows":40}"#),
            InboundFrame::Ignored
        );
    }

    #[test]
    fn decoder_carries_split_characters() {
        let bytes = "héllo €".as_bytes();
        let mut decoder = Utf8Decoder::default();
        // Split inside the two-byte 'é' and the three-byte '€'.
        let first = decoder.decode(&bytes[..2]);
        let second = decoder.decode(&bytes[2..8]);
        let third = decoder.decode(&bytes[8..]);
        assert_eq!(first, "h");
        assert_eq!(format!("{first}{second}{third}"), "héllo €");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }
}
