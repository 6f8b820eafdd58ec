//! Byte-stream framing for KFD adapters.
//!
//! Two framing schemes are in use, selected by the adapter model that was
//! detected when the serial device was opened:
//!
//! ```text
//! Scheme A (single delimiter):  [0x61][escaped payload...][0x61]
//! Scheme B (dual delimiter):    [0x61][escaped payload...][0x62]
//! ```
//!
//! # What is byte stuffing? (for beginners)
//!
//! A serial line is just a stream of bytes with no natural message
//! boundaries.  We mark the start and end of each frame with reserved byte
//! values.  If the payload itself happens to contain one of those reserved
//! values, the encoder replaces it with a two-byte *escape sequence*
//! (`ESC` followed by a placeholder) so the receiver never mistakes payload
//! bytes for a frame boundary.  The decoder reverses the substitution.
//!
//! Both directions are implemented as a single pass over the input, so the
//! cost is linear in the frame length even for payloads made entirely of
//! reserved bytes.

use thiserror::Error;
use tracing::warn;

// ── Scheme A constants ────────────────────────────────────────────────────────

/// Start-of-message and end-of-message marker (Scheme A).
pub const SA_SOM_EOM: u8 = 0x61;
/// Placeholder written after [`SA_ESC`] for an escaped marker byte.
pub const SA_SOM_EOM_PLACEHOLDER: u8 = 0x62;
/// Escape byte (Scheme A).
pub const SA_ESC: u8 = 0x63;
/// Placeholder written after [`SA_ESC`] for an escaped escape byte.
pub const SA_ESC_PLACEHOLDER: u8 = 0x64;

// ── Scheme B constants ────────────────────────────────────────────────────────

/// Start-of-message marker (Scheme B).
pub const SB_SOM: u8 = 0x61;
/// End-of-message marker (Scheme B).
pub const SB_EOM: u8 = 0x62;
/// Escape byte (Scheme B).
pub const SB_ESC: u8 = 0x63;
/// Placeholder for an escaped escape byte (Scheme B).
pub const SB_ESC_PLACEHOLDER: u8 = 0x64;
/// Placeholder for an escaped start marker (Scheme B).
pub const SB_SOM_PLACEHOLDER: u8 = 0x65;
/// Placeholder for an escaped end marker (Scheme B).
pub const SB_EOM_PLACEHOLDER: u8 = 0x66;

/// Errors produced while un-escaping a received frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The frame ended immediately after an escape byte.
    #[error("escape byte at end of frame")]
    TrailingEscape,

    /// The byte after an escape byte is not a known placeholder.
    #[error("invalid byte 0x{0:02X} following escape")]
    InvalidEscape(u8),
}

/// Framing scheme used on the wire between host and adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameScheme {
    /// One marker byte doubles as start and end of message.
    SingleDelimiter,
    /// Separate start and end marker bytes.
    DualDelimiter,
}

/// Known KFD adapter hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterModel {
    /// Original AVR-based KFDtool adapter.
    KfdToolAvr,
    /// KFD-Micro and compatible adapters.
    KfdMicro,
}

impl AdapterModel {
    /// Returns the framing scheme spoken by this adapter.
    pub fn frame_scheme(self) -> FrameScheme {
        match self {
            AdapterModel::KfdToolAvr => FrameScheme::SingleDelimiter,
            AdapterModel::KfdMicro => FrameScheme::DualDelimiter,
        }
    }
}

impl FrameScheme {
    fn start_marker(self) -> u8 {
        match self {
            FrameScheme::SingleDelimiter => SA_SOM_EOM,
            FrameScheme::DualDelimiter => SB_SOM,
        }
    }

    fn end_marker(self) -> u8 {
        match self {
            FrameScheme::SingleDelimiter => SA_SOM_EOM,
            FrameScheme::DualDelimiter => SB_EOM,
        }
    }

    fn escape(self) -> u8 {
        match self {
            FrameScheme::SingleDelimiter => SA_ESC,
            FrameScheme::DualDelimiter => SB_ESC,
        }
    }

    /// Placeholder for a reserved payload byte, or `None` if the byte can be
    /// sent as-is.
    fn placeholder_for(self, byte: u8) -> Option<u8> {
        match self {
            FrameScheme::SingleDelimiter => match byte {
                SA_SOM_EOM => Some(SA_SOM_EOM_PLACEHOLDER),
                SA_ESC => Some(SA_ESC_PLACEHOLDER),
                _ => None,
            },
            FrameScheme::DualDelimiter => match byte {
                SB_SOM => Some(SB_SOM_PLACEHOLDER),
                SB_EOM => Some(SB_EOM_PLACEHOLDER),
                SB_ESC => Some(SB_ESC_PLACEHOLDER),
                _ => None,
            },
        }
    }

    /// Original byte for a placeholder that followed an escape byte.
    fn byte_for_placeholder(self, placeholder: u8) -> Option<u8> {
        match self {
            FrameScheme::SingleDelimiter => match placeholder {
                SA_SOM_EOM_PLACEHOLDER => Some(SA_SOM_EOM),
                SA_ESC_PLACEHOLDER => Some(SA_ESC),
                _ => None,
            },
            FrameScheme::DualDelimiter => match placeholder {
                SB_SOM_PLACEHOLDER => Some(SB_SOM),
                SB_EOM_PLACEHOLDER => Some(SB_EOM),
                SB_ESC_PLACEHOLDER => Some(SB_ESC),
                _ => None,
            },
        }
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes `payload` as one complete frame, including both delimiters.
///
/// # Examples
///
/// ```rust
/// use kfd_core::protocol::framing::{encode_frame, FrameScheme};
///
/// let frame = encode_frame(FrameScheme::SingleDelimiter, &[0x01, 0x61, 0x02]);
/// assert_eq!(frame, vec![0x61, 0x01, 0x63, 0x62, 0x02, 0x61]);
/// ```
pub fn encode_frame(scheme: FrameScheme, payload: &[u8]) -> Vec<u8> {
    // Worst case every byte is escaped, plus the two delimiters.
    let mut out = Vec::with_capacity(payload.len() * 2 + 2);
    out.push(scheme.start_marker());
    for &byte in payload {
        match scheme.placeholder_for(byte) {
            Some(placeholder) => {
                out.push(scheme.escape());
                out.push(placeholder);
            }
            None => out.push(byte),
        }
    }
    out.push(scheme.end_marker());
    out
}

/// Reverses the escape substitution on the raw bytes between two delimiters.
///
/// # Errors
///
/// Returns [`FrameError::TrailingEscape`] if the last byte is an escape byte,
/// or [`FrameError::InvalidEscape`] if an escape byte is followed by anything
/// other than a placeholder.
pub fn unescape(scheme: FrameScheme, raw: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&byte) = bytes.next() {
        if byte == scheme.escape() {
            let &next = bytes.next().ok_or(FrameError::TrailingEscape)?;
            let original = scheme
                .byte_for_placeholder(next)
                .ok_or(FrameError::InvalidEscape(next))?;
            out.push(original);
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Incremental frame decoder fed from a continuous byte stream.
///
/// Bytes are accumulated until a frame boundary is seen; the completed frame
/// is then un-escaped and returned.  A malformed frame is logged and dropped
/// so that one corrupted frame never poisons the stream.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    scheme: FrameScheme,
    /// Raw (still escaped) bytes of the frame in progress.
    buffer: Vec<u8>,
    /// `true` once a start marker has been seen.
    in_frame: bool,
}

impl FrameDecoder {
    /// Creates a decoder for the given scheme with an empty buffer.
    pub fn new(scheme: FrameScheme) -> Self {
        Self {
            scheme,
            buffer: Vec::new(),
            in_frame: false,
        }
    }

    /// The scheme this decoder was created for.
    pub fn scheme(&self) -> FrameScheme {
        self.scheme
    }

    /// Discards the frame in progress.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_frame = false;
    }

    /// Returns `true` if raw bytes of an incomplete frame are buffered.
    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Feeds a chunk of received bytes, returning every frame completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if let Some(frame) = self.push(byte) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Feeds a single byte, returning a frame if this byte completed one.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.scheme {
            FrameScheme::SingleDelimiter => self.push_single(byte),
            FrameScheme::DualDelimiter => self.push_dual(byte),
        }
    }

    fn push_single(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == SA_SOM_EOM {
            // The marker both closes the current frame and opens the next.
            let completed = if self.buffer.is_empty() {
                None
            } else {
                self.take_frame()
            };
            self.in_frame = true;
            return completed;
        }
        if self.in_frame {
            self.buffer.push(byte);
        }
        None
    }

    fn push_dual(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            SB_SOM => {
                if !self.buffer.is_empty() {
                    warn!(
                        discarded = self.buffer.len(),
                        "start marker inside open frame; discarding partial frame"
                    );
                }
                self.buffer.clear();
                self.in_frame = true;
                None
            }
            SB_EOM => {
                if !self.in_frame {
                    return None;
                }
                self.in_frame = false;
                if self.buffer.is_empty() {
                    None
                } else {
                    self.take_frame()
                }
            }
            _ => {
                if self.in_frame {
                    self.buffer.push(byte);
                }
                None
            }
        }
    }

    /// Un-escapes and clears the buffered frame.
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let raw = std::mem::take(&mut self.buffer);
        match unescape(self.scheme, &raw) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(len = raw.len(), "dropping malformed frame: {e}");
                None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_a_escapes_marker_and_escape_bytes() {
        // Arrange
        let payload = [0x61, 0x63, 0x00];

        // Act
        let frame = encode_frame(FrameScheme::SingleDelimiter, &payload);

        // Assert
        assert_eq!(frame, vec![0x61, 0x63, 0x62, 0x63, 0x64, 0x00, 0x61]);
    }

    #[test]
    fn test_scheme_b_escapes_all_three_reserved_bytes() {
        let frame = encode_frame(FrameScheme::DualDelimiter, &[0x61, 0x62, 0x63]);
        assert_eq!(
            frame,
            vec![0x61, 0x63, 0x65, 0x63, 0x66, 0x63, 0x64, 0x62]
        );
    }

    #[test]
    fn test_scheme_a_discards_bytes_before_first_marker() {
        // Arrange
        let mut decoder = FrameDecoder::new(FrameScheme::SingleDelimiter);
        let mut stream = vec![0xAA, 0xBB];
        stream.extend(encode_frame(FrameScheme::SingleDelimiter, &[0x01, 0x02]));

        // Act
        let frames = decoder.feed(&stream);

        // Assert
        assert_eq!(frames, vec![vec![0x01, 0x02]]);
    }

    #[test]
    fn test_scheme_a_back_to_back_frames_decode_independently() {
        let mut stream = encode_frame(FrameScheme::SingleDelimiter, &[0x10]);
        stream.extend(encode_frame(FrameScheme::SingleDelimiter, &[0x20, 0x21]));
        let mut decoder = FrameDecoder::new(FrameScheme::SingleDelimiter);

        let frames = decoder.feed(&stream);

        assert_eq!(frames, vec![vec![0x10], vec![0x20, 0x21]]);
    }

    #[test]
    fn test_frame_split_across_chunks_is_reassembled() {
        let stream = encode_frame(FrameScheme::DualDelimiter, &[0x01, 0x62, 0x03]);
        let mut decoder = FrameDecoder::new(FrameScheme::DualDelimiter);

        let first = decoder.feed(&stream[..3]);
        assert!(first.is_empty());
        assert!(decoder.has_partial_frame());

        let second = decoder.feed(&stream[3..]);

        assert_eq!(second, vec![vec![0x01, 0x62, 0x03]]);
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn test_scheme_b_ignores_bytes_outside_frame() {
        let mut decoder = FrameDecoder::new(FrameScheme::DualDelimiter);
        let mut stream = vec![0x01, 0x62, 0x02];
        stream.extend(encode_frame(FrameScheme::DualDelimiter, &[0x05]));
        stream.push(0x07);

        let frames = decoder.feed(&stream);

        assert_eq!(frames, vec![vec![0x05]]);
    }

    #[test]
    fn test_invalid_escape_drops_frame_without_panicking() {
        // Arrange – escape followed by a byte that is not a placeholder
        let mut decoder = FrameDecoder::new(FrameScheme::SingleDelimiter);

        // Act
        let frames = decoder.feed(&[0x61, 0x01, 0x63, 0x10, 0x61]);

        // Assert – no frame, and the decoder keeps working afterwards
        assert!(frames.is_empty());
        let next = decoder.feed(&[0x02, 0x61]);
        assert_eq!(next, vec![vec![0x02]]);
    }

    #[test]
    fn test_trailing_escape_is_reported() {
        assert_eq!(
            unescape(FrameScheme::SingleDelimiter, &[0x01, 0x63]),
            Err(FrameError::TrailingEscape)
        );
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let mut decoder = FrameDecoder::new(FrameScheme::DualDelimiter);
        decoder.feed(&[0x61, 0x01, 0x02]);
        assert!(decoder.has_partial_frame());

        decoder.reset();

        assert!(!decoder.has_partial_frame());
        assert!(decoder.feed(&[0x03, 0x62]).is_empty());
    }

    #[test]
    fn test_adapter_models_map_to_schemes() {
        assert_eq!(
            AdapterModel::KfdToolAvr.frame_scheme(),
            FrameScheme::SingleDelimiter
        );
        assert_eq!(
            AdapterModel::KfdMicro.frame_scheme(),
            FrameScheme::DualDelimiter
        );
    }
}
