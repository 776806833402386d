// =============================================================================
// Protocol codec — pure encode/decode for the two wire envelopes
// =============================================================================

pub mod bridge_codec;
pub mod envelope;

pub use envelope::{
    decode_line, encode_response, sanitize_for_log, Command, DecodeError, DecodedLine, Response,
    ResponseError, Status, MAX_COMMAND_LEN, MAX_FRAME_BYTES,
};
