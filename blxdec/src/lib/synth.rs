//! Builders for synthetic captures: fixtures, replay tools, anything that
//! needs bytes the decoders will accept.
use std::num::TryFromIntError;

use crate::record::{TraceRecord, SIGNATURE_MASTER, SIGNATURE_MESSAGE_ID};
use crate::scan::{
    FRAME_BODY_PREFIX_LEN, MEDIA_TYPE_TCPIP, RECEIVER_DEVICE_PC,
    RESOURCE_TRACEBOX, SEND_DEVICE_TRACEBOX,
};

/// Wraps heap-record bytes (as produced by [`TraceRecord::to_heap_bytes`])
/// in the signature pair.
pub fn signature_record(r: &TraceRecord) -> Vec<u8> {
    let mut res = vec![SIGNATURE_MESSAGE_ID, SIGNATURE_MASTER];
    res.append(&mut r.to_heap_bytes());

    res
}

/// Wraps a record in a trace-box frame whose declared length covers the
/// body plus `slack` extra bytes (zero-filled). Fails if that length does
/// not fit the 16-bit length field.
pub fn framed_record(r: &TraceRecord, slack: usize) -> Result<Vec<u8>, TryFromIntError> {
    let mut body = vec![0u8; FRAME_BODY_PREFIX_LEN];
    body.append(&mut signature_record(r));
    let length = u16::try_from(body.len().saturating_add(slack))?;
    body.resize(length as usize, 0);

    let mut res = vec![
        MEDIA_TYPE_TCPIP,
        RECEIVER_DEVICE_PC,
        SEND_DEVICE_TRACEBOX,
        RESOURCE_TRACEBOX,
    ];
    res.extend_from_slice(&length.to_be_bytes());
    res.append(&mut body);

    Ok(res)
}
