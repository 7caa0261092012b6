//! Route payloads for repeater path discovery.
//!
//! A route packet carries the list of devices the frame has visited so
//! far: 2-byte raw DIDs, terminated by the broadcast address when the
//! capacity allows. The originator seeds the list with its own DID and
//! every repeater appends itself before forwarding; the route ACK
//! carries the completed list back, proving which path works.

use onenet_core::error::PayloadError;
use onenet_core::types::Did;

use crate::error::MacError;

/// Encode a hop list into `capacity` payload bytes.
pub fn encode_route(hops: &[Did], capacity: usize) -> Result<Vec<u8>, MacError> {
    let needed = hops.len() * 2;
    if needed > capacity {
        return Err(MacError::Payload(PayloadError::DataTooLong {
            max: capacity,
            actual: needed,
        }));
    }
    let mut out = Vec::with_capacity(capacity);
    for hop in hops {
        out.extend_from_slice(&hop.raw().to_be_bytes());
    }
    // Terminator, then zero fill. Broadcast cannot appear as a hop.
    while out.len() < capacity {
        out.extend_from_slice(&Did::BROADCAST.raw().to_be_bytes());
        if out.len() > capacity {
            out.truncate(capacity);
        }
    }
    out.truncate(capacity);
    Ok(out)
}

/// Decode a hop list, stopping at the broadcast terminator.
pub fn decode_route(bytes: &[u8]) -> Result<Vec<Did>, MacError> {
    let mut hops = Vec::new();
    for pair in bytes.chunks_exact(2) {
        let raw = u16::from_be_bytes([pair[0], pair[1]]);
        if raw == Did::BROADCAST.raw() {
            break;
        }
        hops.push(Did::new(raw).map_err(PayloadError::InvalidField)?);
    }
    Ok(hops)
}

/// Append ourselves to a received hop list, as a repeater does before
/// forwarding.
pub fn append_hop(hops: &mut Vec<Did>, own: Did) {
    if !hops.contains(&own) {
        hops.push(own);
    }
}

/// Whether a completed route proves `src` can reach `dst`.
pub fn route_reaches(hops: &[Did], src: Did, dst: Did) -> bool {
    let Some(src_at) = hops.iter().position(|&d| d == src) else {
        return false;
    };
    let Some(dst_at) = hops.iter().position(|&d| d == dst) else {
        return false;
    };
    src_at < dst_at
}

/// The repeaters on a route, excluding its endpoints.
pub fn intermediaries(hops: &[Did], src: Did, dst: Did) -> Vec<Did> {
    hops.iter()
        .copied()
        .filter(|&d| d != src && d != dst)
        .collect()
}
