//! OSC-over-UDP signal source.
//!
//! Avatar parameter updates arrive as OSC 1.0 messages: a null-padded
//! address, a null-padded type-tag string, then big-endian arguments.  Only
//! the first argument is read, and only three type tags are meaningful here:
//!
//! | Tag | Decoded as |
//! |---|---|
//! | `f` | [`SignalValue::Float`] |
//! | `T` | [`SignalValue::Bool`]`(true)` |
//! | `F` | [`SignalValue::Bool`]`(false)` |
//!
//! Bundles, other argument types, and malformed packets are dropped.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use toybridge_types::{BridgeError, Sample, SignalValue};
use tracing::{debug, warn};

use crate::source::SignalSource;

/// Large enough for any single parameter update.
const RECV_BUFFER_SIZE: usize = 4096;

fn malformed(reason: &str) -> BridgeError {
    BridgeError::Signal(format!("malformed OSC packet: {reason}"))
}

/// Read a null-terminated, 4-byte-padded string starting at `pos`.
/// Returns the string and the offset just past its padding.
fn read_padded_str(buf: &[u8], pos: usize) -> Result<(&str, usize), BridgeError> {
    let rest = buf.get(pos..).ok_or_else(|| malformed("truncated"))?;
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| malformed("unterminated string"))?;
    let s = std::str::from_utf8(&rest[..len]).map_err(|_| malformed("non-UTF-8 string"))?;
    let next = (pos + len + 4) & !3;
    Ok((s, next))
}

/// Decode one OSC message into a [`Sample`].
///
/// # Errors
///
/// Returns [`BridgeError::Signal`] for bundles, truncated or malformed
/// packets, and messages whose first argument is not `f`, `T`, or `F`.
pub fn decode_message(buf: &[u8]) -> Result<Sample, BridgeError> {
    if buf.starts_with(b"#bundle") {
        return Err(BridgeError::Signal("OSC bundles are not supported".into()));
    }

    let (address, pos) = read_padded_str(buf, 0)?;
    if !address.starts_with('/') {
        return Err(malformed("address must start with '/'"));
    }
    let (tags, pos) = read_padded_str(buf, pos)?;
    let mut tags = tags.chars();
    if tags.next() != Some(',') {
        return Err(malformed("missing type tag string"));
    }

    let value = match tags.next() {
        Some('f') => {
            let bytes: [u8; 4] = buf
                .get(pos..pos + 4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| malformed("truncated float argument"))?;
            SignalValue::Float(f32::from_be_bytes(bytes))
        }
        Some('T') => SignalValue::Bool(true),
        Some('F') => SignalValue::Bool(false),
        Some(other) => {
            return Err(BridgeError::Signal(format!(
                "unsupported OSC argument type '{other}' on {address}"
            )));
        }
        None => return Err(malformed("message has no arguments")),
    };

    Ok(Sample {
        address: address.to_string(),
        value,
    })
}

/// Non-blocking OSC listener.
pub struct OscReceiver {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl OscReceiver {
    /// Bind a non-blocking UDP socket on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Signal`] if the socket cannot be bound or
    /// switched to non-blocking mode.
    pub fn bind(addr: SocketAddr) -> Result<Self, BridgeError> {
        let socket = UdpSocket::bind(addr)
            .map_err(|e| BridgeError::Signal(format!("cannot bind OSC socket on {addr}: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| BridgeError::Signal(format!("cannot set OSC socket non-blocking: {e}")))?;
        Ok(Self {
            socket,
            buf: vec![0; RECV_BUFFER_SIZE],
        })
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::Signal`] if the OS cannot report the address.
    pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
        self.socket
            .local_addr()
            .map_err(|e| BridgeError::Signal(e.to_string()))
    }
}

impl SignalSource for OscReceiver {
    /// Drain datagrams until one decodes into a sample or the socket has
    /// nothing left.
    fn try_receive(&mut self) -> Option<Sample> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, peer)) => match decode_message(&self.buf[..n]) {
                    Ok(sample) => return Some(sample),
                    Err(e) => debug!(peer = %peer, error = %e, "dropping OSC packet"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    warn!(error = %e, "OSC receive error");
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pad(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(s.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    fn float_message(address: &str, value: f32) -> Vec<u8> {
        let mut out = Vec::new();
        pad(&mut out, address);
        pad(&mut out, ",f");
        out.extend_from_slice(&value.to_be_bytes());
        out
    }

    fn bool_message(address: &str, value: bool) -> Vec<u8> {
        let mut out = Vec::new();
        pad(&mut out, address);
        pad(&mut out, if value { ",T" } else { ",F" });
        out
    }

    #[test]
    fn decodes_float_argument() {
        let sample = decode_message(&float_message("/avatar/parameters/Vibe", 0.25)).unwrap();
        assert_eq!(sample, Sample::float("/avatar/parameters/Vibe", 0.25));
    }

    #[test]
    fn decodes_bool_arguments() {
        let t = decode_message(&bool_message("/avatar/parameters/Touch", true)).unwrap();
        let f = decode_message(&bool_message("/avatar/parameters/Touch", false)).unwrap();
        assert_eq!(t.value, SignalValue::Bool(true));
        assert_eq!(f.value, SignalValue::Bool(false));
    }

    #[test]
    fn address_padding_on_exact_multiple_of_four() {
        // "/abc" is 4 bytes, so it needs a full 4 bytes of null padding.
        let sample = decode_message(&float_message("/abc", 1.0)).unwrap();
        assert_eq!(sample.address, "/abc");
        assert_eq!(sample.value, SignalValue::Float(1.0));
    }

    #[test]
    fn rejects_bundles_and_unsupported_types() {
        let mut bundle = Vec::new();
        pad(&mut bundle, "#bundle");
        assert!(decode_message(&bundle).is_err());

        let mut int_msg = Vec::new();
        pad(&mut int_msg, "/avatar/parameters/Count");
        pad(&mut int_msg, ",i");
        int_msg.extend_from_slice(&3i32.to_be_bytes());
        assert!(decode_message(&int_msg).is_err());
    }

    #[test]
    fn rejects_truncated_packets() {
        let mut msg = float_message("/avatar/parameters/Vibe", 0.5);
        msg.truncate(msg.len() - 2);
        assert!(decode_message(&msg).is_err());
        assert!(decode_message(b"/no-terminator").is_err());
        assert!(decode_message(&[]).is_err());
    }

    #[test]
    fn receiver_skips_garbage_and_returns_next_sample() {
        let mut receiver = OscReceiver::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let target = receiver.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        assert!(receiver.try_receive().is_none());

        sender.send_to(b"garbage", target).unwrap();
        sender
            .send_to(&float_message("/avatar/parameters/Vibe", 0.75), target)
            .unwrap();

        let mut received = None;
        for _ in 0..100 {
            if let Some(sample) = receiver.try_receive() {
                received = Some(sample);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            received,
            Some(Sample::float("/avatar/parameters/Vibe", 0.75))
        );
    }
}
