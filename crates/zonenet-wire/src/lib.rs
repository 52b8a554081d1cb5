//! Wire codec for the sample frame sent from an agent to the aggregator.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     N  (record count)
//! 4+20k   4     src_ip   (network byte order)
//! 8+20k   4     dst_ip   (network byte order)
//! 12+20k  2     src_port
//! 14+20k  2     dst_port
//! 16+20k  8     bytes
//! ```
//!
//! Total buffer length is exactly `4 + 20*N`. This is the 20-byte, with
//! ports, record format; the legacy 12-byte no-port format is not
//! supported and is never auto-detected (see SPEC_FULL.md §D.1).

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use zonenet_common::{FlowKey, FlowValue};

const HEADER_LEN: usize = 4;
const RECORD_LEN: usize = 20;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
	#[error("buffer too short: got {0} bytes, need at least {HEADER_LEN}")]
	TooShort(usize),
	#[error("buffer length {buf_len} does not match declared record count {count} (expected {expected})")]
	LengthMismatch {
		buf_len: usize,
		count: u32,
		expected: usize,
	},
}

/// One decoded record: an IPv4 flow and the bytes observed for it during
/// one drain cycle. IPs and ports are in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
	pub src_ip: Ipv4Addr,
	pub dst_ip: Ipv4Addr,
	pub src_port: u16,
	pub dst_port: u16,
	pub bytes: u64,
}

/// Encodes a batch of (key, value) pairs from one drain cycle into a
/// sample frame. `keys` and `values` must be the same length; entries
/// are written in the order given.
pub fn encode(keys: &[FlowKey], values: &[FlowValue]) -> Bytes {
	debug_assert_eq!(keys.len(), values.len());
	let mut buf = BytesMut::with_capacity(HEADER_LEN + RECORD_LEN * keys.len());
	buf.put_u32(keys.len() as u32);
	for (key, value) in keys.iter().zip(values) {
		buf.put_u32(key.src_ip);
		buf.put_u32(key.dst_ip);
		buf.put_u16(key.src_port);
		buf.put_u16(key.dst_port);
		buf.put_u64(value.bytes);
	}
	buf.freeze()
}

/// Decodes a sample frame. Rejects any buffer that isn't exactly
/// `4 + 20*N` bytes long for the declared count `N` — no partial decode.
pub fn decode(buf: &[u8]) -> Result<Vec<SampleEntry>, WireError> {
	if buf.len() < HEADER_LEN {
		return Err(WireError::TooShort(buf.len()));
	}
	let mut cursor = buf;
	let count = cursor.get_u32();
	let expected = HEADER_LEN + RECORD_LEN * count as usize;
	if buf.len() != expected {
		return Err(WireError::LengthMismatch {
			buf_len: buf.len(),
			count,
			expected,
		});
	}

	let mut entries = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let src_ip = Ipv4Addr::from_bits(cursor.get_u32());
		let dst_ip = Ipv4Addr::from_bits(cursor.get_u32());
		let src_port = cursor.get_u16();
		let dst_port = cursor.get_u16();
		let bytes = cursor.get_u64();
		entries.push(SampleEntry {
			src_ip,
			dst_ip,
			src_port,
			dst_port,
			bytes,
		});
	}
	Ok(entries)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(src: u32, dst: u32, src_port: u16, dst_port: u16) -> FlowKey {
		FlowKey {
			src_ip: src,
			dst_ip: dst,
			src_port,
			dst_port,
		}
	}

	#[test]
	fn round_trips_and_matches_expected_length() {
		let keys = [key(1, 2, 80, 443), key(4, 5, 8080, 8443)];
		let values = [FlowValue { bytes: 3 }, FlowValue { bytes: 6 }];

		let encoded = encode(&keys, &values);
		assert_eq!(encoded.len(), 44);

		let decoded = decode(&encoded).unwrap();
		assert_eq!(decoded.len(), 2);
		assert_eq!(decoded[0].src_ip, Ipv4Addr::from_bits(1));
		assert_eq!(decoded[0].dst_ip, Ipv4Addr::from_bits(2));
		assert_eq!(decoded[0].src_port, 80);
		assert_eq!(decoded[0].dst_port, 443);
		assert_eq!(decoded[0].bytes, 3);
		assert_eq!(decoded[1].bytes, 6);
	}

	#[test]
	fn empty_frame_round_trips() {
		let encoded = encode(&[], &[]);
		assert_eq!(encoded.len(), 4);
		assert_eq!(decode(&encoded).unwrap(), vec![]);
	}

	#[test]
	fn rejects_buffer_shorter_than_header() {
		assert_eq!(decode(&[0, 0, 0]), Err(WireError::TooShort(3)));
	}

	#[test]
	fn rejects_length_mismatch() {
		// declares 1 record but carries no record bytes
		let buf = [0u8, 0, 0, 1];
		assert_eq!(
			decode(&buf),
			Err(WireError::LengthMismatch {
				buf_len: 4,
				count: 1,
				expected: 24,
			})
		);
	}

	#[test]
	fn rejects_trailing_garbage() {
		let mut buf = encode(&[key(1, 2, 3, 4)], &[FlowValue { bytes: 5 }]).to_vec();
		buf.push(0xFF);
		assert!(decode(&buf).is_err());
	}
}
