use tokio_util::bytes::Buf;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Modbus TCP framing for the two operations the C6 controller speaks:
/// holding-register block reads (function 3) and single-register writes
/// (function 6). Register addresses are 0-based on the wire.

#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, Copy)]
pub enum Operation {
    ReadBlock { address: u16, count: u16 },
    WriteRegister { address: u16, value: u16 },
}

#[derive(Debug)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

#[derive(Debug)]
pub enum ResponseKind {
    /// Server exception; the code is the device's, not ours.
    Exception(u8),
    /// The payload of a block read, two big-endian bytes per register.
    ReadBlock { bytes: Vec<u8> },
    /// Echo of a single-register write.
    WriteRegister { address: u16, value: u16 },
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match self.kind {
            ResponseKind::Exception(code) => Some(code),
            _ => None,
        }
    }
}

pub struct ModbusTcpCodec {}

impl Encoder<&Request> for ModbusTcpCodec {
    type Error = std::io::Error;

    fn encode(
        &mut self,
        req: &Request,
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        dst.extend(req.transaction_id.to_be_bytes());
        // protocol id 0, length 6 (unit + function + 4 payload bytes).
        dst.extend(&[0, 0, 0, 6]);
        match req.operation {
            Operation::ReadBlock { address, count } => {
                dst.extend(&[req.device_id, 3]);
                dst.extend(address.to_be_bytes());
                dst.extend(count.to_be_bytes());
            }
            Operation::WriteRegister { address, value } => {
                dst.extend(&[req.device_id, 6]);
                dst.extend(address.to_be_bytes());
                dst.extend(value.to_be_bytes());
            }
        }
        trace!(message = "sending encoded request", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusTcpCodec {
    type Item = Response;
    type Error = std::io::Error;

    fn decode(
        &mut self,
        src: &mut tokio_util::bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempting a decode", buffer = ?src);
            if src.len() < 8 {
                return Ok(None);
            }
            let Some((header, remainder)) = src.split_first_chunk::<6>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let protocol = u16::from_be_bytes([header[2], header[3]]);
            if protocol != 0 {
                // Not an MBAP frame boundary; shift by a byte and resync.
                src.advance(1);
                continue;
            }
            let frame_length = usize::from(u16::from_be_bytes([header[4], header[5]]));
            let Some((frame, _)) = remainder.split_at_checked(frame_length) else {
                return Ok(None);
            };
            let [device_id, function, payload @ ..] = frame else {
                src.advance(1);
                continue;
            };
            let (device_id, function) = (*device_id, *function);
            let kind = if function > 0x80 {
                let [code, ..] = payload else {
                    src.advance(1);
                    continue;
                };
                ResponseKind::Exception(*code)
            } else {
                match function {
                    3 => {
                        // The leading byte nominally holds the payload length,
                        // but the MBAP header already told us; believe the
                        // header so oversized reads keep working.
                        let [_, bytes @ ..] = payload else {
                            src.advance(1);
                            continue;
                        };
                        ResponseKind::ReadBlock { bytes: bytes.to_vec() }
                    }
                    6 => {
                        let [a0, a1, v0, v1] = payload else {
                            src.advance(1);
                            continue;
                        };
                        ResponseKind::WriteRegister {
                            address: u16::from_be_bytes([*a0, *a1]),
                            value: u16::from_be_bytes([*v0, *v1]),
                        }
                    }
                    _ => {
                        src.advance(6 + frame_length);
                        continue;
                    }
                }
            };
            src.advance(6 + frame_length);
            return Ok(Some(Response { device_id, transaction_id, kind }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::bytes::BytesMut;

    fn encode(req: &Request) -> BytesMut {
        let mut buffer = BytesMut::new();
        ModbusTcpCodec {}.encode(req, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn read_request_uses_zero_based_addresses() {
        let buffer = encode(&Request {
            device_id: 1,
            transaction_id: 7,
            operation: Operation::ReadBlock { address: 900, count: 47 },
        });
        assert_eq!(&buffer[..], &[0, 7, 0, 0, 0, 6, 1, 3, 0x03, 0x84, 0, 47]);
    }

    #[test]
    fn write_request_carries_one_word() {
        let buffer = encode(&Request {
            device_id: 1,
            transaction_id: 8,
            operation: Operation::WriteRegister { address: 4, value: 2 },
        });
        assert_eq!(&buffer[..], &[0, 8, 0, 0, 0, 6, 1, 6, 0, 4, 0, 2]);
    }

    #[test]
    fn decodes_a_read_response() {
        let mut buffer = BytesMut::new();
        buffer.extend([0, 7, 0, 0, 0, 7, 1, 3, 4, 0, 1, 0, 2]);
        let response = ModbusTcpCodec {}.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(response.transaction_id, 7);
        match response.kind {
            ResponseKind::ReadBlock { bytes } => assert_eq!(bytes, vec![0, 1, 0, 2]),
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn decodes_a_write_echo_and_an_exception() {
        let mut buffer = BytesMut::new();
        buffer.extend([0, 8, 0, 0, 0, 6, 1, 6, 0, 4, 0, 2]);
        buffer.extend([0, 9, 0, 0, 0, 3, 1, 0x86, 2]);
        let mut codec = ModbusTcpCodec {};
        let first = codec.decode(&mut buffer).unwrap().unwrap();
        match first.kind {
            ResponseKind::WriteRegister { address, value } => {
                assert_eq!((address, value), (4, 2));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        let second = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(second.exception_code(), Some(2));
    }

    #[test]
    fn waits_for_more_bytes_on_a_partial_frame() {
        let mut buffer = BytesMut::new();
        buffer.extend([0, 7, 0, 0, 0, 7, 1, 3]);
        assert!(ModbusTcpCodec {}.decode(&mut buffer).unwrap().is_none());
    }
}
