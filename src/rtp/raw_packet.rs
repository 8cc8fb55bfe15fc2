//! A mutable window (`buffer[offset..offset + length]`) over one datagram.
//!
//! Accessors never panic: header reads on a truncated buffer return
//! [`RtpError::TooShort`] so the transform boundary can drop the packet.

use byteorder::{BigEndian, ByteOrder};

use crate::rtp::constants::{
    CSRC_COUNT_MASK, EXTENSION_BIT, RTP_EXT_HEADER_LEN, RTP_FIXED_HEADER_LEN,
};
use crate::rtp::rtp_error::RtpError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    buffer: Vec<u8>,
    offset: usize,
    length: usize,
}

impl RawPacket {
    pub fn new(buffer: Vec<u8>, offset: usize, length: usize) -> Result<Self, RtpError> {
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok(Self {
                buffer,
                offset,
                length,
            }),
            _ => Err(RtpError::OutOfBounds {
                offset,
                length,
                capacity: buffer.len(),
            }),
        }
    }

    #[must_use]
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        let length = buffer.len();
        Self {
            buffer,
            offset: 0,
            length,
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer[self.offset..self.offset + self.length]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Drops the bytes outside the window and returns the datagram.
    #[must_use]
    pub fn into_vec(mut self) -> Vec<u8> {
        if self.offset != 0 {
            self.buffer.drain(..self.offset);
        }
        self.buffer.truncate(self.length);
        self.buffer
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.as_slice().first().map_or(0, |b| b >> 6)
    }

    #[must_use]
    pub fn has_extension(&self) -> bool {
        self.as_slice()
            .first()
            .is_some_and(|b| b & EXTENSION_BIT != 0)
    }

    #[must_use]
    pub fn csrc_count(&self) -> usize {
        self.as_slice()
            .first()
            .map_or(0, |b| usize::from(b & CSRC_COUNT_MASK))
    }

    pub fn sequence_number(&self) -> Result<u16, RtpError> {
        Ok(BigEndian::read_u16(self.region(2, 2)?))
    }

    pub fn set_sequence_number(&mut self, seq: u16) -> Result<(), RtpError> {
        BigEndian::write_u16(self.region_mut(2, 2)?, seq);
        Ok(())
    }

    pub fn timestamp(&self) -> Result<u32, RtpError> {
        Ok(BigEndian::read_u32(self.region(4, 4)?))
    }

    pub fn ssrc(&self) -> Result<u32, RtpError> {
        Ok(BigEndian::read_u32(self.region(8, 4)?))
    }

    pub fn set_ssrc(&mut self, ssrc: u32) -> Result<(), RtpError> {
        BigEndian::write_u32(self.region_mut(8, 4)?, ssrc);
        Ok(())
    }

    /// Sender SSRC of an RTCP packet (second word of the common header).
    pub fn rtcp_sender_ssrc(&self) -> Result<u32, RtpError> {
        Ok(BigEndian::read_u32(self.region(4, 4)?))
    }

    /// Offset of the optional header extension, right after the CSRC list.
    #[must_use]
    pub fn extension_offset(&self) -> usize {
        RTP_FIXED_HEADER_LEN + 4 * self.csrc_count()
    }

    /// The 16-bit "defined by profile" field of the header extension.
    #[must_use]
    pub fn extension_header_type(&self) -> Option<u16> {
        if !self.has_extension() {
            return None;
        }
        self.region(self.extension_offset(), 2)
            .ok()
            .map(BigEndian::read_u16)
    }

    /// Length of the extension body in bytes (the wire value counts words).
    pub fn extension_length(&self) -> Result<usize, RtpError> {
        if !self.has_extension() {
            return Ok(0);
        }
        let words = self
            .region(self.extension_offset() + 2, 2)
            .map_err(|_| RtpError::HeaderExtensionTooShort)?;
        Ok(usize::from(BigEndian::read_u16(words)) * 4)
    }

    /// Fixed header, CSRC list and header extension.
    pub fn header_length(&self) -> Result<usize, RtpError> {
        let mut len = self.extension_offset();
        if self.has_extension() {
            len += RTP_EXT_HEADER_LEN + self.extension_length()?;
        }
        if len > self.length {
            return Err(RtpError::TooShort {
                need: len,
                have: self.length,
            });
        }
        Ok(len)
    }

    pub fn payload(&self) -> Result<&[u8], RtpError> {
        let start = self.header_length()?;
        Ok(&self.as_slice()[start..])
    }

    /// Copy of `len` bytes starting at `offset` inside the window.
    pub fn read_region(&self, offset: usize, len: usize) -> Result<Vec<u8>, RtpError> {
        self.region(offset, len).map(<[u8]>::to_vec)
    }

    fn region(&self, offset: usize, len: usize) -> Result<&[u8], RtpError> {
        let need = offset + len;
        if need > self.length {
            return Err(RtpError::TooShort {
                need,
                have: self.length,
            });
        }
        Ok(&self.as_slice()[offset..need])
    }

    fn region_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], RtpError> {
        let need = offset + len;
        if need > self.length {
            return Err(RtpError::TooShort {
                need,
                have: self.length,
            });
        }
        Ok(&mut self.as_mut_slice()[offset..need])
    }
}

impl From<Vec<u8>> for RawPacket {
    fn from(buffer: Vec<u8>) -> Self {
        Self::from_vec(buffer)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn rtp(seq: u16, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut b = vec![0x80, 0x60];
        b.extend_from_slice(&seq.to_be_bytes());
        b.extend_from_slice(&1234u32.to_be_bytes());
        b.extend_from_slice(&ssrc.to_be_bytes());
        b.extend_from_slice(payload);
        b
    }

    #[test]
    fn header_fields() {
        let p = RawPacket::from_vec(rtp(7, 0xDEAD_BEEF, b"abc"));
        assert_eq!(p.version(), 2);
        assert!(!p.has_extension());
        assert_eq!(p.sequence_number().unwrap(), 7);
        assert_eq!(p.timestamp().unwrap(), 1234);
        assert_eq!(p.ssrc().unwrap(), 0xDEAD_BEEF);
        assert_eq!(p.header_length().unwrap(), 12);
        assert_eq!(p.payload().unwrap(), b"abc");
        assert_eq!(p.extension_header_type(), None);
    }

    #[test]
    fn window_with_offset() {
        let mut buf = vec![0xAA; 3];
        buf.extend(rtp(9, 42, b"xy"));
        buf.push(0xBB);
        let mut p = RawPacket::new(buf, 3, 14).unwrap();
        assert_eq!(p.ssrc().unwrap(), 42);
        p.set_sequence_number(10).unwrap();
        p.set_ssrc(43).unwrap();
        let v = p.into_vec();
        assert_eq!(v.len(), 14);
        assert_eq!(&v[2..4], &10u16.to_be_bytes());
        assert_eq!(&v[8..12], &43u32.to_be_bytes());
    }

    #[test]
    fn extension_header_parsed() {
        let mut b = rtp(1, 1, &[]);
        b[0] |= 0x10;
        b.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 1, 2, 3, 4, 9]);
        let p = RawPacket::from_vec(b);
        assert_eq!(p.extension_header_type(), Some(0xBEDE));
        assert_eq!(p.extension_length().unwrap(), 4);
        assert_eq!(p.header_length().unwrap(), 20);
        assert_eq!(p.payload().unwrap(), &[9]);
    }

    #[test]
    fn truncated_buffers_error_instead_of_panicking() {
        let p = RawPacket::from_vec(vec![0x90, 0, 0]);
        assert!(matches!(p.ssrc(), Err(RtpError::TooShort { .. })));
        assert_eq!(p.extension_header_type(), None);
        assert!(p.header_length().is_err());
        assert!(RawPacket::new(vec![0; 4], 2, 3).is_err());
    }
}
