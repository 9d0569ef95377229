//! Routing-header wire codec.
//!
//! Every multicast message carries a fixed eight-byte envelope: a packed
//! `id` field holding the service identity in the high sixteen bits and the
//! function identity in the low sixteen, and a `size` field covering the
//! whole message. The envelope is written in the sender's native byte order;
//! a receiver of the opposite byte order swaps it exactly once before
//! routing.

/// Length in bytes of the routing header on the wire.
pub const HEADER_LEN: usize = 8;

/// Packs a service/function pair into the wire `id` field.
pub fn pack_id(service_id: u16, function_id: u16) -> u32 {
    (u32::from(service_id) << 16) | u32::from(function_id)
}

/// The fixed envelope prefixing every dispatched message.
///
/// Lifetime is one dispatch call; the header is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingHeader {
    /// Packed service/function identity.
    pub id: u32,
    /// Total message size in bytes, header included.
    pub size: u32,
}

impl RoutingHeader {
    /// Builds a header addressed to `function_id` of `service_id`.
    pub fn new(service_id: u16, function_id: u16, size: u32) -> Self {
        Self {
            id: pack_id(service_id, function_id),
            size,
        }
    }

    /// Reads a header from the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Bytes are interpreted in native order; callers holding foreign-order
    /// input swap afterwards with [`RoutingHeader::swab`]. Returns `None`
    /// when the buffer is shorter than a header.
    pub fn read_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let id = u32::from_ne_bytes(buf[0..4].try_into().ok()?);
        let size = u32::from_ne_bytes(buf[4..8].try_into().ok()?);
        Some(Self { id, size })
    }

    /// Writes the header into the first [`HEADER_LEN`] bytes of `buf` in
    /// native order.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`HEADER_LEN`].
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.id.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.size.to_ne_bytes());
    }

    /// Byte-swaps both fields, correcting a header produced on a system of
    /// the opposite byte order.
    pub fn swab(&mut self) {
        self.id = self.id.swap_bytes();
        self.size = self.size.swap_bytes();
    }

    /// Service identity (high half of `id`).
    pub fn service_id(&self) -> u16 {
        (self.id >> 16) as u16
    }

    /// Function identity (low half of `id`).
    pub fn function_id(&self) -> u16 {
        (self.id & 0xffff) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack() {
        let header = RoutingHeader::new(3, 2, 128);
        assert_eq!(header.service_id(), 3);
        assert_eq!(header.function_id(), 2);
        assert_eq!(header.id, 0x0003_0002);
        assert_eq!(header.size, 128);
    }

    #[test]
    fn round_trip_through_bytes() {
        let header = RoutingHeader::new(7, 41, 4196);
        let mut buf = [0u8; HEADER_LEN];
        header.write_to(&mut buf);
        assert_eq!(RoutingHeader::read_from(&buf), Some(header));
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(RoutingHeader::read_from(&[0u8; HEADER_LEN - 1]), None);
    }

    #[test]
    fn swab_corrects_a_foreign_header() {
        // A sender of the opposite byte order presents its fields swapped
        // relative to us; one swab restores them.
        let foreign = RoutingHeader {
            id: pack_id(3, 2).swap_bytes(),
            size: 512u32.swap_bytes(),
        };
        let mut corrected = foreign;
        corrected.swab();
        assert_eq!(corrected.service_id(), 3);
        assert_eq!(corrected.function_id(), 2);
        assert_eq!(corrected.size, 512);
    }

    #[test]
    fn swab_twice_is_identity() {
        let header = RoutingHeader::new(1, 9, 64);
        let mut swapped = header;
        swapped.swab();
        swapped.swab();
        assert_eq!(swapped, header);
    }
}
