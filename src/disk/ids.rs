//! Identifier generation for disk images.
//!
//! All identifiers are drawn from the caller's random source so that a fixed
//! seed reproduces the same table.

use rand::RngCore;
use uuid::Builder;

/// Random RFC 4122 version 4 UUID, lower case.
pub fn new_uuid<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    Builder::from_random_bytes(bytes).into_uuid().to_string()
}

/// Random FAT volume serial (8 hex chars, e.g., "ABCD-1234").
pub fn new_vfat_serial<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let serial = rng.next_u32();
    format!("{:04X}-{:04X}", serial >> 16, serial & 0xffff)
}

/// Random DOS disk identifier, e.g. "0x1b2c3d4e".
pub fn new_dos_disk_id<R: RngCore + ?Sized>(rng: &mut R) -> String {
    format!("0x{:08x}", rng.next_u32())
}
