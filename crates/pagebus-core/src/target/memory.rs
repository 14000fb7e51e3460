use super::TargetReject;

/// Read/write byte store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamTarget {
    bytes: Box<[u8]>,
}

impl RamTarget {
    /// Allocates zeroed RAM.
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self::filled(size, 0)
    }

    /// Allocates RAM with every byte set to `fill`.
    #[must_use]
    pub fn filled(size: u32, fill: u8) -> Self {
        Self {
            bytes: vec![fill; size as usize].into_boxed_slice(),
        }
    }

    /// Wraps existing contents.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Size in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Returns `true` for zero-sized RAM.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn read(&self, offset: u32) -> Result<u8, TargetReject> {
        self.bytes
            .get(offset as usize)
            .copied()
            .ok_or(TargetReject::Unbacked)
    }

    pub(crate) fn write(&mut self, offset: u32, value: u8) -> Result<(), TargetReject> {
        let byte = self
            .bytes
            .get_mut(offset as usize)
            .ok_or(TargetReject::Unbacked)?;
        *byte = value;
        Ok(())
    }
}

/// Read-only byte store. Only debug pokes may patch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomTarget {
    image: Box<[u8]>,
}

impl RomTarget {
    /// Wraps a ROM image.
    #[must_use]
    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            image: image.into_boxed_slice(),
        }
    }

    /// Creates a ROM of `size` bytes all equal to `fill`.
    #[must_use]
    pub fn filled(size: u32, fill: u8) -> Self {
        Self::from_image(vec![fill; size as usize])
    }

    /// Size in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u32 {
        self.image.len() as u32
    }

    /// Returns `true` for an empty image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Raw image.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    pub(crate) fn read(&self, offset: u32) -> Result<u8, TargetReject> {
        self.image
            .get(offset as usize)
            .copied()
            .ok_or(TargetReject::Unbacked)
    }

    pub(crate) fn patch(&mut self, offset: u32, value: u8) -> Result<(), TargetReject> {
        let byte = self
            .image
            .get_mut(offset as usize)
            .ok_or(TargetReject::Unbacked)?;
        *byte = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{RamTarget, RomTarget};
    use crate::target::TargetReject;

    #[test]
    fn ram_reads_back_writes_and_rejects_out_of_range() {
        let mut ram = RamTarget::new(4);
        assert_eq!(ram.write(3, 0x5A), Ok(()));
        assert_eq!(ram.read(3), Ok(0x5A));
        assert_eq!(ram.read(4), Err(TargetReject::Unbacked));
        assert_eq!(ram.write(4, 0), Err(TargetReject::Unbacked));
    }

    #[test]
    fn rom_patch_changes_image() {
        let mut rom = RomTarget::filled(2, 0xEA);
        assert_eq!(rom.read(1), Ok(0xEA));
        assert_eq!(rom.patch(1, 0x60), Ok(()));
        assert_eq!(rom.as_bytes(), &[0xEA, 0x60]);
    }
}
