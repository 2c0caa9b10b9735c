//! Raw sector access to a disk or disk image.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    topology::DEFAULT_SECTOR_SIZE,
};

/// An open disk, addressed in bytes or in logical sectors.
///
/// Generic over its storage so that labels can be read from and written to in-memory images.
///
/// ```
/// use std::io::Cursor;
/// use fzdisk::device::DeviceHandle;
///
/// let mut handle = DeviceHandle::from_storage(Cursor::new(vec![0u8; 4096]), 512);
/// handle.write_sectors(2, &[0xAB; 512]).unwrap();
///
/// let sector = handle.read_sectors(2, 1).unwrap();
/// assert_eq!(sector[511], 0xAB);
/// assert_eq!(handle.size_bytes().unwrap(), 4096);
/// ```
#[derive(Debug)]
pub struct DeviceHandle<D = File> {
    storage: D,
    path: PathBuf,
    read_only: bool,
    sector_size: u64,
}

impl DeviceHandle<File> {
    /// Opens `path`, for writing unless `read_only` is set.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();

        let storage = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                    path: path.to_path_buf(),
                    source,
                },
                _ => Error::DeviceUnavailable {
                    path: path.to_path_buf(),
                    source,
                },
            })?;

        log::debug!(
            "opened {} ({})",
            path.display(),
            if read_only { "read-only" } else { "read-write" }
        );

        Ok(Self {
            storage,
            path: path.to_path_buf(),
            read_only,
            sector_size: DEFAULT_SECTOR_SIZE,
        })
    }

    /// Flushes written data down to the device.
    pub fn sync(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }

        self.storage.flush()?;
        self.storage.sync_all()?;

        Ok(())
    }
}

impl<D> DeviceHandle<D> {
    /// Wraps an already open storage, writable, with `sector_size`-byte sectors.
    pub fn from_storage(storage: D, sector_size: u64) -> Self {
        Self {
            storage,
            path: PathBuf::new(),
            read_only: false,
            sector_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub(crate) fn set_sector_size(&mut self, sector_size: u64) {
        self.sector_size = sector_size;
    }

    pub fn storage(&self) -> &D {
        &self.storage
    }

    pub fn into_storage(self) -> D {
        self.storage
    }

    fn sector_offset(&self, lba: u64) -> Result<u64> {
        lba.checked_mul(self.sector_size)
            .ok_or(Error::InvalidArgument("sector address out of range"))
    }
}

impl<D: Read + Seek> DeviceHandle<D> {
    /// Total size of the storage, in bytes.
    pub fn size_bytes(&mut self) -> Result<u64> {
        let size = self.storage.seek(SeekFrom::End(0))?;
        self.storage.rewind()?;

        Ok(size)
    }

    /// Fills `buf` from byte `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        log::trace!("read {} bytes at offset {}", buf.len(), offset);

        self.storage.seek(SeekFrom::Start(offset))?;
        self.storage.read_exact(buf)?;

        Ok(())
    }

    /// Reads `count` sectors starting at `lba`.
    pub fn read_sectors(&mut self, lba: u64, count: u64) -> Result<Vec<u8>> {
        let len = count
            .checked_mul(self.sector_size)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or(Error::InvalidArgument("read request too large"))?;
        let offset = self.sector_offset(lba)?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);

        self.read_at(offset, &mut buf)?;

        Ok(buf)
    }
}

impl<D: Write + Seek> DeviceHandle<D> {
    /// Writes `buf` at byte `offset`.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        log::trace!("write {} bytes at offset {}", buf.len(), offset);

        self.storage.seek(SeekFrom::Start(offset))?;
        self.storage.write_all(buf)?;

        Ok(())
    }

    /// Writes `buf` at sector `lba`. `buf` must be a whole number of sectors.
    pub fn write_sectors(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        if buf.len() as u64 % self.sector_size != 0 {
            return Err(Error::InvalidArgument(
                "buffer is not a whole number of sectors",
            ));
        }

        let offset = self.sector_offset(lba)?;

        self.write_at(offset, buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.storage.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::DeviceHandle;
    use crate::error::{Error, ErrorKind};

    #[test]
    fn sector_addressing() {
        let mut handle = DeviceHandle::from_storage(Cursor::new(vec![0u8; 8 * 512]), 512);

        handle.write_sectors(3, &[7u8; 1024]).unwrap();
        handle.flush().unwrap();

        let image = handle.into_storage().into_inner();
        assert!(image[..3 * 512].iter().all(|&b| b == 0));
        assert!(image[3 * 512..5 * 512].iter().all(|&b| b == 7));
        assert!(image[5 * 512..].iter().all(|&b| b == 0));
    }

    #[test]
    fn partial_sector_write_is_rejected() {
        let mut handle = DeviceHandle::from_storage(Cursor::new(vec![0u8; 1024]), 512);

        assert!(matches!(
            handle.write_sectors(0, &[0u8; 100]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn reads_past_the_end_fail() {
        let mut handle = DeviceHandle::from_storage(Cursor::new(vec![0u8; 1024]), 512);

        let err = handle.read_sectors(1, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn huge_sector_addresses_are_rejected() {
        let mut handle = DeviceHandle::from_storage(Cursor::new(vec![0u8; 1024]), 512);

        assert!(matches!(
            handle.read_sectors(u64::MAX / 2, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            handle.read_sectors(0, u64::MAX / 2),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            handle.write_sectors(u64::MAX / 2, &[0u8; 512]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn missing_device() {
        let err = DeviceHandle::open("/nonexistent/fzdisk-test-device", true).unwrap_err();

        assert!(matches!(err, Error::DeviceUnavailable { .. }));
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
