//! Persistent log on the SD card.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use dht_node_core::logging::{LogEntry, LogStore, MemoryLogStore, StoreError};
use embedded_sdmmc::{BlockDevice, Mode, TimeSource, Timestamp, VolumeIdx, VolumeManager};

/// How far back from the end of the file `load_recent` reads
const TAIL_WINDOW: u32 = 4096;

/// Fixed file time. The node has no wall clock.
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 54,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Appends records to one file in the card's root directory.
///
/// Every operation opens and closes the volume, so a card pulled between
/// writes fails that write only.
pub struct SdCardLogStore<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    volume_mgr: VolumeManager<D, T, 4, 4, 1>,
    file_name: &'static str,
}

impl<D, T> SdCardLogStore<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    pub fn new(device: D, time_source: T, file_name: &'static str) -> Self {
        Self {
            volume_mgr: VolumeManager::new(device, time_source),
            file_name,
        }
    }

    fn read_tail(&self) -> Result<(Vec<u8>, bool), embedded_sdmmc::Error<D::Error>> {
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        let file = match root_dir.open_file_in_dir(self.file_name, Mode::ReadOnly) {
            Ok(file) => file,
            Err(embedded_sdmmc::Error::NotFound) => return Ok((Vec::new(), false)),
            Err(e) => return Err(e),
        };

        let length = file.length();
        let start = length.saturating_sub(TAIL_WINDOW);
        file.seek_from_start(start)?;

        let mut tail = vec![0u8; (length - start) as usize];
        let mut filled = 0;
        while filled < tail.len() {
            match file.read(&mut tail[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        tail.truncate(filled);

        file.close()?;
        root_dir.close()?;
        volume.close()?;
        Ok((tail, start > 0))
    }
}

impl<D, T> LogStore for SdCardLogStore<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        let mut line = String::new();
        entry.write_record(&mut line).map_err(|_| StoreError::Write)?;

        let volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|_| StoreError::Unavailable)?;
        let root_dir = volume.open_root_dir().map_err(|_| StoreError::Unavailable)?;
        let file = root_dir
            .open_file_in_dir(self.file_name, Mode::ReadWriteCreateOrAppend)
            .map_err(|_| StoreError::Write)?;
        file.write(line.as_bytes()).map_err(|_| StoreError::Write)?;

        file.close().map_err(|_| StoreError::Write)?;
        root_dir.close().map_err(|_| StoreError::Write)?;
        volume.close().map_err(|_| StoreError::Write)?;
        Ok(())
    }

    fn load_recent(&mut self, max: usize) -> Result<Vec<LogEntry>, StoreError> {
        let (tail, clipped) = self.read_tail().map_err(|_| StoreError::Read)?;
        let text = match core::str::from_utf8(&tail) {
            Ok(text) => text,
            Err(e) => core::str::from_utf8(&tail[..e.valid_up_to()]).unwrap_or_default(),
        };

        let mut lines = text.lines();
        if clipped {
            // First line was cut by the window start
            lines.next();
        }
        let mut entries: Vec<LogEntry> = lines.filter_map(LogEntry::parse_record).collect();
        entries.reverse();
        entries.truncate(max);
        Ok(entries)
    }
}

/// The SD card when one answered at boot, RAM otherwise.
pub enum FirmwareLogStore<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    SdCard(SdCardLogStore<D, T>),
    Memory(MemoryLogStore),
}

impl<D, T> LogStore for FirmwareLogStore<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        match self {
            Self::SdCard(store) => store.append(entry),
            Self::Memory(store) => store.append(entry),
        }
    }

    fn load_recent(&mut self, max: usize) -> Result<Vec<LogEntry>, StoreError> {
        match self {
            Self::SdCard(store) => store.load_recent(max),
            Self::Memory(store) => store.load_recent(max),
        }
    }
}
