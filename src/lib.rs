#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod error;
mod internal;
pub mod platform;
mod raw;

extern crate alloc;

use crate::error::Error;
use crate::internal::Cursor;
use crate::platform::Platform;
use crate::raw::{ERASED_PAGE_ID, PAGE_HEADER_LEN, RECORD_HEADER_LEN, RecordMagic, record_len};
use alloc::vec::Vec;

/// A point-in-time view of the store: where the write cursor sits,
/// which pages carry which sequence ids and where each record lives.
/// Formatting is left to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    /// Page index currently receiving appends.
    pub write_page: usize,
    /// Byte offset of the write cursor within that page.
    pub write_offset: usize,
    /// Sequence id per page, `None` for erased pages.
    pub page_ids: Vec<Option<u16>>,
    /// Latest valid record per uid, `None` for absent records.
    pub records: Vec<Option<RecordLocation>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordLocation {
    /// Page index the record lives on.
    pub page: usize,
    /// Byte offset of the record header within that page.
    pub offset: usize,
    /// Stored payload size in bytes.
    pub size: usize,
}

/// A record store over a ring of flash pages.
///
/// `RECORDS` is the number of distinct record ids, `MAX_DATA` the
/// largest payload in bytes. The store keeps one index slot per record
/// id plus the write cursor in memory; everything else lives in flash.
///
/// One instance must own its flash region exclusively; process-wide
/// uniqueness is the application's concern.
pub struct RecordStore<T: Platform, const RECORDS: usize, const MAX_DATA: usize> {
    pub(crate) hal: T,
    pub(crate) base_address: usize,
    pub(crate) pages: usize,
    pub(crate) initialized: bool,
    pub(crate) cursor: Option<Cursor>,
    /// Partition-relative byte offsets of the newest valid record per
    /// uid.
    pub(crate) records: [Option<u32>; RECORDS],
}

impl<T: Platform, const RECORDS: usize, const MAX_DATA: usize> RecordStore<T, RECORDS, MAX_DATA> {
    /// Binds a store to a flash partition. Only validates the
    /// geometry; no flash is touched until [`init`](Self::init).
    pub fn new(partition_offset: usize, partition_size: usize, hal: T) -> Result<Self, Error> {
        const {
            assert!(RECORDS > 0 && RECORDS <= 256, "record ids must fit one byte");
            assert!(
                MAX_DATA > 0 && MAX_DATA <= u16::MAX as usize,
                "record sizes must fit 16 bit"
            );
        }

        if !partition_offset.is_multiple_of(T::ERASE_SIZE) {
            return Err(Error::InvalidPartitionOffset);
        }
        if !partition_size.is_multiple_of(T::ERASE_SIZE) || partition_size / T::ERASE_SIZE < 2 {
            return Err(Error::InvalidPartitionSize);
        }
        // the largest record has to fit one page behind the page
        // header, with one word to spare so the active page keeps an
        // end-of-content marker
        if PAGE_HEADER_LEN + record_len(MAX_DATA) >= T::ERASE_SIZE {
            return Err(Error::InvalidPartitionSize);
        }
        if !2usize.is_multiple_of(T::WRITE_SIZE) || T::READ_SIZE != 1 {
            return Err(Error::UnsupportedFlash);
        }

        Ok(Self {
            hal,
            base_address: partition_offset,
            pages: partition_size / T::ERASE_SIZE,
            initialized: false,
            cursor: None,
            records: [None; RECORDS],
        })
    }

    /// Scans the flash region, rebuilds the record index and locates
    /// the write cursor. Has to be called once before any other
    /// operation; a second call without an intervening
    /// [`format`](Self::format) is a no-op.
    ///
    /// On structural damage, and on fully erased flash, the region is
    /// erased and re-initialized when `allow_format` is set; otherwise
    /// the diagnostic error surfaces to the caller.
    pub fn init(&mut self, allow_format: bool) -> Result<(), Error> {
        if self.initialized {
            return Ok(());
        }

        match self.scan() {
            Ok(()) if self.cursor.is_some() => {
                self.initialized = true;
                Ok(())
            }
            // a scan of erased flash finds no write position; bootstrap
            // by formatting when we may
            Ok(()) => {
                if allow_format {
                    self.format()
                } else {
                    Err(Error::Corrupt)
                }
            }
            Err(e) => {
                if allow_format {
                    self.format()
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Erases all pages, stamps page 0 with sequence id 0 and re-runs
    /// the scan with formatting disabled.
    pub fn format(&mut self) -> Result<(), Error> {
        self.initialized = false;
        self.cursor = None;
        self.records = [None; RECORDS];

        for page in 0..self.pages {
            self.erase_page(page)?;
        }
        self.write_page_header(0, 0)?;
        self.init(false)
    }

    /// Persists a record. On success the index resolves `uid` to the
    /// new copy; on any error the previous copy, if any, stays in
    /// effect. Never partially succeeds.
    pub fn write(&mut self, uid: u8, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() || data.len() > MAX_DATA {
            return Err(Error::PayloadSize);
        }
        if uid as usize >= RECORDS {
            return Err(Error::InvalidUid);
        }
        if !self.initialized {
            return Err(Error::NotReady);
        }
        self.append(RecordMagic::Data, uid, data)
    }

    /// Copies up to `buf.len()` payload bytes of the latest record into
    /// `buf` and returns the count. Absent records, out-of-range uids
    /// and an empty `buf` all read as zero bytes; truncation is silent
    /// (compare against [`size`](Self::size) if it matters).
    pub fn read(&mut self, uid: u8, buf: &mut [u8]) -> Result<usize, Error> {
        if !self.initialized {
            return Err(Error::NotReady);
        }
        if uid as usize >= RECORDS || buf.is_empty() {
            return Ok(0);
        }
        let Some(offset) = self.records[uid as usize] else {
            return Ok(0);
        };

        let header = self.read_record_header(offset)?;
        let n = buf.len().min(header.size as usize);
        // the payload region and the footer data byte are contiguous,
        // so an odd trailing byte comes along in the same read
        self.read_flash(offset + RECORD_HEADER_LEN as u32, &mut buf[..n])?;
        Ok(n)
    }

    /// Stored payload size of the latest record, `None` when absent.
    pub fn size(&mut self, uid: u8) -> Result<Option<usize>, Error> {
        if !self.initialized {
            return Err(Error::NotReady);
        }
        if uid as usize >= RECORDS {
            return Ok(None);
        }
        match self.records[uid as usize] {
            Some(offset) => Ok(Some(self.read_record_header(offset)?.size as usize)),
            None => Ok(None),
        }
    }

    /// Appends a deletion marker and clears the index entry. Reads for
    /// `uid` return zero bytes from here on, across remounts, until the
    /// next [`write`](Self::write).
    pub fn delete(&mut self, uid: u8) -> Result<(), Error> {
        if uid as usize >= RECORDS {
            return Err(Error::InvalidUid);
        }
        if !self.initialized {
            return Err(Error::NotReady);
        }
        self.append(RecordMagic::Tombstone, uid, &[])
    }

    /// Returns detailed statistics about the partition state.
    pub fn statistics(&mut self) -> Result<Statistics, Error> {
        if !self.initialized {
            return Err(Error::NotReady);
        }
        let cursor = self.cursor.ok_or(Error::NotReady)?;

        let mut page_ids = Vec::with_capacity(self.pages);
        for page in 0..self.pages {
            let id = self.page_id(page)?;
            page_ids.push((id != ERASED_PAGE_ID).then_some(id));
        }

        let mut records = Vec::with_capacity(RECORDS);
        for uid in 0..RECORDS {
            match self.records[uid] {
                Some(offset) => {
                    let header = self.read_record_header(offset)?;
                    records.push(Some(RecordLocation {
                        page: offset as usize / T::ERASE_SIZE,
                        offset: offset as usize % T::ERASE_SIZE,
                        size: header.size as usize,
                    }));
                }
                None => records.push(None),
            }
        }

        Ok(Statistics {
            write_page: cursor.page,
            write_offset: cursor.offset,
            page_ids,
            records,
        })
    }
}
