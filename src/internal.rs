use crate::RecordStore;
use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{
    ERASED_PAGE_ID, PAGE_HEADER_LEN, PageHeader, RECORD_HEADER_LEN, RecordHeader, RecordMagic,
    next_page_id, record_len, split_payload,
};
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Write position: a page of the ring plus a byte offset inside it.
/// `offset` may equal the page size when the page is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    pub(crate) page: usize,
    pub(crate) offset: usize,
}

impl<T: Platform, const RECORDS: usize, const MAX_DATA: usize> RecordStore<T, RECORDS, MAX_DATA> {
    pub(crate) fn read_flash(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.hal
            .read(self.base_address as u32 + offset, buf)
            .map_err(|_| Error::Flash)
    }

    pub(crate) fn read_record_header(&mut self, offset: u32) -> Result<RecordHeader, Error> {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        self.read_flash(offset, &mut buf)?;
        Ok(RecordHeader::from_bytes(&buf))
    }

    /// Sequence id of a page; [`ERASED_PAGE_ID`] when erased or damaged.
    pub(crate) fn page_id(&mut self, page: usize) -> Result<u16, Error> {
        let mut buf = [0u8; PAGE_HEADER_LEN];
        self.read_flash((page * T::ERASE_SIZE) as u32, &mut buf)?;
        Ok(PageHeader::parse_id(&buf, T::crc8))
    }

    pub(crate) fn erase_page(&mut self, page: usize) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_page: {}", page);

        let from = (self.base_address + page * T::ERASE_SIZE) as u32;
        self.hal
            .erase(from, from + T::ERASE_SIZE as u32)
            .map_err(|_| Error::Flash)
    }

    /// Programs at the cursor and advances it. Record layout keeps the
    /// byte count even and the cursor on the 16-bit grid.
    fn program(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let cursor = self.cursor.ok_or(Error::NotReady)?;
        let addr = (self.base_address + cursor.page * T::ERASE_SIZE + cursor.offset) as u32;
        self.hal.write(addr, bytes).map_err(|_| Error::Flash)?;
        self.cursor = Some(Cursor {
            page: cursor.page,
            offset: cursor.offset + bytes.len(),
        });
        Ok(())
    }

    /// CRC-8 residual over a freshly programmed region; a zero residual
    /// proves the flash holds exactly the bytes that were written.
    fn verify(&mut self, start: Cursor, len: usize) -> Result<(), Error> {
        let base = (start.page * T::ERASE_SIZE + start.offset) as u32;
        let mut crc = 0u8;
        let mut buf = [0u8; 32];
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(buf.len());
            self.read_flash(base + done as u32, &mut buf[..chunk])?;
            crc = T::crc8(crc, &buf[..chunk]);
            done += chunk;
        }
        if crc != 0 {
            return Err(Error::Crc);
        }
        Ok(())
    }

    /// Stamps a page header and moves the cursor to the page's content
    /// area.
    pub(crate) fn write_page_header(&mut self, page: usize, id: u16) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_page_header: page {} id {}", page, id);

        let start = Cursor { page, offset: 0 };
        self.cursor = Some(start);
        if let Err(e) = self.program(&PageHeader { id }.to_bytes(T::crc8)) {
            self.cursor = Some(Cursor {
                page,
                offset: PAGE_HEADER_LEN,
            });
            return Err(e);
        }
        self.verify(start, PAGE_HEADER_LEN)
    }

    /// Rebuilds the record index and locates the write cursor from the
    /// on-flash log. Leaves the cursor unset on fully erased flash.
    pub(crate) fn scan(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("scan: {} pages", self.pages);

        self.records = [None; RECORDS];
        self.cursor = None;

        let mut ids = Vec::with_capacity(self.pages);
        for page in 0..self.pages {
            ids.push(self.page_id(page)?);
        }

        // ring neighbours must never carry the same id
        for page in 0..self.pages {
            if ids[page] != ERASED_PAGE_ID && ids[page] == ids[(page + 1) % self.pages] {
                return Err(Error::Corrupt);
            }
        }

        // Walking the ring from just behind an erased page visits the
        // log oldest page first: index replay happens in log order and
        // the last page of the walk is the active one.
        let anchor = match ids.iter().position(|&id| id == ERASED_PAGE_ID) {
            Some(page) => page,
            // An interrupted rotation can leave no page erased; the
            // ring then has exactly one sequence gap, right after the
            // active page. Ids advance by 1, or by 2 across the skipped
            // erased sentinel.
            None => {
                let mut gap = None;
                for page in 0..self.pages {
                    let delta = ids[(page + 1) % self.pages].wrapping_sub(ids[page]);
                    if delta > 2 && gap.replace(page).is_some() {
                        return Err(Error::Corrupt);
                    }
                }
                gap.ok_or(Error::Corrupt)?
            }
        };

        let mut run = Vec::with_capacity(self.pages);
        for step in 1..=self.pages {
            let page = (anchor + step) % self.pages;
            if ids[page] != ERASED_PAGE_ID {
                run.push(page);
            }
        }

        let Some((&active, closed)) = run.split_last() else {
            // fully erased flash; init() decides whether to bootstrap
            return Ok(());
        };
        for &page in closed {
            self.scan_page(page, false)?;
        }
        self.scan_page(active, true)
    }

    /// Replays one page's record stream. Only the active page may set
    /// the write cursor.
    ///
    /// A record that fails its checksum is skipped, not an error: a
    /// write torn by power loss leaves exactly such a record at the log
    /// tail, and rotation can later close the page around it.
    fn scan_page(&mut self, page: usize, active: bool) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("scan_page: {} active {}", page, active);

        let base = (page * T::ERASE_SIZE) as u32;
        let mut offset = PAGE_HEADER_LEN;

        while offset + RECORD_HEADER_LEN <= T::ERASE_SIZE {
            let mut head = [0u8; RECORD_HEADER_LEN];
            self.read_flash(base + offset as u32, &mut head)?;

            if head == [0xFF; RECORD_HEADER_LEN] {
                // end of page content
                if active {
                    self.cursor = Some(Cursor { page, offset });
                }
                return Ok(());
            }

            let header = RecordHeader::from_bytes(&head);
            if header.uid as usize >= RECORDS {
                // neither erased nor one of ours
                return Err(Error::Data);
            }

            let len = record_len(header.size as usize);
            if offset + len > T::ERASE_SIZE {
                // a committed record never crosses the page end; this is
                // the torn half of a record header, the rest of the page
                // holds nothing
                break;
            }

            let mut record = vec![0u8; len];
            self.read_flash(base + offset as u32, &mut record)?;

            if T::crc8(0, &record) == 0 {
                match RecordMagic::from_repr(header.magic) {
                    Some(RecordMagic::Data) => {
                        self.records[header.uid as usize] = Some(base + offset as u32);
                    }
                    Some(RecordMagic::Tombstone) => {
                        self.records[header.uid as usize] = None;
                    }
                    None => {
                        #[cfg(feature = "defmt")]
                        warn!("unknown record magic {:#x}", header.magic);
                        #[cfg(feature = "debug-logs")]
                        println!("internal: unknown record magic {:#x}", header.magic);
                    }
                }
            } else {
                #[cfg(feature = "defmt")]
                warn!("skipping torn record at page {} offset {}", page, offset);
                #[cfg(feature = "debug-logs")]
                println!("internal: skipping torn record at page {page} offset {offset}");
            }

            offset += len;
        }

        if active {
            // no erased word left; the next append rotates
            self.cursor = Some(Cursor {
                page,
                offset: T::ERASE_SIZE,
            });
        }
        Ok(())
    }

    /// Appends one record: header, even payload, then the footer word
    /// carrying the final payload byte and the checksum. The index is
    /// only touched once the readback checksum proves the record.
    pub(crate) fn append(&mut self, magic: RecordMagic, uid: u8, data: &[u8]) -> Result<(), Error> {
        let header = RecordHeader {
            magic: magic as u8,
            uid,
            size: data.len() as u16,
        };
        let (even, spare) = split_payload(data);
        let len = record_len(data.len());

        let cursor = self.cursor.ok_or(Error::NotReady)?;
        if cursor.offset + len >= T::ERASE_SIZE {
            self.switch_page(uid)?;
        }

        let start = self.cursor.ok_or(Error::NotReady)?;
        if start.offset + len >= T::ERASE_SIZE {
            // even after a rotation the record has to fit the active page
            return Err(Error::Corrupt);
        }

        #[cfg(feature = "defmt")]
        trace!(
            "append: uid {} len {} at page {} offset {}",
            uid, len, start.page, start.offset
        );

        let head = header.to_bytes();
        let mut crc = T::crc8(0, &head);
        crc = T::crc8(crc, even);
        crc = T::crc8(crc, &[spare]);
        let footer = [spare, crc];

        if let Err(e) = self.program_record(&head, even, &footer) {
            // how much of the record reached the flash is unknown, so
            // retire the page; the next append rotates away and the
            // scan skips whatever is left here
            self.cursor = Some(Cursor {
                page: start.page,
                offset: T::ERASE_SIZE,
            });
            return Err(e);
        }
        self.verify(start, len)?;

        let offset = (start.page * T::ERASE_SIZE + start.offset) as u32;
        self.records[uid as usize] = match magic {
            RecordMagic::Data => Some(offset),
            RecordMagic::Tombstone => None,
        };
        Ok(())
    }

    fn program_record(&mut self, head: &[u8], even: &[u8], footer: &[u8]) -> Result<(), Error> {
        self.program(head)?;
        if !even.is_empty() {
            self.program(even)?;
        }
        self.program(footer)
    }

    /// Moves the cursor onto the buffer page and recycles the page
    /// after it: still-live records are carried over first, then the
    /// recycled page is erased. The triggering uid is left behind; its
    /// caller is about to append a fresh version anyway.
    pub(crate) fn switch_page(&mut self, trigger_uid: u8) -> Result<(), Error> {
        let cursor = self.cursor.ok_or(Error::NotReady)?;
        let page = cursor.page;

        #[cfg(feature = "defmt")]
        trace!("switch_page: from {} trigger uid {}", page, trigger_uid);

        let id = self.page_id(page)?;
        let next = (page + 1) % self.pages;
        if self.page_id(next)? != ERASED_PAGE_ID {
            return Err(Error::Corrupt);
        }
        if let Err(e) = self.write_page_header(next, next_page_id(id)) {
            // the new page has no valid header, so nothing written there
            // would survive a remount; stay on the old page
            self.cursor = Some(cursor);
            return Err(e);
        }

        let recycle = (next + 1) % self.pages;
        for uid in 0..RECORDS {
            if uid == trigger_uid as usize {
                continue;
            }
            let Some(offset) = self.records[uid] else {
                continue;
            };
            if offset as usize / T::ERASE_SIZE == recycle {
                self.relocate(uid)?;
            }
        }
        self.erase_page(recycle)
    }

    /// Copies a record verbatim to the cursor; the copy carries the
    /// original checksum, so the readback proves the destination.
    fn relocate(&mut self, uid: usize) -> Result<(), Error> {
        let source = self.records[uid].ok_or(Error::Corrupt)?;
        let header = self.read_record_header(source)?;
        let len = record_len(header.size as usize);

        #[cfg(feature = "defmt")]
        trace!("relocate: uid {} len {}", uid, len);

        let start = self.cursor.ok_or(Error::NotReady)?;
        if start.offset + len > T::ERASE_SIZE {
            // records never cross a page boundary
            return Err(Error::Corrupt);
        }

        let mut record = vec![0u8; len];
        self.read_flash(source, &mut record)?;

        if let Err(e) = self.program(&record) {
            // same as a failed append: retire the page
            self.cursor = Some(Cursor {
                page: start.page,
                offset: T::ERASE_SIZE,
            });
            return Err(e);
        }
        self.verify(start, len)?;

        self.records[uid] = Some((start.page * T::ERASE_SIZE + start.offset) as u32);
        Ok(())
    }
}
