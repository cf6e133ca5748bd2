//! Shared-memory position region
//!
//! A fixed-size array of packed 128-byte records memory-mapped at a
//! well-known path so out-of-process readers can map the same file.
//! The numeric fields are little-endian `f64` copies of the decimal
//! source of truth; the conversion is inherently lossy and the region
//! is only ever a projection of the in-memory map.
//!
//! Record layout (offsets in bytes):
//!
//! | 0..16    | symbol, zero-padded ASCII          |
//! | 16..28   | venue, zero-padded ASCII           |
//! | 28..36   | market, zero-padded ASCII          |
//! | 36..40   | side, zero-padded ASCII            |
//! | 40..88   | f64: quantity, entry, mark, unrealized PnL, realized PnL, margin |
//! | 88..92   | i32 leverage                       |
//! | 92..100  | i64 updated-at, Unix seconds       |
//! | 100..128 | zero padding                       |
//!
//! A slot is empty when both the symbol and venue fields begin with a
//! zero byte. Slot assignment scans linearly from index 0 for the first
//! empty or matching slot; a full region is a capacity error.

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;
use services_common::constants::shm::{MARKET_LEN, SIDE_LEN, SLOT_SIZE, SYMBOL_LEN, VENUE_LEN};
use services_common::{OmsError, OmsResult};
use std::fs::OpenOptions;
use std::path::Path;
use tracing::info;

const OFF_SYMBOL: usize = 0;
const OFF_VENUE: usize = OFF_SYMBOL + SYMBOL_LEN;
const OFF_MARKET: usize = OFF_VENUE + VENUE_LEN;
const OFF_SIDE: usize = OFF_MARKET + MARKET_LEN;
const OFF_QUANTITY: usize = OFF_SIDE + SIDE_LEN;
const OFF_ENTRY: usize = OFF_QUANTITY + 8;
const OFF_MARK: usize = OFF_ENTRY + 8;
const OFF_UNREALIZED: usize = OFF_MARK + 8;
const OFF_REALIZED: usize = OFF_UNREALIZED + 8;
const OFF_MARGIN: usize = OFF_REALIZED + 8;
const OFF_LEVERAGE: usize = OFF_MARGIN + 8;
const OFF_UPDATED: usize = OFF_LEVERAGE + 4;

/// One decoded shared-memory record
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRecord {
    /// Trading symbol
    pub symbol: String,
    /// Venue identifier
    pub venue: String,
    /// Market tag, "spot" or "futures"
    pub market: String,
    /// Side tag, "LONG" or "SHORT"
    pub side: String,
    /// Signed quantity
    pub quantity: f64,
    /// Average entry price
    pub entry_price: f64,
    /// Latest mark price
    pub mark_price: f64,
    /// Unrealized PnL
    pub unrealized_pnl: f64,
    /// Realized PnL
    pub realized_pnl: f64,
    /// Margin allocated
    pub margin_used: f64,
    /// Leverage
    pub leverage: i32,
    /// Unix seconds of the last update
    pub updated_at: i64,
}

/// Memory-mapped slot array
pub struct SharedMemoryRegion {
    mmap: MmapMut,
    slots: usize,
}

impl SharedMemoryRegion {
    /// Open (creating if necessary) the region at `path` with `slots`
    /// record slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be created, sized or
    /// mapped.
    pub fn open(path: &Path, slots: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening shared-memory file {}", path.display()))?;

        let len = (slots * SLOT_SIZE) as u64;
        file.set_len(len)
            .with_context(|| format!("sizing shared-memory file to {len} bytes"))?;

        // SAFETY: the file is exclusively sized above; out-of-process
        // readers map it read-only and tolerate torn reads by contract.
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("mapping {}", path.display()))?;

        info!(path = %path.display(), slots, "shared-memory position region mapped");
        Ok(Self { mmap, slots })
    }

    /// Number of slots in the region
    #[must_use]
    pub const fn slot_count(&self) -> usize {
        self.slots
    }

    fn slot(&self, index: usize) -> &[u8] {
        &self.mmap[index * SLOT_SIZE..(index + 1) * SLOT_SIZE]
    }

    fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.mmap[index * SLOT_SIZE..(index + 1) * SLOT_SIZE]
    }

    fn slot_is_empty(&self, index: usize) -> bool {
        let slot = self.slot(index);
        slot[OFF_SYMBOL] == 0 && slot[OFF_VENUE] == 0
    }

    fn slot_matches(&self, index: usize, symbol: &str, venue: &str) -> bool {
        let slot = self.slot(index);
        read_tag(&slot[OFF_SYMBOL..OFF_SYMBOL + SYMBOL_LEN]) == symbol
            && read_tag(&slot[OFF_VENUE..OFF_VENUE + VENUE_LEN]) == venue
    }

    /// Find the slot for (symbol, venue): the first slot that is empty
    /// or already holds the same key. Linear scan from index 0.
    #[must_use]
    pub fn find_slot(&self, symbol: &str, venue: &str) -> Option<usize> {
        (0..self.slots).find(|&i| self.slot_is_empty(i) || self.slot_matches(i, symbol, venue))
    }

    /// Write `record` into the slot assigned to its key.
    ///
    /// # Errors
    ///
    /// Returns [`OmsError::Capacity`] when no slot is free; the caller
    /// must not mutate its in-memory state in that case.
    pub fn store(&mut self, record: &SlotRecord) -> OmsResult<usize> {
        let index = self
            .find_slot(&record.symbol, &record.venue)
            .ok_or_else(|| OmsError::Capacity {
                details: format!(
                    "shared-memory region full ({} slots), cannot store {}:{}",
                    self.slots, record.venue, record.symbol
                ),
            })?;
        self.write_slot(index, record);
        Ok(index)
    }

    /// Encode `record` into slot `index`
    pub fn write_slot(&mut self, index: usize, record: &SlotRecord) {
        let slot = self.slot_mut(index);
        write_tag(&mut slot[OFF_SYMBOL..OFF_SYMBOL + SYMBOL_LEN], &record.symbol);
        write_tag(&mut slot[OFF_VENUE..OFF_VENUE + VENUE_LEN], &record.venue);
        write_tag(&mut slot[OFF_MARKET..OFF_MARKET + MARKET_LEN], &record.market);
        write_tag(&mut slot[OFF_SIDE..OFF_SIDE + SIDE_LEN], &record.side);
        LittleEndian::write_f64(&mut slot[OFF_QUANTITY..], record.quantity);
        LittleEndian::write_f64(&mut slot[OFF_ENTRY..], record.entry_price);
        LittleEndian::write_f64(&mut slot[OFF_MARK..], record.mark_price);
        LittleEndian::write_f64(&mut slot[OFF_UNREALIZED..], record.unrealized_pnl);
        LittleEndian::write_f64(&mut slot[OFF_REALIZED..], record.realized_pnl);
        LittleEndian::write_f64(&mut slot[OFF_MARGIN..], record.margin_used);
        LittleEndian::write_i32(&mut slot[OFF_LEVERAGE..], record.leverage);
        LittleEndian::write_i64(&mut slot[OFF_UPDATED..], record.updated_at);
    }

    /// Decode slot `index`; `None` when the slot is empty
    #[must_use]
    pub fn read_slot(&self, index: usize) -> Option<SlotRecord> {
        if self.slot_is_empty(index) {
            return None;
        }
        let slot = self.slot(index);
        Some(SlotRecord {
            symbol: read_tag(&slot[OFF_SYMBOL..OFF_SYMBOL + SYMBOL_LEN]).to_string(),
            venue: read_tag(&slot[OFF_VENUE..OFF_VENUE + VENUE_LEN]).to_string(),
            market: read_tag(&slot[OFF_MARKET..OFF_MARKET + MARKET_LEN]).to_string(),
            side: read_tag(&slot[OFF_SIDE..OFF_SIDE + SIDE_LEN]).to_string(),
            quantity: LittleEndian::read_f64(&slot[OFF_QUANTITY..]),
            entry_price: LittleEndian::read_f64(&slot[OFF_ENTRY..]),
            mark_price: LittleEndian::read_f64(&slot[OFF_MARK..]),
            unrealized_pnl: LittleEndian::read_f64(&slot[OFF_UNREALIZED..]),
            realized_pnl: LittleEndian::read_f64(&slot[OFF_REALIZED..]),
            margin_used: LittleEndian::read_f64(&slot[OFF_MARGIN..]),
            leverage: LittleEndian::read_i32(&slot[OFF_LEVERAGE..]),
            updated_at: LittleEndian::read_i64(&slot[OFF_UPDATED..]),
        })
    }

    /// Decode every occupied slot
    #[must_use]
    pub fn read_all(&self) -> Vec<SlotRecord> {
        (0..self.slots).filter_map(|i| self.read_slot(i)).collect()
    }

    /// Flush dirty pages to the backing file
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().context("flushing shared-memory region")
    }
}

fn write_tag(dst: &mut [u8], value: &str) {
    dst.fill(0);
    let bytes = value.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn read_tag(src: &[u8]) -> &str {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    std::str::from_utf8(&src[..end]).unwrap_or("")
}
