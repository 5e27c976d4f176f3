pub mod scanner;

pub use scanner::{extract_recoverable, scan, scan_file, BlockHealth, RecoveryQuality, RecoveryReport, ScannedBlock};

use std::io::{self, Read, Seek, SeekFrom};

use crate::header::SYNC_SIZE;

const SEARCH_CHUNK: usize = 64 * 1024;

/// Find the first occurrence of `sync` starting at or after byte `from`.
///
/// Returns the offset of the marker's first byte.  The stream position is
/// unspecified afterwards.
pub fn find_sync<R: Read + Seek>(reader: &mut R, from: u64, sync: &[u8; SYNC_SIZE]) -> io::Result<Option<u64>> {
    reader.seek(SeekFrom::Start(from))?;
    // `window` always starts at file offset `base`.
    let mut base = from;
    let mut window: Vec<u8> = Vec::with_capacity(SEARCH_CHUNK + SYNC_SIZE);
    let mut chunk = vec![0u8; SEARCH_CHUNK];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        window.extend_from_slice(&chunk[..n]);
        if let Some(i) = window.windows(SYNC_SIZE).position(|w| w == sync) {
            return Ok(Some(base + i as u64));
        }
        // Keep the last SYNC_SIZE - 1 bytes: a marker may straddle chunks.
        let keep = window.len().min(SYNC_SIZE - 1);
        let drop = window.len() - keep;
        window.drain(..drop);
        base += drop as u64;
    }
}
