//! WAL replay for recovery

use super::record::{read_varint, HEADER_LEN, MAX_VARINT_LEN};
use super::{Wal, WalRecord, SEPARATOR};
use crate::{Result, TallyError};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};

impl Wal {
    /// Replay every frame from the start of the file, in file order.
    ///
    /// Stops at the first decode or visitor error. A trailing remainder that
    /// is not a complete frame plus separator is corruption: a torn append is
    /// never read back as data. Returns the number of records visited.
    pub fn read_all<F>(&mut self, mut visit: F) -> Result<usize>
    where
        F: FnMut(WalRecord) -> Result<()>,
    {
        let file = self.file.as_mut().ok_or(TallyError::StorageClosed)?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| TallyError::io("seek", e))?;

        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        let mut count = 0;

        while let Some(frame) = read_frame(&mut reader, offset)? {
            let record = WalRecord::decode(&frame)?;
            visit(record)?;
            offset += frame.len() as u64 + 1;
            count += 1;
        }

        Ok(count)
    }
}

/// Read one frame and its trailing separator. `None` on a clean end of file.
fn read_frame<R: Read>(reader: &mut R, offset: u64) -> Result<Option<Vec<u8>>> {
    let mut frame = vec![0u8; HEADER_LEN];
    match read_full(reader, &mut frame)? {
        0 => return Ok(None),
        HEADER_LEN => {}
        _ => return Err(truncated(offset)),
    }

    // Varint length, byte by byte
    loop {
        let mut byte = [0u8; 1];
        if read_full(reader, &mut byte)? == 0 {
            return Err(truncated(offset));
        }
        frame.push(byte[0]);
        if byte[0] < 0x80 {
            break;
        }
        if frame.len() - HEADER_LEN >= MAX_VARINT_LEN {
            return Err(TallyError::CorruptRecord(format!(
                "oversized length prefix at offset {offset}"
            )));
        }
    }

    let (len, _) = read_varint(&frame[HEADER_LEN..]).ok_or_else(|| {
        TallyError::CorruptRecord(format!("malformed length prefix at offset {offset}"))
    })?;
    if len <= 0 {
        return Err(TallyError::CorruptRecord(format!(
            "non-positive payload length {len} at offset {offset}"
        )));
    }

    let len = len as u64;
    let got = reader
        .by_ref()
        .take(len)
        .read_to_end(&mut frame)
        .map_err(|e| TallyError::io("read", e))?;
    if (got as u64) < len {
        return Err(truncated(offset));
    }

    let mut sep = [0u8; 1];
    if read_full(reader, &mut sep)? == 0 {
        return Err(TallyError::CorruptRecord(format!(
            "unterminated frame at offset {offset}"
        )));
    }
    if sep[0] != SEPARATOR {
        return Err(TallyError::CorruptRecord(format!(
            "expected separator after frame at offset {offset}, found {:#04x}",
            sep[0]
        )));
    }

    Ok(Some(frame))
}

/// Fill `buf` unless end of file comes first; returns bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TallyError::io("read", e)),
        }
    }
    Ok(filled)
}

fn truncated(offset: u64) -> TallyError {
    TallyError::CorruptRecord(format!("truncated frame at offset {offset}"))
}
