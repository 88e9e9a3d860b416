use crate::{FIELD_DELIM, RECORD_DELIM};
use std::io::{self, Read, Seek, SeekFrom};
use tracing::trace;

fn read_byte<R: Read>(f: &mut R) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match f.read(&mut buf)? {
        0 => Ok(None),
        _ => Ok(Some(buf[0])),
    }
}

/// Return the byte offset of the first byte of the record containing `offset`.
///
/// Scans backward one byte at a time until a record delimiter strictly before
/// `offset` is found, or `floor` (the first post-header byte) is reached. The
/// handle is left positioned at the returned offset. Offsets past the end of
/// the file are clamped to the last byte.
pub fn record_start<R: Read + Seek>(
    f: &mut R,
    offset: u64,
    floor: u64,
    size: u64,
) -> io::Result<u64> {
    let soff = offset.min(size.saturating_sub(1));
    let mut i = soff;

    // A delimiter exactly at soff belongs to the record ending there, not the
    // next one, so it must not terminate the scan.
    while i > floor {
        f.seek(SeekFrom::Start(i))?;
        match read_byte(f)? {
            Some(c) => {
                if c == RECORD_DELIM && i < soff {
                    return Ok(i + 1);
                }
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("end of file while scanning backward from offset {}", i),
                ));
            }
        }
        i -= 1;
    }

    f.seek(SeekFrom::Start(i))?;
    Ok(i)
}

/// Extract the key of the record containing `offset` and return it together
/// with the record's start offset. The handle is left positioned at the
/// record start.
///
/// The key is the concatenation of the fields whose 1-based indices appear in
/// `keylist` (ascending), joined with `.`. A list of `[1]` yields the bytes
/// of the first field. Indices past the last field contribute nothing, so the
/// key simply stops growing.
pub fn record_key<R: Read + Seek>(
    f: &mut R,
    offset: u64,
    floor: u64,
    size: u64,
    keylist: &[u32],
) -> io::Result<(Vec<u8>, u64)> {
    let rsoff = record_start(f, offset, floor, size)?;

    let mut key: Vec<u8> = Vec::new();
    let mut fdc: u32 = 1; // field delimiter count; fields are 1-based.
    let mut kit = keylist.iter().peekable();

    while let Some(&&want) = kit.peek() {
        let c = match read_byte(f)? {
            Some(c) => c,
            None => break,
        };
        if c == RECORD_DELIM {
            break;
        }
        if c == FIELD_DELIM {
            fdc += 1;
            if fdc > want {
                kit.next();
                if kit.peek().is_some() {
                    key.push(b'.');
                }
            }
        } else if fdc == want {
            key.push(c);
        }
    }

    f.seek(SeekFrom::Start(rsoff))?;
    trace!(
        "key = {}; set position to record start = {}",
        String::from_utf8_lossy(&key),
        rsoff
    );
    Ok((key, rsoff))
}

/// Return the offset of the first record in the group containing `offset`,
/// along with that group's key.
///
/// Reads the key at `offset`, then bisects `[floor, start of that record]`.
/// Because the input is key-sorted, key equality is monotone over record
/// positions and the search converges on the group start. The probe rounds
/// toward `end` so the loop halts once `end - begin == 1`.
pub fn first_in_group<R: Read + Seek>(
    f: &mut R,
    offset: u64,
    cap: u64,
    floor: u64,
    size: u64,
    keylist: &[u32],
) -> io::Result<(u64, Vec<u8>)> {
    let mut begin = floor;
    let cap = cap.min(size);
    let soff = offset.min(cap).max(begin);

    let (bkey, rsoff) = record_key(f, soff, floor, size, keylist)?;
    let mut end = rsoff;

    let mut probe = begin + (end - begin + 1) / 2;
    while probe > begin && probe < end {
        let (ckey, cpos) = record_key(f, probe, floor, size, keylist)?;
        if ckey == bkey {
            // the group extends at least this far left.
            end = cpos;
        } else {
            begin = probe;
        }
        probe = begin + (end - begin + 1) / 2;
        trace!(
            "ckey={} bkey={} begin={} cpos={} end={} probe={}",
            String::from_utf8_lossy(&ckey),
            String::from_utf8_lossy(&bkey),
            begin,
            cpos,
            end,
            probe
        );
    }

    let start = record_start(f, probe, floor, size)?;
    Ok((start, bkey))
}
