use crate::record_util::first_in_group;
use crate::BUFSIZE;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{error, trace};

/// One worker: owns a proposed byte slice of the input, refines it to whole
/// key-groups, and writes one output file per group inside the refined range.
///
/// Each handler opens its own read handles so no file position is shared
/// between threads. Output paths are disjoint across workers because a group
/// is only ever emitted by the worker whose refined range contains it.
pub struct BlockHandler<'a> {
    input: &'a Path,
    outdir: &'a Path,
    size: u64,
    header: &'a [u8],
    keylist: &'a [u32],
}

impl<'a> BlockHandler<'a> {
    pub fn new(
        input: &'a Path,
        outdir: &'a Path,
        size: u64,
        header: &'a [u8],
        keylist: &'a [u32],
    ) -> Self {
        BlockHandler {
            input,
            outdir,
            size,
            header,
            keylist,
        }
    }

    fn output_path(&self, key: &[u8]) -> PathBuf {
        self.outdir
            .join(format!("{}.csv", String::from_utf8_lossy(key)))
    }

    /// Process the proposed slice `[begin, end)`.
    ///
    /// The left anchor moves to the start of the group containing the first
    /// record of the slice; the right anchor retracts to the start of the
    /// group containing the record at `end`, so a group straddling the right
    /// edge is left to the neighboring worker. The tail worker keeps `end` at
    /// the file size. Groups are then peeled off the tail one at a time, each
    /// transferred to `<outdir>/<key>.csv`.
    ///
    /// Errors are contained here: a failed boundary search ends this worker,
    /// a failed transfer skips that group, and neither affects other workers.
    pub fn run(&self, begin: u64, end: u64) {
        let floor = self.header.len() as u64;

        trace!("block original bounds [{},{})", begin, end);

        let mut inf = match File::open(self.input) {
            Ok(f) => f,
            Err(e) => {
                error!("cannot open {} in a block handler: {}", self.input.display(), e);
                return;
            }
        };

        let (begin, bkey) =
            match first_in_group(&mut inf, begin, end, floor, self.size, self.keylist) {
                Ok(found) => found,
                Err(e) => {
                    error!("boundary search near offset {} failed: {}", begin, e);
                    return;
                }
            };
        trace!(
            "block new start: {} with key: {}",
            begin,
            String::from_utf8_lossy(&bkey)
        );

        let mut end = if end >= self.size {
            self.size
        } else {
            match first_in_group(&mut inf, end, end, floor, self.size, self.keylist) {
                Ok((pos, key)) => {
                    trace!(
                        "block new end: {} with key: {}",
                        pos,
                        String::from_utf8_lossy(&key)
                    );
                    pos
                }
                Err(e) => {
                    error!("boundary search near offset {} failed: {}", end, e);
                    return;
                }
            }
        };

        if begin == end {
            trace!("homogeneous key, so empty block");
        }

        while end > begin {
            // end - 1 lands inside the last record of the remaining range.
            let (epos, key) =
                match first_in_group(&mut inf, end - 1, end, floor, self.size, self.keylist) {
                    Ok(found) => found,
                    Err(e) => {
                        error!("boundary search near offset {} failed: {}", end - 1, e);
                        return;
                    }
                };

            let ofname = self.output_path(&key);
            match self.transfer(epos, end - epos, &ofname) {
                Ok(written) => {
                    trace!(
                        "wrote {} of {} bytes for key {} to {}",
                        written,
                        end - epos,
                        String::from_utf8_lossy(&key),
                        ofname.display()
                    );
                }
                Err(e) => {
                    error!("transfer to {} failed: {}", ofname.display(), e);
                }
            }
            end = epos;
        }
    }

    /// Copy `bytes_to_write` bytes starting at `soff` into `ofn`, prefixed by
    /// the header when one was captured. Returns the number of bytes copied
    /// from the source; the count falls short of the request at end of file
    /// or when the destination stops accepting bytes.
    pub fn transfer(&self, soff: u64, bytes_to_write: u64, ofn: &Path) -> io::Result<u64> {
        let mut source = File::open(self.input)?;
        let mut dest = File::create(ofn)?;

        if !self.header.is_empty() {
            // the header bytes include the record delimiter.
            dest.write_all(self.header)?;
        }

        source.seek(SeekFrom::Start(soff))?;

        let mut buf = [0u8; BUFSIZE];
        let mut remaining = bytes_to_write;
        let mut total: u64 = 0;
        while remaining > 0 {
            let want = remaining.min(BUFSIZE as u64) as usize;
            let got = source.read(&mut buf[..want])?;
            if got == 0 {
                break;
            }
            let put = dest.write(&buf[..got])?;
            total += put as u64;
            if put < got {
                trace!("write size {} does not match read size {}", put, got);
                break;
            }
            remaining -= got as u64;
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::BlockHandler;
    use ::function_name::named;
    use std::fs;
    use std::path::PathBuf;

    const DATA: &[u8] = b"a,1\na,2\nb,3\nb,4\nc,5\nc,6\n";
    const KEYS: [u32; 1] = [1];

    fn write_input(dir: &std::path::Path, data: &[u8]) -> PathBuf {
        let path = dir.join("input.csv");
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    #[named]
    fn run_emits_one_file_per_group() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), DATA);
        let bh = BlockHandler::new(&input, dir.path(), DATA.len() as u64, b"", &KEYS);
        bh.run(0, DATA.len() as u64);

        assert!(
            fs::read(dir.path().join("a.csv")).unwrap() == b"a,1\na,2\n",
            "{} failed for key a",
            function_name!()
        );
        assert!(
            fs::read(dir.path().join("b.csv")).unwrap() == b"b,3\nb,4\n",
            "{} failed for key b",
            function_name!()
        );
        assert!(
            fs::read(dir.path().join("c.csv")).unwrap() == b"c,5\nc,6\n",
            "{} failed for key c",
            function_name!()
        );
    }

    #[test]
    #[named]
    fn adjacent_slices_cover_groups_once() {
        // the cut at offset 12 lands inside the b group; only one of the two
        // workers may emit b.csv, and every group must appear exactly once.
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), DATA);
        let size = DATA.len() as u64;

        let bh = BlockHandler::new(&input, dir.path(), size, b"", &KEYS);
        bh.run(0, 12);
        assert!(
            !dir.path().join("b.csv").exists(),
            "{} failed: left worker must not emit the straddling group",
            function_name!()
        );
        bh.run(12, size);

        assert!(
            fs::read(dir.path().join("a.csv")).unwrap() == b"a,1\na,2\n",
            "{} failed for key a",
            function_name!()
        );
        assert!(
            fs::read(dir.path().join("b.csv")).unwrap() == b"b,3\nb,4\n",
            "{} failed for key b",
            function_name!()
        );
        assert!(
            fs::read(dir.path().join("c.csv")).unwrap() == b"c,5\nc,6\n",
            "{} failed for key c",
            function_name!()
        );
    }

    #[test]
    #[named]
    fn middle_slice_of_single_group_is_silent() {
        let data: &[u8] = b"k,1\nk,2\nk,3\nk,4\n";
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), data);
        let size = data.len() as u64;

        let bh = BlockHandler::new(&input, dir.path(), size, b"", &KEYS);
        bh.run(4, 8);
        assert!(
            fs::read_dir(dir.path()).unwrap().count() == 1,
            "{} failed: only the input file should exist",
            function_name!()
        );

        // the tail worker owns the whole group.
        bh.run(8, size);
        assert!(
            fs::read(dir.path().join("k.csv")).unwrap() == data,
            "{} failed for the tail worker",
            function_name!()
        );
    }

    #[test]
    #[named]
    fn transfer_prefixes_header() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), DATA);
        let out = dir.path().join("out.csv");

        let bh = BlockHandler::new(&input, dir.path(), DATA.len() as u64, b"k,v\n", &KEYS);
        let written = bh.transfer(8, 8, &out).unwrap();
        assert!(written == 8, "{} failed: wrote {}", function_name!(), written);
        assert!(
            fs::read(&out).unwrap() == b"k,v\nb,3\nb,4\n",
            "{} failed: header missing or range wrong",
            function_name!()
        );
    }

    #[test]
    #[named]
    fn transfer_stops_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), DATA);
        let out = dir.path().join("out.csv");

        let bh = BlockHandler::new(&input, dir.path(), DATA.len() as u64, b"", &KEYS);
        let written = bh.transfer(16, 9999, &out).unwrap();
        assert!(written == 8, "{} failed: wrote {}", function_name!(), written);
        assert!(
            fs::read(&out).unwrap() == b"c,5\nc,6\n",
            "{} failed: tail range wrong",
            function_name!()
        );
    }
}
