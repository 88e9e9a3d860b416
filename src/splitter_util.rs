use crate::block_util::BlockHandler;
use crate::{SplitError, RECORD_DELIM};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{info, trace};

/// Parse a comma-separated list of 1-based field indices. Entries that do not
/// parse as positive integers are dropped; the result is sorted ascending and
/// de-duplicated, and may be empty.
pub fn parse_keylist(arg: &str) -> Vec<u32> {
    let mut keys: Vec<u32> = arg
        .split(',')
        .filter_map(|k| k.trim().parse::<u32>().ok())
        .filter(|&k| k > 0)
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

pub(crate) fn make_dir(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o775);
    }
    builder.create(path)
}

/// Coordinator for a split run.
///
/// Inspects the input, captures the optional header, divides the post-header
/// byte range into equal slices, and runs one [`BlockHandler`] thread per
/// slice. Workers need no coordination beyond the slice arithmetic; the
/// coordinator only spawns and joins them.
pub struct FileSplitter {
    input: PathBuf,
    outdir: PathBuf,
    has_header: bool,
    threads: usize,
    keylist: Vec<u32>,
    header: Vec<u8>,
    size: u64,
}

impl FileSplitter {
    /// `threads` is clamped to at least one; an empty `keylist` falls back to
    /// the first field.
    pub fn new(
        input: PathBuf,
        outdir: PathBuf,
        has_header: bool,
        threads: usize,
        keylist: Vec<u32>,
    ) -> Self {
        let keylist = if keylist.is_empty() { vec![1] } else { keylist };
        FileSplitter {
            input,
            outdir,
            has_header,
            threads: threads.max(1),
            keylist,
            header: Vec::new(),
            size: 0,
        }
    }

    /// The captured header line, including its record delimiter. Empty until
    /// [`split`](Self::split) runs, or when header mode is off.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn file_size(&self) -> u64 {
        self.size
    }

    fn init_input_file(&mut self) -> Result<(), SplitError> {
        let meta = fs::metadata(&self.input).map_err(|e| SplitError::InputUnreadable {
            path: self.input.clone(),
            source: e,
        })?;
        if !meta.is_file() {
            return Err(SplitError::InputUnreadable {
                path: self.input.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        self.size = meta.len();
        if self.size == 0 {
            return Err(SplitError::EmptyInput {
                path: self.input.clone(),
            });
        }
        info!("input file {} has {} bytes", self.input.display(), self.size);

        if self.has_header {
            let f = File::open(&self.input).map_err(|e| SplitError::InputUnreadable {
                path: self.input.clone(),
                source: e,
            })?;
            self.header.clear();
            BufReader::new(f).read_until(RECORD_DELIM, &mut self.header)?;
            trace!("captured a {} byte header", self.header.len());
        }

        Ok(())
    }

    fn init_output_directory(&self) -> Result<(), SplitError> {
        make_dir(&self.outdir).map_err(|e| SplitError::DirCreate {
            path: self.outdir.clone(),
            source: e,
        })
    }

    /// Run the split. Setup failures abort before any worker starts; I/O
    /// failures inside a worker are logged there and do not surface here.
    pub fn split(&mut self) -> Result<(), SplitError> {
        self.init_input_file()?;
        self.init_output_directory()?;

        let hlen = self.header.len() as u64;
        let data = self.size - hlen;
        if data == 0 {
            info!("no data past the header; nothing to split");
            return Ok(());
        }

        let n = self.threads as u64;
        let block = (data + n - 1) / n;
        info!(
            "splitting {} data bytes into {} blocks of {} bytes",
            data,
            (data + block - 1) / block,
            block
        );

        let input = self.input.as_path();
        let outdir = self.outdir.as_path();
        let size = self.size;
        let header = self.header.as_slice();
        let keylist = self.keylist.as_slice();

        thread::scope(|scope| {
            let mut children = Vec::new();
            let mut b = hlen;
            while b < size {
                let bh = BlockHandler::new(input, outdir, size, header, keylist);
                // the upper bound is passed unclamped; the handler's right
                // anchor treats anything >= size as end of file.
                children.push(scope.spawn(move || bh.run(b, b + block)));
                b += block;
            }
            for child in children {
                child.join().unwrap();
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_keylist, FileSplitter};
    use crate::SplitError;
    use ::function_name::named;
    use std::fs;

    #[test]
    #[named]
    fn keylist_sorted_and_deduplicated() {
        let keys = parse_keylist("3,1,3,2");
        assert!(keys == vec![1, 2, 3], "{} failed: {:?}", function_name!(), keys);
    }

    #[test]
    #[named]
    fn keylist_drops_bad_entries() {
        let keys = parse_keylist("1,x,0,-4,2");
        assert!(keys == vec![1, 2], "{} failed: {:?}", function_name!(), keys);
    }

    #[test]
    #[named]
    fn keylist_may_end_up_empty() {
        assert!(
            parse_keylist("a,b").is_empty(),
            "{} failed",
            function_name!()
        );
    }

    #[test]
    #[named]
    fn empty_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.csv");
        fs::write(&input, b"").unwrap();

        let mut splitter = FileSplitter::new(input, dir.path().join("out"), false, 2, vec![]);
        let err = splitter.split().unwrap_err();
        assert!(
            matches!(err, SplitError::EmptyInput { .. }),
            "{} failed: {:?}",
            function_name!(),
            err
        );
    }

    #[test]
    #[named]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut splitter = FileSplitter::new(
            dir.path().join("nope.csv"),
            dir.path().join("out"),
            false,
            2,
            vec![],
        );
        let err = splitter.split().unwrap_err();
        assert!(
            matches!(err, SplitError::InputUnreadable { .. }),
            "{} failed: {:?}",
            function_name!(),
            err
        );
    }

    #[test]
    #[named]
    fn header_only_input_splits_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.csv");
        fs::write(&input, b"k,v\n").unwrap();
        let outdir = dir.path().join("out");

        let mut splitter = FileSplitter::new(input, outdir.clone(), true, 3, vec![]);
        splitter.split().unwrap();
        assert!(
            splitter.header() == b"k,v\n",
            "{} failed: header = {:?}",
            function_name!(),
            splitter.header()
        );
        assert!(
            fs::read_dir(&outdir).unwrap().count() == 0,
            "{} failed: no output files expected",
            function_name!()
        );
    }
}
