use filesplitter::log_util::{init_logger, parse_level};
use filesplitter::splitter_util::{parse_keylist, FileSplitter};
use getopts::Options;
use std::path::PathBuf;
use std::{env, process, thread};
use tracing::{error, warn};
use tracing_subscriber::filter::LevelFilter;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!(
        "Usage: {} FILE [options]\n\n\
         Split a single large CSV file into individual files having unique keys.\n\
         Individual files are named after their keys. Keys can be made up of\n\
         multiple fields of the CSV file. Splitting works at the byte level with\n\
         multiple threads and binary searches for the break points.\n\
         CAUTION: the large file must be sorted by the key used to split.",
        program
    );
    print!("{}", opts.usage(&brief));
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optflag("H", "header", "the first line in the file is a header line");
    opts.optopt(
        "t",
        "threads",
        "the number of threads to use to process the file",
        "N",
    );
    opts.optopt(
        "v",
        "verbose",
        "the log level [trace,debug,info,warning,error,critical,off]",
        "LEVEL",
    );
    opts.optopt(
        "o",
        "outdir",
        "the directory in which to put the output; default is output",
        "DIR",
    );
    opts.optopt(
        "L",
        "logdir",
        "the directory in which to put the logs; default is logs",
        "DIR",
    );
    opts.optopt(
        "k",
        "key",
        "the data field indices (1-based column numbers) used to define the key",
        "LIST",
    );

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, &opts);
            process::exit(1);
        }
    };

    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return;
    }

    let logdir = PathBuf::from(matches.opt_str("L").unwrap_or_else(|| "logs".to_string()));
    let (level, level_ok) = match matches.opt_str("v") {
        Some(text) => match parse_level(&text) {
            Some(level) => (level, true),
            None => (LevelFilter::TRACE, false),
        },
        None => (LevelFilter::TRACE, true),
    };

    if let Err(e) = init_logger(&logdir, level) {
        eprintln!("{}", e);
        process::exit(1);
    }
    if !level_ok {
        warn!("log level was configured but unreadable; using the default");
    }

    let input = match matches.free.first() {
        Some(operand) => PathBuf::from(operand),
        None => {
            error!("must have an input file... halting");
            eprintln!("an input file operand is required");
            print_usage(&program, &opts);
            process::exit(1);
        }
    };

    let outdir = PathBuf::from(matches.opt_str("o").unwrap_or_else(|| "output".to_string()));

    let threads: usize = matches
        .opt_str("t")
        .and_then(|t| t.parse().ok())
        .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

    let keylist = matches
        .opt_str("k")
        .map(|k| parse_keylist(&k))
        .unwrap_or_default();

    let mut splitter = FileSplitter::new(
        input,
        outdir,
        matches.opt_present("H"),
        threads,
        keylist,
    );

    if let Err(e) = splitter.split() {
        error!("{}", e);
        eprintln!("{}", e);
        process::exit(1);
    }
}
