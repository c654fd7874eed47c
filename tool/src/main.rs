use std::fmt::Display;
use std::fs;
use std::io;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use log::{debug, Level, LevelFilter};

use e2names::{ExtFs, ListOptions, ScanError, Scanner, TimeColumns, Volume, ROOT_INO};

/// List all inodes of an ext2/3/4 filesystem, by name, as efficiently as
/// possible: straight off the inode table and directory blocks, without
/// recursively traversing directory entries.
#[derive(Debug, Parser)]
#[command(name = "e2names", disable_version_flag = true)]
struct Args {
    /// Block device (eg. /dev/sda1), filesystem image, or any path on a
    /// mounted ext2/3/4 filesystem (eg. /var)
    path: Option<PathBuf>,

    /// Terminate each output record with NUL instead of newline
    #[arg(short = '0', long)]
    print0: bool,

    /// Only list inodes modified at or after EPOCH (by mtime or ctime,
    /// Unix epoch seconds)
    #[arg(short, long, value_name = "EPOCH")]
    after: Option<u32>,

    /// Prefix each record with the inode's ctime
    #[arg(short = 'c', long)]
    show_ctime: bool,

    /// Prefix each record with the inode's mtime
    #[arg(short = 'm', long)]
    show_mtime: bool,

    /// Show debug/progress information on stderr
    #[arg(short, long)]
    debug: bool,

    /// Treat the path as a filesystem image file
    #[arg(short, long)]
    image: bool,

    /// Require the path to be the root of its filesystem
    #[arg(short = 'p', long)]
    mountpoint: bool,

    /// Do not list more than one name per inode
    #[arg(short, long)]
    unique: bool,

    /// Print version information
    #[arg(short = 'v', long)]
    version: bool,
}

// Exit codes, one per failure class, so the companion driver can tell a
// missing device from a scan failure without parsing stderr.
const EXIT_NO_PATH: i32 = 1;
const EXIT_STAT: i32 = 3;
const EXIT_DEVNO_LOOKUP: i32 = 4;
const EXIT_FS_OPEN: i32 = 5;
const EXIT_ALLOC: i32 = 6;
const EXIT_INODE_SCAN: i32 = 7;
const EXIT_DIR_ITERATE: i32 = 8;
const EXIT_NOT_MOUNTPOINT: i32 = 9;
const EXIT_USAGE: i32 = 10;
const EXIT_BAD_AFTER: i32 = 11;

fn fail(code: i32, msg: impl Display) -> ! {
    eprintln!("e2names: {}", msg);
    process::exit(code);
}

fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = e.print();
                process::exit(0);
            }
            ErrorKind::ValueValidation | ErrorKind::InvalidValue => {
                let _ = e.print();
                process::exit(EXIT_BAD_AFTER);
            }
            _ => {
                let _ = e.print();
                process::exit(EXIT_USAGE);
            }
        },
    }
}

fn init_logger(debug: bool) {
    env_logger::Builder::new()
        .filter_level(if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format(|buf, record| match record.level() {
            Level::Warn => writeln!(buf, "warning: {}", record.args()),
            Level::Error => writeln!(buf, "error: {}", record.args()),
            _ => writeln!(buf, "-- {}", record.args()),
        })
        .init();
}

// glibc's encoding of dev_t major/minor numbers
fn dev_major(dev: u64) -> u32 {
    (((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0xfff)) as u32
}

fn dev_minor(dev: u64) -> u32 {
    (((dev >> 12) & 0xffff_ff00) | (dev & 0xff)) as u32
}

/// Map a path on a mounted filesystem to its backing block device by way of
/// the device number: /sys/dev/block/<major>:<minor> links into sysfs's
/// block tree, whose leaf name is the device name under /dev.
fn backing_device(path: &Path, meta: &fs::Metadata) -> PathBuf {
    let devno = meta.dev();
    let sys = format!("/sys/dev/block/{}:{}", dev_major(devno), dev_minor(devno));
    debug!("'{}' has device {}, reading {}", path.display(), devno, sys);

    let target = match fs::read_link(&sys) {
        Ok(target) => target,
        Err(e) => fail(
            EXIT_DEVNO_LOOKUP,
            format!("cannot resolve device {}:{}: {}", dev_major(devno), dev_minor(devno), e),
        ),
    };
    let name = match target.file_name() {
        Some(name) => name.to_os_string(),
        None => fail(
            EXIT_DEVNO_LOOKUP,
            format!("unexpected sysfs link target {:?}", target),
        ),
    };
    Path::new("/dev").join(name)
}

fn main() {
    let args = parse_args();
    if args.version {
        println!("e2names {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    init_logger(args.debug);

    let path = match &args.path {
        Some(path) => path.clone(),
        None => fail(EXIT_NO_PATH, "missing filesystem path or blockdev"),
    };

    let device = if args.image || path.starts_with("/dev") {
        if args.mountpoint {
            fail(
                EXIT_NOT_MOUNTPOINT,
                "--mountpoint only applies to a path on a mounted filesystem",
            );
        }
        path
    } else {
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) => fail(EXIT_STAT, format!("lstat({}): {}", path.display(), e)),
        };
        if args.mountpoint && meta.ino() != u64::from(ROOT_INO) {
            fail(
                EXIT_NOT_MOUNTPOINT,
                format!("{} is not the root of a filesystem", path.display()),
            );
        }
        let device = backing_device(&path, &meta);
        debug!("'{}' mapped to blkdev '{}'", path.display(), device.display());
        device
    };

    debug!("opening fs '{}'", device.display());
    let file = match fs::File::open(&device) {
        Ok(file) => file,
        Err(e) => fail(EXIT_FS_OPEN, format!("open({}): {}", device.display(), e)),
    };
    let volume = match ExtFs::open(file) {
        Ok(volume) => volume,
        Err(e) => fail(EXIT_FS_OPEN, format!("{}: {:#}", device.display(), e)),
    };
    debug!("{} inodes to scan", volume.inode_count());

    let opts = ListOptions {
        after: args.after,
        times: TimeColumns::from_flags(args.show_mtime, args.show_ctime),
        unique: args.unique,
        print0: args.print0,
    };

    let mut listing = match Scanner::new(&volume, &opts).run(0) {
        Ok(listing) => listing,
        Err(e) => {
            let code = match &e {
                ScanError::Alloc(_) => EXIT_ALLOC,
                ScanError::Scan(_) => EXIT_INODE_SCAN,
                ScanError::DirIterate { .. } => EXIT_DIR_ITERATE,
                ScanError::LookupMiss { .. } => EXIT_USAGE,
            };
            fail(code, e);
        }
    };
    debug!(
        "{} inodes, {} names collected",
        listing.inodes(),
        listing.names()
    );

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    match listing.write_to(&opts, &mut out).and_then(|()| out.flush()) {
        Ok(()) => {}
        // a consumer that stopped reading is not our failure
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
        Err(e) => fail(1, format!("writing output: {}", e)),
    }
}
