//! Scanner + emitter behavior over an in-memory volume, end to end.

use std::collections::HashMap;

use anyhow::{anyhow, Error};
use e2names::{DirentSink, InodeMeta, InodeSink, ListOptions, Scanner, TimeColumns, Volume};

const DIR: u16 = 0o040_755;
const FILE: u16 = 0o100_644;

struct MemVolume {
    inode_count: u32,
    inodes: Vec<(u32, InodeMeta)>,
    dirs: HashMap<u32, Vec<(u32, Vec<u8>)>>,
}

impl MemVolume {
    fn new() -> MemVolume {
        MemVolume {
            inode_count: 1024,
            inodes: Vec::new(),
            dirs: HashMap::new(),
        }
    }

    fn inode(&mut self, ino: u32, mode: u16, links_count: u16, mtime: u32, ctime: u32) {
        self.inodes.push((
            ino,
            InodeMeta {
                mode,
                links_count,
                mtime,
                ctime,
            },
        ));
    }

    fn file(&mut self, ino: u32, mtime: u32, ctime: u32) {
        self.inode(ino, FILE, 1, mtime, ctime);
    }

    /// A directory inode plus its entry list; `.` and `..` are prepended the
    /// way they open every on-disk directory.
    fn dir(&mut self, ino: u32, parent: u32, entries: &[(u32, &str)]) {
        self.inode(ino, DIR, 2, 100, 100);
        let mut all: Vec<(u32, Vec<u8>)> = vec![(ino, b".".to_vec()), (parent, b"..".to_vec())];
        all.extend(
            entries
                .iter()
                .map(|&(child, name)| (child, name.as_bytes().to_vec())),
        );
        self.dirs.insert(ino, all);
    }
}

impl Volume for MemVolume {
    fn inode_count(&self) -> u32 {
        self.inode_count
    }

    fn first_usable_ino(&self) -> u32 {
        11
    }

    fn scan_inodes(&self, _buffer_blocks: usize, sink: &mut InodeSink<'_>) -> Result<(), Error> {
        let mut sorted = self.inodes.clone();
        sorted.sort_by_key(|&(ino, _)| ino);
        for (ino, meta) in sorted {
            sink(ino, Ok(meta))?;
        }
        Ok(())
    }

    fn iterate_dir(&self, dir_ino: u32, sink: &mut DirentSink<'_>) -> Result<(), Error> {
        let entries = self
            .dirs
            .get(&dir_ino)
            .ok_or_else(|| anyhow!("no such directory: {}", dir_ino))?;
        for (child, name) in entries {
            sink(*child, name)?;
        }
        Ok(())
    }
}

fn list(vol: &MemVolume, opts: &ListOptions) -> Vec<u8> {
    let mut listing = Scanner::new(vol, opts).run(0).expect("scan");
    let mut out = Vec::new();
    listing.write_to(opts, &mut out).expect("emit");
    out
}

fn lines(vol: &MemVolume, opts: &ListOptions) -> Vec<String> {
    String::from_utf8(list(vol, opts))
        .expect("utf8 output")
        .lines()
        .map(str::to_string)
        .collect()
}

/// Root plus lost+found, a hardlinked pair, and one subdirectory with a file.
fn fixture() -> MemVolume {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(11, "lost+found"), (12, "a"), (12, "b"), (13, "d")]);
    vol.dir(11, 2, &[]);
    vol.file(12, 1_000, 1_000);
    vol.dir(13, 2, &[(14, "c")]);
    vol.file(14, 2_000, 2_000);
    vol
}

#[test]
fn empty_but_formatted() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(11, "lost+found")]);
    vol.dir(11, 2, &[]);

    assert_eq!(vec!["/", "/lost+found"], lines(&vol, &ListOptions::default()));
}

#[test]
fn single_file() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "a")]);
    vol.file(12, 500, 500);

    assert_eq!(vec!["/", "/a"], lines(&vol, &ListOptions::default()));
}

#[test]
fn full_tree_in_disk_order() {
    assert_eq!(
        vec!["/", "/lost+found", "/a", "/b", "/d", "/d/c"],
        lines(&fixture(), &ListOptions::default())
    );
}

#[test]
fn hardlinks_all_names_by_default_one_under_unique() {
    let vol = fixture();

    let all = lines(&vol, &ListOptions::default());
    assert!(all.contains(&"/a".to_string()));
    assert!(all.contains(&"/b".to_string()));

    let unique = lines(
        &vol,
        &ListOptions {
            unique: true,
            ..ListOptions::default()
        },
    );
    // the first name on disk wins, and only it
    assert!(unique.contains(&"/a".to_string()));
    assert!(!unique.contains(&"/b".to_string()));
}

#[test]
fn unique_is_stable_across_runs() {
    let vol = fixture();
    let opts = ListOptions {
        unique: true,
        ..ListOptions::default()
    };
    assert_eq!(list(&vol, &opts), list(&vol, &opts));
}

#[test]
fn idempotent_output() {
    let vol = fixture();
    let opts = ListOptions::default();
    assert_eq!(list(&vol, &opts), list(&vol, &opts));
}

#[test]
fn reserved_inodes_never_appear() {
    let mut vol = MemVolume::new();
    // a live-looking reserved inode (eg. the journal) must stay invisible
    vol.inode(8, FILE, 1, 9_999, 9_999);
    vol.dir(2, 2, &[(12, "a")]);
    vol.file(12, 500, 500);

    assert_eq!(vec!["/", "/a"], lines(&vol, &ListOptions::default()));
}

#[test]
fn unlinked_inodes_never_appear() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "a")]);
    vol.file(12, 500, 500);
    vol.inode(13, FILE, 0, 9_999, 9_999); // deleted

    let mut listing = Scanner::new(&vol, &ListOptions::default()).run(0).unwrap();
    assert_eq!(2, listing.inodes());

    let mut out = Vec::new();
    listing.write_to(&ListOptions::default(), &mut out).unwrap();
    assert_eq!(b"/\n/a\n".to_vec(), out);
}

#[test]
fn after_filters_by_either_timestamp() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "old"), (13, "new"), (14, "meta")]);
    vol.file(12, 1_000, 1_000);
    vol.file(13, 2_000, 1_000);
    vol.file(14, 1_000, 2_000); // only the ctime crosses

    let opts = ListOptions {
        after: Some(1_500),
        ..ListOptions::default()
    };
    assert_eq!(vec!["/new", "/meta"], lines(&vol, &opts));
}

#[test]
fn after_threshold_is_inclusive() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "exact")]);
    vol.file(12, 1_500, 100);

    let opts = ListOptions {
        after: Some(1_500),
        ..ListOptions::default()
    };
    assert_eq!(vec!["/exact"], lines(&vol, &opts));
}

#[test]
fn timestamp_columns() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "x")]);
    vol.file(12, 1_700_000_000, 1_700_000_123);

    let both = ListOptions {
        times: TimeColumns::Both,
        ..ListOptions::default()
    };
    let out = lines(&vol, &both);
    assert_eq!("1700000000 1700000123 /x", out[out.len() - 1]);

    let mtime_only = ListOptions {
        times: TimeColumns::Mtime,
        ..ListOptions::default()
    };
    let out = lines(&vol, &mtime_only);
    assert_eq!("1700000000 /x", out[out.len() - 1]);

    let ctime_only = ListOptions {
        times: TimeColumns::Ctime,
        ..ListOptions::default()
    };
    let out = lines(&vol, &ctime_only);
    assert_eq!("1700000123 /x", out[out.len() - 1]);
}

#[test]
fn timestamps_right_aligned_in_ten_columns() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "x")]);
    vol.file(12, 123, 45);

    let opts = ListOptions {
        times: TimeColumns::Both,
        ..ListOptions::default()
    };
    let out = lines(&vol, &opts);
    assert_eq!("       123         45 /x", out[out.len() - 1]);
}

#[test]
fn print0_terminates_with_nul() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "a")]);
    vol.file(12, 500, 500);

    let opts = ListOptions {
        print0: true,
        ..ListOptions::default()
    };
    assert_eq!(b"/\0/a\0".to_vec(), list(&vol, &opts));
}

#[test]
fn driver_facing_record_format() {
    // the replication driver consumes `-0 -m -c`: mtime, ctime, path, NUL
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "payload")]);
    vol.file(12, 1_700_000_000, 1_700_000_123);

    let opts = ListOptions {
        times: TimeColumns::Both,
        print0: true,
        ..ListOptions::default()
    };
    let out = list(&vol, &opts);
    let records: Vec<&[u8]> = out.split(|&b| b == 0).filter(|r| !r.is_empty()).collect();
    assert_eq!(2, records.len());
    assert_eq!(b"1700000000 1700000123 /payload".as_slice(), records[1]);
}

#[test]
fn paths_are_well_formed() {
    let out = lines(&fixture(), &ListOptions::default());
    for path in out {
        assert!(path.starts_with('/'), "{}", path);
        assert!(!path.contains("//"), "{}", path);
        for component in path.split('/').skip(1) {
            assert_ne!(".", component, "{}", path);
            assert_ne!("..", component, "{}", path);
        }
    }
}

#[test]
fn overlong_chains_are_skipped_not_fatal() {
    let mut vol = MemVolume::new();
    // dirs 100..400: /d/d/d/... each directory containing the next
    let first = 100u32;
    let last = 399u32;
    vol.dir(2, 2, &[(first, "d")]);
    for ino in first..=last {
        if ino == last {
            vol.dir(ino, ino - 1, &[]);
        } else {
            vol.dir(ino, ino - 1, &[(ino + 1, "d")]);
        }
    }

    let out = lines(&vol, &ListOptions::default());
    // the root plus the 255 components that fit; deeper entries are warned
    // about on stderr and dropped
    assert_eq!(256, out.len());
    assert_eq!("/", out[0]);
    assert_eq!(2 * 255, out[255].len());
}

#[test]
fn unreachable_inode_is_not_fatal() {
    let mut vol = MemVolume::new();
    vol.dir(2, 2, &[(12, "a")]);
    vol.file(12, 500, 500);
    vol.file(99, 500, 500); // linked on disk, named by no directory

    let listing = Scanner::new(&vol, &ListOptions::default()).run(0).unwrap();
    assert_eq!(3, listing.inodes());
    assert_eq!(vec!["/", "/a"], lines(&vol, &ListOptions::default()));
}

#[test]
fn names_survive_non_utf8() {
    let mut vol = MemVolume::new();
    vol.inode(2, DIR, 2, 100, 100);
    vol.dirs.insert(
        2,
        vec![
            (2, b".".to_vec()),
            (2, b"..".to_vec()),
            (12, vec![0xa9, 0xff, 0x80]),
        ],
    );
    vol.file(12, 500, 500);

    let out = list(&vol, &ListOptions::default());
    assert_eq!(b"/\n/\xa9\xff\x80\n".to_vec(), out);
}
