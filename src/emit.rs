use std::io;
use std::io::Write;

use log::warn;

use crate::inode_table::TimeColumns;
use crate::resolve::{resolve_path, PATH_MAX};
use crate::scanner::Listing;
use crate::ListOptions;

impl Listing {
    /// Print every selected name, in stored (on-disk) order: optional
    /// right-aligned 10-column timestamp prefixes, the absolute path, then a
    /// newline (NUL under `print0`).
    ///
    /// Under `unique` an inode's selection bit is cleared as soon as one of
    /// its names is printed, so later hardlinks of the same inode are
    /// skipped; which name wins is whichever the disk yielded first, stable
    /// for an unchanged volume. Unresolvable entries are warned about on
    /// stderr and skipped.
    pub fn write_to<W: Write>(&mut self, opts: &ListOptions, out: &mut W) -> io::Result<()> {
        let Listing {
            table,
            dirents,
            selected,
        } = self;

        let terminator: &[u8] = if opts.print0 { b"\0" } else { b"\n" };
        let mut path = [0u8; PATH_MAX];

        for (offset, dirent) in dirents.iter() {
            let index = dirent.ino_idx as usize;
            let ino = table.ino_at(index);
            if !selected.get(ino) {
                continue;
            }
            if opts.unique {
                selected.clear(ino);
            }

            let len = match resolve_path(dirents, offset, &mut path) {
                Ok(len) => len,
                Err(e) => {
                    warn!("inode #{}: {}", ino, e);
                    continue;
                }
            };

            match opts.times {
                TimeColumns::None => {}
                TimeColumns::Mtime | TimeColumns::Ctime => {
                    write!(out, "{:>10} ", table.time1_at(index))?;
                }
                TimeColumns::Both => {
                    write!(
                        out,
                        "{:>10} {:>10} ",
                        table.time1_at(index),
                        table.time2_at(index)
                    )?;
                }
            }
            out.write_all(&path[..len])?;
            out.write_all(terminator)?;
        }
        Ok(())
    }
}
