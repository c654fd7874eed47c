use thiserror::Error;

use crate::dirent_store::{DirentStore, ParentIsOffset};

/// Conventional upper bound on an absolute path.
pub const PATH_MAX: usize = 4096;

const MAX_COMPONENTS: usize = 255;

/// Why one entry's path could not be resolved. Per-entry conditions: the
/// emitter warns and moves on, the run keeps going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("path does not fit in {PATH_MAX} bytes")]
    PathTooLong,
    #[error("path has more than {MAX_COMPONENTS} components")]
    TooDeep,
}

/// Compose the full pathname of the entry at `offset` by following parent
/// links up to the root, writing backwards into the tail of `buf` and
/// shifting the result to the front. Returns the path length.
///
/// Termination is the root's empty name. The root record's parent link
/// points at itself, so comparing pointers or offsets would spin forever on
/// a healthy store; the sentinel is the contract.
pub fn resolve_path(
    store: &DirentStore<ParentIsOffset>,
    offset: u32,
    buf: &mut [u8; PATH_MAX],
) -> Result<usize, ResolveError> {
    let mut pos = PATH_MAX;
    let mut components = 0;
    let mut dirent = store.dirent_at(offset);

    loop {
        let is_root = dirent.name.is_empty();
        if components > 0 || is_root {
            if pos == 0 {
                return Err(ResolveError::PathTooLong);
            }
            pos -= 1;
            buf[pos] = b'/';
        }
        if components > MAX_COMPONENTS {
            return Err(ResolveError::TooDeep);
        }
        if is_root {
            break;
        }
        if pos < dirent.name.len() {
            return Err(ResolveError::PathTooLong);
        }
        pos -= dirent.name.len();
        buf[pos..pos + dirent.name.len()].copy_from_slice(dirent.name);

        dirent = store.dirent_at(dirent.parent);
        components += 1;
    }

    buf.copy_within(pos.., 0);
    Ok(PATH_MAX - pos)
}
