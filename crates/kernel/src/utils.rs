use std::path::Path;

/// Marker the kernel appends to mappings whose backing file was unlinked.
const DELETED_MARKER: &str = " (deleted)";

/// Marker prelink leaves in temporary copies of a library.
const PRELINK_MARKER: &str = ".#prelink#.";

/// Turn the pathname column of a mapping into a module path.
///
/// Relative paths are rejected: the kernel always reports absolute paths
/// for file-backed mappings. Mappings of unlinked files are rejected since
/// the module they belonged to cannot be the one being loaded. Prelink
/// temporaries are folded into the library they stand for.
///
/// ```
/// # use kernel::utils::sanitize_mapping_path;
/// # use std::path::Path;
/// assert_eq!(
///     sanitize_mapping_path(Path::new("/lib/libc.so.6.#prelink#.a1b2")),
///     Some(Path::new("/lib/libc.so.6"))
/// );
/// assert_eq!(sanitize_mapping_path(Path::new("/tmp/x.so (deleted)")), None);
/// ```
#[inline]
pub fn sanitize_mapping_path(path: &Path) -> Option<&Path> {
    if !path.has_root() {
        return None;
    }
    let text = path.to_str()?;
    if text.ends_with(DELETED_MARKER) {
        return None;
    }
    let text = text.split(PRELINK_MARKER).next()?;
    Some(Path::new(text))
}

/// Round `address` up to the next multiple of `page` (a power of two).
#[inline]
pub fn page_end(address: usize, page: usize) -> usize {
    (address | (page - 1)).saturating_add(1)
}
