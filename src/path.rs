//! Stream path resolution
//!
//! Maps a request target to the bare stream path it plays. Accepted forms
//! are an optional `/hdl` mount prefix followed by either `<path>.flv` or a
//! bare `<path>`. This is a fixed prefix/suffix grammar rather than a
//! pattern match so that resolution is deterministic and cheap on every
//! request.

/// The route prefix under which playback URLs may be mounted.
const MOUNT_PREFIX: &str = "hdl/";

/// The container extension accepted on playback URLs.
const CONTAINER_EXT: &str = ".flv";

/// Resolve a request target to a bare stream path.
///
/// Returns `None` when the target does not denote a playable stream, in
/// which case the caller must produce a not-found response with an empty
/// body.
pub fn resolve_stream_path(target: &str) -> Option<&str> {
    // Request targets may carry a query string; it never participates in
    // stream naming.
    let target = target.split(['?', '#']).next().unwrap_or(target);
    let path = target.strip_prefix('/')?;
    let path = path.strip_prefix(MOUNT_PREFIX).unwrap_or(path);
    let path = path.strip_suffix(CONTAINER_EXT).unwrap_or(path);
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}
