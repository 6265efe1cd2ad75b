//! Code to adjust process-related parameters.

use crate::OnionportConfig;

/// Set our current maximum-file limit to a large value, if we can.
///
/// Every proxied connection costs us two sockets, so we're likely to need a
/// _lot_ of them.
///
/// # Limitations
///
/// This doesn't actually do anything on windows.
pub(crate) fn use_max_file_limit(config: &OnionportConfig) {
    match rlimit::increase_nofile_limit(config.system.max_files) {
        Ok(n) => tracing::debug!("Increased process file limit to {}", n),
        Err(e) => tracing::warn!("Error while increasing file limit: {}", e),
    }
}
