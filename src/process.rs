//! Host process name lookup.

use crate::source::TelemetryError;

/// Resolves the short name of `pid`. Fails if the process has exited or is
/// not readable by us.
#[cfg(target_os = "linux")]
pub fn resolve_name(pid: u32) -> Result<String, TelemetryError> {
    let comm = std::fs::read_to_string(format!("/proc/{}/comm", pid))?;
    Ok(comm.trim().to_string())
}

#[cfg(not(target_os = "linux"))]
pub fn resolve_name(_pid: u32) -> Result<String, TelemetryError> {
    Err(TelemetryError::Unsupported)
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn resolves_own_process() {
        let name = resolve_name(std::process::id()).unwrap();
        assert!(!name.is_empty());
        assert!(!name.ends_with('\n'));
    }

    #[test]
    fn missing_process_is_an_error() {
        // Above the kernel's pid_max ceiling.
        assert!(resolve_name(u32::MAX).is_err());
    }
}
