//! Decides whether a follow-up step continues an earlier install.

use addontrace_core::{InstallTrace, Trace};

/// Whether `source` is downstream of `destination`.
///
/// Without a wildcard the source must start with the destination. With one,
/// only the literal prefix up to the first `*` is compared, in either
/// direction.
pub fn matches_destination(source: &str, destination: &str) -> bool {
    if destination.is_empty() {
        return false;
    }
    match source.find('*') {
        None => source.starts_with(destination),
        Some(star) => {
            let prefix = &source[..star];
            destination.contains(prefix) || prefix.starts_with(destination)
        }
    }
}

/// Whether `source` continues one of the traces of the install being assembled.
pub fn belongs_to_active_install(source: &str, traces: &[Trace]) -> bool {
    traces
        .iter()
        .any(|trace| matches_destination(source, &trace.destination))
}

/// Append `trace` to the most recent earlier install it continues.
///
/// Returns `false` (and leaves `installs` untouched) when no install matches.
pub fn attach_to_earlier_install(trace: &Trace, installs: &mut [InstallTrace]) -> bool {
    match installs
        .iter_mut()
        .rev()
        .find(|install| belongs_to_active_install(&trace.source, &install.traces))
    {
        Some(install) => {
            tracing::debug!(
                command = %trace.command,
                source = %trace.source,
                origin = %install.origin,
                "Attached step to earlier install"
            );
            install.traces.push(trace.clone());
            true
        }
        None => false,
    }
}
