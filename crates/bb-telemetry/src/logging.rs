//! Structured log macros.
//!
//! Every relationship log line carries the same fields so aggregated logs
//! can be filtered per edge:
//! - `subsystem`: always `relationships`
//! - `initiator` / `counterpart`: the two user ids of the edge
//! - `repair`: the repair kind, for reconciliation entries
//! - Additional context fields

/// Subsystem tag stamped on every relationship log line.
pub const SUBSYSTEM: &str = "relationships";

/// Log an edge-level event with the standard fields.
///
/// ```rust,ignore
/// log_edge_event!(info, "transition applied", alice, bob, kind = "accept");
/// ```
#[macro_export]
macro_rules! log_edge_event {
    ($level:ident, $msg:expr, $initiator:expr, $counterpart:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $crate::logging::SUBSYSTEM,
            initiator = %$initiator,
            counterpart = %$counterpart,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a reconciliation repair with the standard fields.
#[macro_export]
macro_rules! log_repair_event {
    ($level:ident, $msg:expr, $pair:expr, $repair:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $crate::logging::SUBSYSTEM,
            pair = %$pair,
            repair = %$repair,
            $($($field)*,)?
            $msg
        )
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_expand_without_subscriber() {
        let (a, b) = ("alice", "bob");
        crate::log_edge_event!(info, "transition applied", a, b);
        crate::log_edge_event!(warn, "transition deferred", a, b, kind = "accept", attempt = 3);
        crate::log_repair_event!(warn, "edge repaired", "alice|bob", "restore_friends");
        crate::log_repair_event!(
            info,
            "edge repaired",
            "alice|bob",
            "restore_request",
            dry_run = true
        );
    }
}
