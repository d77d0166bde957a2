//! Locally synthesized records shown ahead of server confirmation.

use uuid::Uuid;

/// Reserved prefix for identifiers generated on this side.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Fresh identifier for an optimistic record.
pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// A record that may have been created optimistically.
///
/// Optimistic records are never authoritative: they are replaced by the
/// reconciliation refetch or removed by rollback.
pub trait OptimisticRecord {
    fn record_id(&self) -> &str;

    fn is_optimistic(&self) -> bool {
        is_temp_id(self.record_id())
    }
}
