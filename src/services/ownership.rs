//! Ownership check gating mutation of an image record.

/// Whether `caller_owner_id` may mutate a record owned by `record_owner_id`.
pub fn authorize(record_owner_id: &str, caller_owner_id: &str) -> bool {
    record_owner_id == caller_owner_id
}
