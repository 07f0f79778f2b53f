//! Size bound for the conversation log.

use super::types::ConversationRecord;

/// Drop the oldest records until at most `max` remain.
/// Returns how many were evicted.
pub fn enforce_limit(records: &mut Vec<ConversationRecord>, max: usize) -> usize {
    if records.len() <= max {
        return 0;
    }
    let excess = records.len() - max;
    records.drain(..excess);
    excess
}
