// Rule UID generation

//! Engine-generated rule UIDs follow the pattern `rule_<n>`. The
//! generator keeps a running counter so the next UID never requires a
//! scan over the rule store, and explicit caller-chosen UIDs with a
//! numeric suffix push the counter forward so later generated UIDs stay
//! strictly increasing.

/// Prefix of engine-generated rule UIDs
pub const RULE_UID_PREFIX: &str = "rule_";

#[derive(Debug)]
pub(crate) struct UidGenerator {
    next: u64,
}

impl UidGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Account for an externally supplied UID so generated ones never
    /// collide with or fall behind it
    pub fn observe(&mut self, uid: &str) {
        if let Some(suffix) = uid.strip_prefix(RULE_UID_PREFIX) {
            if let Ok(number) = suffix.parse::<u64>() {
                self.next = self.next.max(number + 1);
            }
        }
    }

    pub fn next_uid(&mut self) -> String {
        let uid = format!("{}{}", RULE_UID_PREFIX, self.next);
        self.next += 1;
        uid
    }
}
