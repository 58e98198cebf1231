//! Steady-state invariants over user records.
//!
//! | ID | Invariant |
//! |----|-----------|
//! | 1 | `B ∈ A.sent ⇔ A ∈ B.received` |
//! | 2 | `B ∈ A.friends ⇔ A ∈ B.friends` |
//! | 3 | at most one of A's three sets holds B |
//! | 4 | A holds no reference to itself |

use std::collections::BTreeMap;

use super::entities::{PairKey, UserId, UserRecord};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    RequestAsymmetry { sender: UserId, recipient: UserId },
    FriendAsymmetry { holder: UserId, missing: UserId },
    MutualExclusion { user: UserId, other: UserId },
    SelfReference { user: UserId },
}

/// Invariants 3 and 4 on a single record.
pub fn check_record(record: &UserRecord) -> Vec<Violation> {
    let mut violations = Vec::new();
    let me = &record.user_id;

    if record.relationships.references(me) {
        violations.push(Violation::SelfReference { user: me.clone() });
    }

    for other in record.relationships.referenced_ids() {
        if other != *me && record.relationships.marking_for(&other).count() > 1 {
            violations.push(Violation::MutualExclusion {
                user: me.clone(),
                other,
            });
        }
    }

    violations
}

/// Invariants 1 and 2 between two records, checked in both directions.
pub fn check_pair(a: &UserRecord, b: &UserRecord) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (x, y) in [(a, b), (b, a)] {
        let xr = &x.relationships;
        let yr = &y.relationships;

        if xr.sent.contains(&y.user_id) != yr.received.contains(&x.user_id) {
            violations.push(Violation::RequestAsymmetry {
                sender: x.user_id.clone(),
                recipient: y.user_id.clone(),
            });
        }
        if xr.friends.contains(&y.user_id) && !yr.friends.contains(&x.user_id) {
            violations.push(Violation::FriendAsymmetry {
                holder: x.user_id.clone(),
                missing: y.user_id.clone(),
            });
        }
    }

    violations
}

/// Checks all four invariants across a full set of records.
///
/// A reference to an id with no record counts as an asymmetry.
pub fn check_all(records: &BTreeMap<UserId, UserRecord>) -> Vec<Violation> {
    let mut violations: Vec<Violation> = records.values().flat_map(check_record).collect();

    let mut seen = std::collections::BTreeSet::new();
    for record in records.values() {
        for other in record.relationships.referenced_ids() {
            if other == record.user_id {
                continue;
            }
            let key = PairKey::new(record.user_id.clone(), other.clone());
            if !seen.insert(key) {
                continue;
            }
            match records.get(&other) {
                Some(counterpart) => violations.extend(check_pair(record, counterpart)),
                None => {
                    let placeholder = UserRecord::new(other.clone(), "");
                    violations.extend(check_pair(record, &placeholder));
                }
            }
        }
    }

    violations
}
