use sha2::{Digest, Sha256};

/// Derive the chat room id for a contract. Pure function of the unordered
/// participant pair plus the project id, so both participants (and any
/// retry) independently compute the same value.
pub fn room_id(participant_a: &str, participant_b: &str, project_id: &str) -> String {
    let (lo, hi) = if participant_a <= participant_b {
        (participant_a, participant_b)
    } else {
        (participant_b, participant_a)
    };

    let mut hasher = Sha256::new();
    hasher.update(lo.as_bytes());
    hasher.update([0u8]);
    hasher.update(hi.as_bytes());
    hasher.update([0u8]);
    hasher.update(project_id.as_bytes());

    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_independent() {
        assert_eq!(room_id("alice", "bob", "p1"), room_id("bob", "alice", "p1"));
    }

    #[test]
    fn distinct_per_project() {
        assert_ne!(room_id("alice", "bob", "p1"), room_id("alice", "bob", "p2"));
    }

    #[test]
    fn delimited_inputs_do_not_collide() {
        // "ab" + "c" must not equal "a" + "bc"
        assert_ne!(room_id("ab", "c", "p1"), room_id("a", "bc", "p1"));
    }
}
