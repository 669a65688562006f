//! Slot hashing and `CLUSTER SLOTS` reply parsing (§4.6, §4.7).

use crate::types::{ErrorKind, RedisError, RedisResult, Value};

pub const SLOT_COUNT: u16 = 16384;

/// Extracts the `{tag}` hashtag from a key, if present (§4.7): the
/// substring between the first `{` and the next `}` after it, provided that
/// substring is non-empty. Keys without a matching pair hash on the whole key.
pub fn hashtag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(close_rel) = key[open + 1..].iter().position(|&b| b == b'}') {
            if close_rel > 0 {
                return &key[open + 1..open + 1 + close_rel];
            }
        }
    }
    key
}

/// CRC16/XMODEM mod 16384 (§4.7).
pub fn slot_for_key(key: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(hashtag(key)) % SLOT_COUNT
}

/// Computes the single slot a set of keys all belong to, or `None` if the
/// set is empty, or `Err(CrossSlot)` if the keys span more than one slot
/// (§4.7's cross-slot invariant).
pub fn single_slot(keys: &[&[u8]]) -> RedisResult<Option<u16>> {
    let mut slots = keys.iter().map(|k| slot_for_key(k));
    let Some(first) = slots.next() else {
        return Ok(None);
    };
    if slots.all(|s| s == first) {
        Ok(Some(first))
    } else {
        Err(RedisError::new(
            ErrorKind::CrossSlot,
            "command's keys do not all hash to the same slot",
        ))
    }
}

/// One contiguous slot range and the primary/replica endpoints serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub start: u16,
    pub end: u16,
    pub primary: (String, u16),
    pub replicas: Vec<(String, u16)>,
}

impl Slot {
    pub fn contains(&self, slot: u16) -> bool {
        (self.start..=self.end).contains(&slot)
    }
}

/// Parses a `CLUSTER SLOTS` reply into slot ranges.
pub fn parse_cluster_slots(reply: &Value) -> RedisResult<Vec<Slot>> {
    let Value::Bulk(entries) = reply else {
        return Err(RedisError::new(ErrorKind::Protocol, "CLUSTER SLOTS did not return an array"));
    };
    entries.iter().map(parse_slot_entry).collect()
}

fn parse_slot_entry(entry: &Value) -> RedisResult<Slot> {
    let Value::Bulk(fields) = entry else {
        return Err(RedisError::new(ErrorKind::Protocol, "malformed CLUSTER SLOTS entry"));
    };
    if fields.len() < 3 {
        return Err(RedisError::new(ErrorKind::Protocol, "CLUSTER SLOTS entry missing fields"));
    }
    let start = as_u16(&fields[0])?;
    let end = as_u16(&fields[1])?;
    let primary = as_endpoint(&fields[2])?;
    let replicas = fields[3..].iter().map(as_endpoint).collect::<RedisResult<Vec<_>>>()?;
    Ok(Slot { start, end, primary, replicas })
}

fn as_u16(value: &Value) -> RedisResult<u16> {
    match value {
        Value::Int(n) => u16::try_from(*n).map_err(|_| RedisError::new(ErrorKind::Protocol, "slot index out of range")),
        _ => Err(RedisError::new(ErrorKind::Protocol, "expected an integer slot index")),
    }
}

fn as_endpoint(value: &Value) -> RedisResult<(String, u16)> {
    let Value::Bulk(fields) = value else {
        return Err(RedisError::new(ErrorKind::Protocol, "expected a [host, port, ...] entry"));
    };
    if fields.len() < 2 {
        return Err(RedisError::new(ErrorKind::Protocol, "endpoint entry missing host/port"));
    }
    let Value::Data(host_bytes) = &fields[0] else {
        return Err(RedisError::new(ErrorKind::Protocol, "expected host as a bulk string"));
    };
    let host = String::from_utf8_lossy(host_bytes).into_owned();
    let port = as_u16(&fields[1])?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashtag_extracts_the_braced_substring() {
        assert_eq!(hashtag(b"foo{bar}baz"), b"bar");
        assert_eq!(hashtag(b"foo{}baz"), b"foo{}baz");
        assert_eq!(hashtag(b"nobrackets"), b"nobrackets");
    }

    #[test]
    fn keys_sharing_a_hashtag_land_on_the_same_slot() {
        assert_eq!(slot_for_key(b"user:{42}:name"), slot_for_key(b"user:{42}:email"));
    }

    #[test]
    fn single_slot_rejects_cross_slot_keys() {
        let a = b"a".as_slice();
        let b = b"totally-different-key".as_slice();
        assert!(single_slot(&[a, b]).is_err());
    }

    #[test]
    fn single_slot_accepts_one_key() {
        let a = b"only-key".as_slice();
        assert!(single_slot(&[a]).unwrap().is_some());
    }

    #[test]
    fn parses_a_realistic_cluster_slots_reply() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            Value::Int(0),
            Value::Int(5460),
            Value::Bulk(vec![Value::Data(b"127.0.0.1".to_vec()), Value::Int(7000)]),
            Value::Bulk(vec![Value::Data(b"127.0.0.1".to_vec()), Value::Int(7003)]),
        ])]);
        let slots = parse_cluster_slots(&reply).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].primary, ("127.0.0.1".to_string(), 7000));
        assert!(slots[0].contains(100));
        assert!(!slots[0].contains(6000));
    }
}
