//! Wire formats for shared-structure pub/sub payloads: `Communicator`
//! request/reply envelopes and `SharedHash` batch updates.
//!
//! Ported from `original_source/src/shared/SharedSerialization.{hh,cc}`.

use std::collections::BTreeMap;

use super::binary_serializer::{BinaryDeserializer, BinarySerializer};
use super::vault::CommunicatorReply;

/// Serialize a sorted key/value batch as `[count*2][k0][v0][k1][v1]...]`.
pub fn serialize_batch(batch: &BTreeMap<String, String>) -> Vec<u8> {
    let mut serializer = BinarySerializer::with_capacity(8 + batch.len() * 32);
    serializer.append_i64((batch.len() * 2) as i64);
    for (k, v) in batch {
        serializer.append_string(k.as_bytes());
        serializer.append_string(v.as_bytes());
    }
    serializer.into_bytes()
}

pub fn parse_batch(payload: &[u8]) -> Option<BTreeMap<String, String>> {
    let mut deserializer = BinaryDeserializer::new(payload);
    let elements = deserializer.consume_i64()?;
    if elements < 0 || elements % 2 != 0 {
        return None;
    }

    let mut out = BTreeMap::new();
    let mut key: Option<String> = None;
    for i in 0..elements {
        let value = String::from_utf8(deserializer.consume_string()?).ok()?;
        if i % 2 != 0 {
            out.insert(key.take()?, value);
        } else {
            key = Some(value);
        }
    }

    Some(out)
}

pub fn serialize_communicator_request(uuid: &str, contents: &[u8]) -> Vec<u8> {
    let mut serializer = BinarySerializer::with_capacity(24 + uuid.len() + contents.len());
    serializer.append_string(b"REQ");
    serializer.append_string(uuid.as_bytes());
    serializer.append_string(contents);
    serializer.into_bytes()
}

pub fn parse_communicator_request(payload: &[u8]) -> Option<(String, Vec<u8>)> {
    let mut de = BinaryDeserializer::new(payload);
    if de.consume_string()? != b"REQ" {
        return None;
    }
    let uuid = String::from_utf8(de.consume_string()?).ok()?;
    let contents = de.consume_string()?;
    if de.bytes_left() != 0 {
        return None;
    }
    Some((uuid, contents))
}

pub fn serialize_communicator_reply(uuid: &str, reply: &CommunicatorReply) -> Vec<u8> {
    let mut serializer =
        BinarySerializer::with_capacity(32 + uuid.len() + reply.contents.len());
    serializer.append_string(b"RESP");
    serializer.append_string(uuid.as_bytes());
    serializer.append_i64(reply.status as i64);
    serializer.append_string(&reply.contents);
    serializer.into_bytes()
}

pub fn parse_communicator_reply(payload: &[u8]) -> Option<(String, CommunicatorReply)> {
    let mut de = BinaryDeserializer::new(payload);
    if de.consume_string()? != b"RESP" {
        return None;
    }
    let uuid = String::from_utf8(de.consume_string()?).ok()?;
    let status = de.consume_i64()? as i32;
    let contents = de.consume_string()?;
    if de.bytes_left() != 0 {
        return None;
    }
    Some((uuid, CommunicatorReply { status, contents }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_round_trips() {
        let mut batch = BTreeMap::new();
        batch.insert("a".to_string(), "1".to_string());
        batch.insert("b".to_string(), "2".to_string());

        let bytes = serialize_batch(&batch);
        assert_eq!(parse_batch(&bytes), Some(batch));
    }

    #[test]
    fn communicator_request_round_trips() {
        let bytes = serialize_communicator_request("uuid-1", b"payload");
        let (uuid, contents) = parse_communicator_request(&bytes).unwrap();
        assert_eq!(uuid, "uuid-1");
        assert_eq!(contents, b"payload");
    }

    #[test]
    fn communicator_reply_round_trips() {
        let reply = CommunicatorReply {
            status: 0,
            contents: b"ack".to_vec(),
        };
        let bytes = serialize_communicator_reply("uuid-1", &reply);
        let (uuid, parsed) = parse_communicator_reply(&bytes).unwrap();
        assert_eq!(uuid, "uuid-1");
        assert_eq!(parsed.contents, b"ack");
    }

    #[test]
    fn wrong_tag_is_rejected() {
        let bytes = serialize_communicator_reply("uuid-1", &CommunicatorReply {
            status: 0,
            contents: vec![],
        });
        assert!(parse_communicator_request(&bytes).is_none());
    }
}
