//! C4 — the staged-request side of the data model: an encoded command plus
//! the bookkeeping the connection core needs to track it through the wire.

use std::sync::Arc;

/// Monotonically increasing id assigned to every request as it's staged,
/// used to correlate responses and to drive the `AckTracker`.
pub type RequestId = u64;

/// Position of a request inside a single staged batch (a "multi-size"
/// transaction discards whole batches together).
pub type ItemIndex = usize;

/// A single already-RESP-encoded command, ready to be written to the wire.
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    pub bytes: Arc<Vec<u8>>,
}

impl EncodedRequest {
    pub fn new(bytes: Vec<u8>) -> Self {
        EncodedRequest {
            bytes: Arc::new(bytes),
        }
    }

    /// Encode a command given as an argument vector into a RESP array of
    /// bulk strings.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let args: Vec<Vec<u8>> = args.into_iter().map(|a| a.as_ref().to_vec()).collect();
        let mut out = Vec::new();
        out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in &args {
            out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
        EncodedRequest::new(out)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A request as staged into the `RequestQueue`: the wire bytes plus how
/// many individual RESP replies it expects back (>1 for a pipelined batch
/// submitted as a single staged item).
#[derive(Debug, Clone)]
pub struct StagedRequest {
    pub id: RequestId,
    pub encoded: EncodedRequest,
    pub reply_count: usize,
}

impl StagedRequest {
    pub fn new(id: RequestId, encoded: EncodedRequest, reply_count: usize) -> Self {
        StagedRequest {
            id,
            encoded,
            reply_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_args_as_resp_array() {
        let req = EncodedRequest::from_args([b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        assert_eq!(&req.bytes[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }
}
