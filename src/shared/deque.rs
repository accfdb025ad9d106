//! `SharedDeque` — a server-resident FIFO queue, with local notification of
//! depth changes over pub/sub so repeated `size()` calls don't have to
//! round-trip every time.
//!
//! Ported from `original_source/include/qclient/shared/SharedDeque.hh`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::flusher::background::CommandSink;
use crate::request::EncodedRequest;
use crate::types::Value;

pub struct SharedDeque {
    sink: Arc<dyn CommandSink>,
    key: String,
    cached_size: AtomicUsize,
    cached_size_valid: AtomicBool,
}

impl SharedDeque {
    pub fn new(key: impl Into<String>, sink: Arc<dyn CommandSink>) -> Self {
        SharedDeque {
            sink,
            key: key.into(),
            cached_size: AtomicUsize::new(0),
            cached_size_valid: AtomicBool::new(false),
        }
    }

    pub fn push_back(&self, contents: &[u8]) {
        self.sink
            .submit(EncodedRequest::from_args([b"RPUSH".to_vec(), self.key.as_bytes().to_vec(), contents.to_vec()]))
            .wait();
        self.invalidate_cached_size();
    }

    pub fn clear(&self) {
        self.sink
            .submit(EncodedRequest::from_args(["DEL", &self.key]))
            .wait();
        self.invalidate_cached_size();
    }

    /// Pop the front item. An empty deque yields `Ok(String::new())`, not an
    /// error — matches the original's "no item" is not a failure stance.
    pub fn pop_front(&self) -> RedisResult<String> {
        let reply = self
            .sink
            .submit(EncodedRequest::from_args(["LPOP", &self.key]))
            .wait();
        self.invalidate_cached_size();

        match reply.as_ref() {
            Value::Nil => Ok(String::new()),
            Value::Data(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            Value::Status(s) => Ok(s.clone()),
            Value::Error(e) => Err(RedisError::new(ErrorKind::ServerError, e.clone())),
            other => Err(RedisError::new(
                ErrorKind::ResponseError,
                format!("unexpected reply to LPOP: {other:?}"),
            )),
        }
    }

    pub fn size(&self) -> RedisResult<usize> {
        if self.cached_size_valid.load(Ordering::Acquire) {
            return Ok(self.cached_size.load(Ordering::Acquire));
        }

        let reply = self
            .sink
            .submit(EncodedRequest::from_args(["LLEN", &self.key]))
            .wait();

        match reply.as_ref() {
            Value::Int(n) if *n >= 0 => {
                let size = *n as usize;
                self.cached_size.store(size, Ordering::Release);
                self.cached_size_valid.store(true, Ordering::Release);
                Ok(size)
            }
            Value::Error(e) => Err(RedisError::new(ErrorKind::ServerError, e.clone())),
            other => Err(RedisError::new(
                ErrorKind::ResponseError,
                format!("unexpected reply to LLEN: {other:?}"),
            )),
        }
    }

    pub fn invalidate_cached_size(&self) {
        self.cached_size_valid.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::{pair, QFuture};
    use crate::types::Reply;
    use std::sync::Mutex;

    struct ScriptedSink {
        replies: Mutex<Vec<Value>>,
    }

    impl CommandSink for ScriptedSink {
        fn submit(&self, _request: EncodedRequest) -> QFuture<Reply> {
            let value = self.replies.lock().unwrap().remove(0);
            let (promise, future) = pair();
            promise.set_value(Arc::new(value));
            future
        }
    }

    #[test]
    fn size_is_cached_until_invalidated() {
        let sink = Arc::new(ScriptedSink {
            replies: Mutex::new(vec![Value::Int(3), Value::Int(9)]),
        });
        let deque = SharedDeque::new("key", sink);

        assert_eq!(deque.size().unwrap(), 3);
        assert_eq!(deque.size().unwrap(), 3); // cached, no second submit consumed

        deque.invalidate_cached_size();
        assert_eq!(deque.size().unwrap(), 9);
    }

    #[test]
    fn pop_front_on_empty_deque_is_not_an_error() {
        let sink = Arc::new(ScriptedSink {
            replies: Mutex::new(vec![Value::Nil]),
        });
        let deque = SharedDeque::new("key", sink);
        assert_eq!(deque.pop_front().unwrap(), "");
    }
}
