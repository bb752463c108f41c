mod stream;

pub use stream::StreamEntry;
use stream::StreamValue;

use crate::protocol::{RedisError, StreamId, StreamIdSpec};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

/// One of the three value kinds a key can hold. Grounded on `server/database.rs`
/// in the teacher, generalized from a single byte-string entry type. Never
/// leaves the store: callers see typed results (`Vec<u8>`, `StreamEntry`,
/// a `&'static str` type name) instead.
#[derive(Debug, Clone)]
enum StoredValue {
    ByteString(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Stream(StreamValue),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::ByteString(_) => "string",
            StoredValue::List(_) => "list",
            StoredValue::Stream(_) => "stream",
        }
    }
}

struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Instant::now())
    }
}

struct BlpopWaiter {
    id: u64,
    sender: mpsc::Sender<Vec<u8>>,
}

struct XreadWaiter {
    id: u64,
    after: StreamId,
    sender: mpsc::Sender<(Vec<u8>, StreamEntry)>,
}

#[derive(Default)]
struct State {
    entries: HashMap<Vec<u8>, Entry>,
    blpop_waiters: HashMap<Vec<u8>, VecDeque<BlpopWaiter>>,
    xread_waiters: HashMap<Vec<u8>, Vec<XreadWaiter>>,
}

/// The shared keyspace. A single coarse `RwLock` guards the map and every
/// waiter queue together, so a producer can hand an element to a waiter and
/// leave the state consistent without a second lock acquisition.
pub struct Store {
    state: RwLock<State>,
    next_waiter_id: std::sync::atomic::AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_waiter_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_waiter_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, RedisError> {
        {
            let state = self.state.read().await;
            match state.entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_expired() => {}
                Some(Entry {
                    value: StoredValue::ByteString(bytes),
                    ..
                }) => return Ok(Some(bytes.clone())),
                Some(_) => return Err(RedisError::WrongType),
            }
        }

        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);
        Ok(None)
    }

    pub async fn set(&self, key: Vec<u8>, value: Vec<u8>, expiry: Option<Duration>) {
        let mut state = self.state.write().await;
        state.entries.insert(
            key,
            Entry {
                value: StoredValue::ByteString(value),
                expires_at: expiry.map(|d| Instant::now() + d),
            },
        );
    }

    pub async fn incr(&self, key: &[u8]) -> Result<i64, RedisError> {
        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);

        let current = match state.entries.get(key) {
            None => 0,
            Some(Entry {
                value: StoredValue::ByteString(bytes),
                ..
            }) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(RedisError::NotInteger)?,
            Some(_) => return Err(RedisError::WrongType),
        };

        let next = current.checked_add(1).ok_or(RedisError::NotInteger)?;
        let expires_at = state.entries.get(key).and_then(|e| e.expires_at);
        state.entries.insert(
            key.to_vec(),
            Entry {
                value: StoredValue::ByteString(next.to_string().into_bytes()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn push(
        &self,
        key: &[u8],
        values: Vec<Vec<u8>>,
        front: bool,
    ) -> Result<usize, RedisError> {
        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);

        let entry = state.entries.entry(key.to_vec()).or_insert_with(|| Entry {
            value: StoredValue::List(VecDeque::new()),
            expires_at: None,
        });

        let list = match &mut entry.value {
            StoredValue::List(list) => list,
            _ => return Err(RedisError::WrongType),
        };

        if front {
            for value in values {
                list.push_front(value);
            }
        } else {
            list.extend(values);
        }

        let len = list.len();
        drain_blpop_waiters(&mut state, key);
        Ok(len)
    }

    pub async fn rpush(&self, key: &[u8], values: Vec<Vec<u8>>) -> Result<usize, RedisError> {
        self.push(key, values, false).await
    }

    pub async fn lpush(&self, key: &[u8], values: Vec<Vec<u8>>) -> Result<usize, RedisError> {
        self.push(key, values, true).await
    }

    pub async fn lrange(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> Result<Vec<Vec<u8>>, RedisError> {
        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);

        let list = match state.entries.get(key) {
            None => return Ok(Vec::new()),
            Some(Entry {
                value: StoredValue::List(list),
                ..
            }) => list,
            Some(_) => return Err(RedisError::WrongType),
        };

        let len = list.len() as i64;
        let (start, stop) = normalize_range(start, stop, len);
        if start > stop || start >= len {
            return Ok(Vec::new());
        }

        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    pub async fn llen(&self, key: &[u8]) -> Result<usize, RedisError> {
        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);

        match state.entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: StoredValue::List(list),
                ..
            }) => Ok(list.len()),
            Some(_) => Err(RedisError::WrongType),
        }
    }

    pub async fn lpop(
        &self,
        key: &[u8],
        count: Option<i64>,
    ) -> Result<Option<Vec<Vec<u8>>>, RedisError> {
        if let Some(count) = count {
            if count <= 0 {
                return Err(RedisError::invalid_argument("value is out of range, must be positive"));
            }
        }

        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);

        let list = match state.entries.get_mut(key) {
            None => return Ok(None),
            Some(Entry {
                value: StoredValue::List(list),
                ..
            }) => list,
            Some(_) => return Err(RedisError::WrongType),
        };

        if list.is_empty() {
            return Ok(None);
        }

        let n = count.unwrap_or(1) as usize;
        let popped: Vec<Vec<u8>> = (0..n).filter_map(|_| list.pop_front()).collect();
        Ok(Some(popped))
    }

    /// Blocks until an element is available on `key` or `timeout` (seconds,
    /// `0` = forever) elapses. Returns `None` on timeout.
    pub async fn blpop(&self, key: &[u8], timeout: f64) -> Result<Option<Vec<u8>>, RedisError> {
        let (waiter_id, mut receiver) = {
            let mut state = self.state.write().await;
            evict_if_expired(&mut state, key);

            if let Some(Entry {
                value: StoredValue::List(list),
                ..
            }) = state.entries.get_mut(key)
            {
                if let Some(value) = list.pop_front() {
                    return Ok(Some(value));
                }
            } else if matches!(state.entries.get(key), Some(e) if !matches!(e.value, StoredValue::List(_)))
            {
                return Err(RedisError::WrongType);
            }

            let id = self.next_id();
            let (sender, receiver) = mpsc::channel(1);
            state
                .blpop_waiters
                .entry(key.to_vec())
                .or_default()
                .push_back(BlpopWaiter { id, sender });
            (id, receiver)
        };

        let value = if timeout <= 0.0 {
            receiver.recv().await
        } else {
            match tokio::time::timeout(Duration::from_secs_f64(timeout), receiver.recv()).await {
                Ok(value) => value,
                Err(_) => match receiver.try_recv() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        let mut state = self.state.write().await;
                        if let Some(queue) = state.blpop_waiters.get_mut(key) {
                            queue.retain(|w| w.id != waiter_id);
                        }
                        None
                    }
                },
            }
        };

        Ok(value)
    }

    pub async fn type_of(&self, key: &[u8]) -> &'static str {
        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);
        state
            .entries
            .get(key)
            .map(|e| e.value.type_name())
            .unwrap_or("none")
    }

    pub async fn xadd(
        &self,
        key: &[u8],
        id: StreamIdSpec,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
        now_ms: u64,
    ) -> Result<StreamId, RedisError> {
        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);

        let entry = state.entries.entry(key.to_vec()).or_insert_with(|| Entry {
            value: StoredValue::Stream(StreamValue::new()),
            expires_at: None,
        });

        let stream = match &mut entry.value {
            StoredValue::Stream(stream) => stream,
            _ => return Err(RedisError::WrongType),
        };

        let assigned = stream.append(id, fields, now_ms)?;
        let entry = stream.last_entry().expect("just appended").clone();
        drain_xread_waiters(&mut state, key, entry);
        Ok(assigned)
    }

    pub async fn xrange(
        &self,
        key: &[u8],
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, RedisError> {
        let mut state = self.state.write().await;
        evict_if_expired(&mut state, key);

        match state.entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: StoredValue::Stream(stream),
                ..
            }) => Ok(stream.range(start, end)),
            Some(_) => Err(RedisError::WrongType),
        }
    }

    /// Non-blocking read: entries strictly greater than each requested id.
    /// Returns only keys that had new entries.
    pub async fn xread(
        &self,
        streams: &[(Vec<u8>, StreamId)],
    ) -> Result<Vec<(Vec<u8>, Vec<StreamEntry>)>, RedisError> {
        let mut state = self.state.write().await;
        let mut result = Vec::new();

        for (key, after) in streams {
            evict_if_expired(&mut state, key);
            match state.entries.get(key) {
                Some(Entry {
                    value: StoredValue::Stream(stream),
                    ..
                }) => {
                    let entries = stream.after(*after);
                    if !entries.is_empty() {
                        result.push((key.clone(), entries));
                    }
                }
                Some(_) => return Err(RedisError::WrongType),
                None => {}
            }
        }

        Ok(result)
    }

    /// The current last id of a stream, used to resolve XREAD's `$` sentinel
    /// at dispatch time (before registering the wait).
    pub async fn last_stream_id(&self, key: &[u8]) -> StreamId {
        let state = self.state.read().await;
        match state.entries.get(key) {
            Some(Entry {
                value: StoredValue::Stream(stream),
                ..
            }) => stream.last_id(),
            _ => (0, 0),
        }
    }

    /// Blocks until any requested key receives an entry newer than its
    /// recorded id, or `block_ms` elapses (`0` = forever).
    pub async fn xread_block(
        &self,
        streams: Vec<(Vec<u8>, StreamId)>,
        block_ms: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<StreamEntry>)>, RedisError> {
        let immediate = self.xread(&streams).await?;
        if !immediate.is_empty() {
            return Ok(immediate);
        }

        let waiter_id = self.next_id();
        let (sender, mut receiver) = mpsc::channel(1);

        {
            let mut state = self.state.write().await;
            for (key, after) in &streams {
                state
                    .xread_waiters
                    .entry(key.clone())
                    .or_default()
                    .push(XreadWaiter {
                        id: waiter_id,
                        after: *after,
                        sender: sender.clone(),
                    });
            }
        }

        let received = if block_ms == 0 {
            receiver.recv().await
        } else {
            match tokio::time::timeout(Duration::from_millis(block_ms), receiver.recv()).await {
                Ok(value) => value,
                Err(_) => receiver.try_recv().ok(),
            }
        };

        // Remove this waiter from every requested key, not just the one
        // that woke it (if any): on a satisfied wait the other keys' queued
        // waiters would otherwise sit dead forever, since their receiver is
        // gone but `drain_xread_waiters` keeps retrying a failed `try_send`
        // and re-queuing them.
        {
            let mut state = self.state.write().await;
            for (key, _) in &streams {
                if let Some(waiters) = state.xread_waiters.get_mut(key) {
                    waiters.retain(|w| w.id != waiter_id);
                }
            }
        }

        match received {
            Some((key, entry)) => Ok(vec![(key, vec![entry])]),
            None => Ok(Vec::new()),
        }
    }
}

fn evict_if_expired(state: &mut State, key: &[u8]) {
    if matches!(state.entries.get(key), Some(entry) if entry.is_expired()) {
        state.entries.remove(key);
    }
}

fn normalize_range(start: i64, stop: i64, len: i64) -> (i64, i64) {
    let normalize = |i: i64| if i < 0 { (len + i).max(0) } else { i };
    let start = normalize(start);
    let stop = normalize(stop).min(len - 1);
    (start, stop)
}

fn drain_blpop_waiters(state: &mut State, key: &[u8]) {
    loop {
        let has_item = matches!(
            state.entries.get(key),
            Some(Entry { value: StoredValue::List(list), .. }) if !list.is_empty()
        );
        if !has_item {
            return;
        }

        let waiter = match state.blpop_waiters.get_mut(key) {
            Some(queue) => queue.pop_front(),
            None => None,
        };
        let Some(waiter) = waiter else { return };

        let value = match state.entries.get_mut(key) {
            Some(Entry {
                value: StoredValue::List(list),
                ..
            }) => list.pop_front(),
            _ => None,
        };
        let Some(value) = value else { return };

        if waiter.sender.try_send(value.clone()).is_err() {
            if let Some(Entry {
                value: StoredValue::List(list),
                ..
            }) = state.entries.get_mut(key)
            {
                list.push_front(value);
            }
            continue;
        }
    }
}

fn drain_xread_waiters(state: &mut State, key: &[u8], entry: StreamEntry) {
    let Some(waiters) = state.xread_waiters.get_mut(key) else {
        return;
    };

    let mut remaining = Vec::with_capacity(waiters.len());
    for waiter in waiters.drain(..) {
        if waiter.after < entry.id {
            if waiter.sender.try_send((key.to_vec(), entry.clone())).is_ok() {
                continue;
            }
        }
        remaining.push(waiter);
    }
    *waiters = remaining;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = Store::new();
        store.set(b"k".to_vec(), b"v".to_vec(), None).await;
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn get_reports_wrong_type() {
        let store = Store::new();
        store.rpush(b"k", vec![b"a".to_vec()]).await.unwrap();
        assert!(matches!(store.get(b"k").await, Err(RedisError::WrongType)));
    }

    #[tokio::test]
    async fn expiry_is_lazily_evicted() {
        let store = Store::new();
        store
            .set(b"k".to_vec(), b"v".to_vec(), Some(Duration::from_millis(1)))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_from_missing_key() {
        let store = Store::new();
        assert_eq!(store.incr(b"k").await.unwrap(), 1);
        assert_eq!(store.incr(b"k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rpush_and_lrange_negative_indices() {
        let store = Store::new();
        store
            .rpush(b"k", vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await
            .unwrap();
        let range = store.lrange(b"k", -2, -1).await.unwrap();
        assert_eq!(range, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn lpop_with_count() {
        let store = Store::new();
        store
            .rpush(b"k", vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await
            .unwrap();
        let popped = store.lpop(b"k", Some(2)).await.unwrap();
        assert_eq!(popped, Some(vec![b"a".to_vec(), b"b".to_vec()]));
    }

    #[tokio::test]
    async fn blpop_returns_immediately_when_available() {
        let store = Store::new();
        store.rpush(b"k", vec![b"a".to_vec()]).await.unwrap();
        let value = store.blpop(b"k", 1.0).await.unwrap();
        assert_eq!(value, Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn blpop_fairness_across_two_waiters() {
        let store = std::sync::Arc::new(Store::new());

        let s1 = store.clone();
        let w1 = tokio::spawn(async move { s1.blpop(b"k", 0.0).await.unwrap() });
        tokio::task::yield_now().await;

        let s2 = store.clone();
        let w2 = tokio::spawn(async move { s2.blpop(b"k", 0.0).await.unwrap() });
        tokio::task::yield_now().await;

        store
            .rpush(b"k", vec![b"first".to_vec(), b"second".to_vec()])
            .await
            .unwrap();

        assert_eq!(w1.await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(w2.await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn blpop_times_out() {
        let store = Store::new();
        let value = store.blpop(b"k", 0.01).await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn xadd_assigns_monotonic_ids() {
        let store = Store::new();
        let first = store
            .xadd(b"s", StreamIdSpec::Explicit((1, 0)), vec![(b"f".to_vec(), b"v".to_vec())], 1)
            .await
            .unwrap();
        let second = store
            .xadd(b"s", StreamIdSpec::Auto, vec![(b"f".to_vec(), b"v".to_vec())], 2)
            .await
            .unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn xrange_sentinels_cover_whole_stream() {
        let store = Store::new();
        store
            .xadd(b"s", StreamIdSpec::Explicit((1, 0)), vec![(b"f".to_vec(), b"v".to_vec())], 1)
            .await
            .unwrap();
        let entries = store
            .xrange(b"s", (0, 0), (u64::MAX, u64::MAX))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn xread_block_wakes_on_new_entry() {
        let store = std::sync::Arc::new(Store::new());
        store
            .xadd(b"s", StreamIdSpec::Explicit((1, 0)), vec![(b"f".to_vec(), b"v".to_vec())], 1)
            .await
            .unwrap();

        let reader = store.clone();
        let handle = tokio::spawn(async move {
            reader
                .xread_block(vec![(b"s".to_vec(), (1, 0))], 0)
                .await
                .unwrap()
        });
        tokio::task::yield_now().await;

        store
            .xadd(b"s", StreamIdSpec::Explicit((2, 0)), vec![(b"f".to_vec(), b"v2".to_vec())], 2)
            .await
            .unwrap();

        let result = handle.await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, b"s".to_vec());
        assert_eq!(result[0].1[0].id, (2, 0));
    }

    #[tokio::test]
    async fn xread_block_on_multiple_keys_clears_waiter_from_every_key() {
        let store = std::sync::Arc::new(Store::new());

        let reader = store.clone();
        let handle = tokio::spawn(async move {
            reader
                .xread_block(vec![(b"a".to_vec(), (0, 0)), (b"b".to_vec(), (0, 0))], 0)
                .await
                .unwrap()
        });
        tokio::task::yield_now().await;

        store
            .xadd(b"a", StreamIdSpec::Explicit((1, 0)), vec![(b"f".to_vec(), b"v".to_vec())], 1)
            .await
            .unwrap();
        handle.await.unwrap();

        let state = store.state.read().await;
        assert!(state.xread_waiters.get(b"a".as_slice()).map_or(true, |w| w.is_empty()));
        assert!(state.xread_waiters.get(b"b".as_slice()).map_or(true, |w| w.is_empty()));
    }
}
