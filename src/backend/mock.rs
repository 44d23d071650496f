//! In-memory store nodes for tests
//!
//! `MockConnector` hands out connections to scripted `MockNode`s keyed by node
//! id. Each node understands a small subset of commands, can be made slow,
//! unreachable, or can fail its next calls with injected errors.

use super::{Connector, NodeEndpoint, StoreConnection};
use crate::error::{ClusterError, Result};
use crate::protocol::RespValue;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockData {
    strings: HashMap<String, Bytes>,
    lists: HashMap<String, VecDeque<Bytes>>,
    hashes: HashMap<String, BTreeMap<String, Bytes>>,
    sets: HashMap<String, BTreeSet<Bytes>>,
    streams: HashMap<String, Vec<(String, Vec<(Bytes, Bytes)>)>>,
    groups: BTreeSet<(String, String)>,
}

pub(crate) struct MockNode {
    id: String,
    reachable: AtomicBool,
    ping_fails: AtomicBool,
    latency_ms: AtomicU64,
    failures: Mutex<VecDeque<ClusterError>>,
    dispatched: AtomicUsize,
    connects: AtomicUsize,
    data: Mutex<MockData>,
}

impl MockNode {
    fn new(id: &str) -> Self {
        MockNode {
            id: id.to_string(),
            reachable: AtomicBool::new(true),
            ping_fails: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            failures: Mutex::new(VecDeque::new()),
            dispatched: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            data: Mutex::new(MockData::default()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail the next non-PING call with `error`
    pub fn fail_next(&self, error: ClusterError) {
        self.failures.lock().push_back(error);
    }

    /// Non-PING calls received so far
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn has_string(&self, key: &str) -> bool {
        self.data.lock().strings.contains_key(key)
    }

    fn connection_error(&self, reason: &str) -> ClusterError {
        ClusterError::Connection {
            node: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    async fn call(&self, command: &RespValue) -> Result<RespValue> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.connection_error("unreachable"));
        }

        let parts: Vec<Bytes> = command
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_bulk_string().cloned()).collect())
            .unwrap_or_default();
        let name = parts
            .first()
            .map(|b| String::from_utf8_lossy(b).to_ascii_uppercase())
            .unwrap_or_default();

        if name == "PING" {
            if self.ping_fails.load(Ordering::SeqCst) {
                return Err(self.connection_error("ping failed"));
            }
            return Ok(RespValue::simple_string("PONG"));
        }

        self.dispatched.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let reply = self.apply(&name, &parts[1..]);
        match reply {
            RespValue::Error(message) => Err(ClusterError::command(message)),
            reply => Ok(reply),
        }
    }

    fn apply(&self, name: &str, args: &[Bytes]) -> RespValue {
        let text = |i: usize| String::from_utf8_lossy(&args[i]).into_owned();
        let mut data = self.data.lock();
        let wrong_type =
            || RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value");

        match name {
            "GET" => match data.strings.get(&text(0)) {
                Some(v) => RespValue::bulk_string(v.clone()),
                None if data.lists.contains_key(&text(0)) => wrong_type(),
                None => RespValue::Null,
            },
            "SET" => {
                data.strings.insert(text(0), args[1].clone());
                RespValue::simple_string("OK")
            }
            "DEL" => {
                let mut removed = 0;
                for i in 0..args.len() {
                    let key = text(i);
                    if data.strings.remove(&key).is_some()
                        | data.lists.remove(&key).is_some()
                        | data.hashes.remove(&key).is_some()
                        | data.sets.remove(&key).is_some()
                    {
                        removed += 1;
                    }
                }
                RespValue::integer(removed)
            }
            "EXISTS" | "EXPIRE" => {
                let key = text(0);
                let found = data.strings.contains_key(&key)
                    || data.lists.contains_key(&key)
                    || data.hashes.contains_key(&key)
                    || data.sets.contains_key(&key);
                RespValue::integer(found as i64)
            }
            "LPUSH" | "RPUSH" => {
                let key = text(0);
                if data.strings.contains_key(&key) {
                    return wrong_type();
                }
                let list = data.lists.entry(key).or_default();
                for value in &args[1..] {
                    if name == "LPUSH" {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                RespValue::integer(list.len() as i64)
            }
            "LPOP" | "RPOP" => {
                let popped = data.lists.get_mut(&text(0)).and_then(|list| {
                    if name == "LPOP" {
                        list.pop_front()
                    } else {
                        list.pop_back()
                    }
                });
                popped.map_or(RespValue::Null, RespValue::bulk_string)
            }
            "LTRIM" => {
                if let Some(list) = data.lists.get_mut(&text(0)) {
                    let len = list.len() as i64;
                    let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
                    let start = norm(text(1).parse().unwrap_or(0));
                    let stop = norm(text(2).parse().unwrap_or(-1)).min(len - 1);
                    let kept: VecDeque<Bytes> = list
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| (*i as i64) >= start && (*i as i64) <= stop)
                        .map(|(_, v)| v.clone())
                        .collect();
                    *list = kept;
                }
                RespValue::simple_string("OK")
            }
            "LLEN" => RespValue::integer(data.lists.get(&text(0)).map_or(0, |l| l.len() as i64)),
            "LRANGE" => {
                let items = data.lists.get(&text(0)).cloned().unwrap_or_default();
                let len = items.len() as i64;
                let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
                let start = norm(text(1).parse().unwrap_or(0));
                let stop = norm(text(2).parse().unwrap_or(-1)).min(len - 1);
                let values = (start..=stop)
                    .filter_map(|i| items.get(i as usize).cloned())
                    .map(RespValue::bulk_string)
                    .collect();
                RespValue::array(values)
            }
            "HSET" => {
                let hash = data.hashes.entry(text(0)).or_default();
                let added = hash.insert(text(1), args[2].clone()).is_none();
                RespValue::integer(added as i64)
            }
            "HGET" => match data.hashes.get(&text(0)).and_then(|h| h.get(&text(1))) {
                Some(v) => RespValue::bulk_string(v.clone()),
                None => RespValue::Null,
            },
            "HGETALL" => {
                let mut flat = Vec::new();
                if let Some(hash) = data.hashes.get(&text(0)) {
                    for (field, value) in hash {
                        flat.push(RespValue::bulk_string(field.clone()));
                        flat.push(RespValue::bulk_string(value.clone()));
                    }
                }
                RespValue::array(flat)
            }
            "HDEL" => {
                let key = text(0);
                let fields: Vec<String> = (1..args.len()).map(text).collect();
                let hash = data.hashes.entry(key).or_default();
                let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
                RespValue::integer(removed as i64)
            }
            "SADD" => {
                let set = data.sets.entry(text(0)).or_default();
                let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
                RespValue::integer(added as i64)
            }
            "SREM" => {
                let removed = match data.sets.get_mut(&text(0)) {
                    Some(set) => args[1..].iter().filter(|m| set.remove(*m)).count(),
                    None => 0,
                };
                RespValue::integer(removed as i64)
            }
            "SMEMBERS" => {
                let members = data
                    .sets
                    .get(&text(0))
                    .map(|s| s.iter().cloned().map(RespValue::bulk_string).collect())
                    .unwrap_or_default();
                RespValue::array(members)
            }
            "XADD" => {
                let stream = text(0);
                let entries = data.streams.entry(stream).or_default();
                let id = format!("{}-0", entries.len() + 1);
                let start = args.iter().position(|a| &a[..] == b"*").map_or(1, |p| p + 1);
                let fields = args[start..]
                    .chunks(2)
                    .filter(|c| c.len() == 2)
                    .map(|c| (c[0].clone(), c[1].clone()))
                    .collect();
                entries.push((id.clone(), fields));
                RespValue::bulk_string(id)
            }
            "XLEN" => RespValue::integer(data.streams.get(&text(0)).map_or(0, |s| s.len() as i64)),
            "XRANGE" => {
                let entries = data.streams.get(&text(0)).cloned().unwrap_or_default();
                RespValue::array(entries.into_iter().map(Self::stream_entry).collect())
            }
            "XREAD" => {
                let start = args
                    .iter()
                    .position(|a| a.eq_ignore_ascii_case(b"STREAMS"))
                    .map_or(args.len(), |p| p + 1);
                let rest = &args[start..];
                let (names, ids) = rest.split_at(rest.len() / 2);

                let sequence = |id: &str| -> u64 {
                    id.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
                };
                let mut replies = Vec::new();
                for (name, after) in names.iter().zip(ids) {
                    let name = String::from_utf8_lossy(name).into_owned();
                    let after = sequence(&String::from_utf8_lossy(after));
                    let entries: Vec<RespValue> = data
                        .streams
                        .get(&name)
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|(id, _)| sequence(id) > after)
                        .map(Self::stream_entry)
                        .collect();
                    if !entries.is_empty() {
                        replies.push(RespValue::array(vec![
                            RespValue::bulk_string(name),
                            RespValue::array(entries),
                        ]));
                    }
                }

                if replies.is_empty() {
                    RespValue::Null
                } else {
                    RespValue::array(replies)
                }
            }
            "INFO" => RespValue::bulk_string(format!(
                "# Server\r\nredis_version:7.2.0\r\nnode_id:{}\r\n\r\n# Keyspace\r\ndb0:keys={}\r\n",
                self.id,
                data.strings.len()
            )),
            "XGROUP" => {
                let group = (text(1), text(2));
                if !data.groups.insert(group) {
                    return RespValue::error("BUSYGROUP Consumer Group name already exists");
                }
                RespValue::simple_string("OK")
            }
            "DBSIZE" => RespValue::integer(data.strings.len() as i64),
            other => RespValue::error(format!("ERR unknown command '{}'", other)),
        }
    }

    fn stream_entry((id, fields): (String, Vec<(Bytes, Bytes)>)) -> RespValue {
        let flat = fields
            .into_iter()
            .flat_map(|(f, v)| [RespValue::bulk_string(f), RespValue::bulk_string(v)])
            .collect();
        RespValue::array(vec![RespValue::bulk_string(id), RespValue::array(flat)])
    }
}

/// Connector over a set of mock nodes keyed by node id
#[derive(Default)]
pub(crate) struct MockConnector {
    nodes: Mutex<HashMap<String, Arc<MockNode>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The mock behind `node_id`, created on first use
    pub fn node(&self, node_id: &str) -> Arc<MockNode> {
        self.nodes
            .lock()
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(MockNode::new(node_id)))
            .clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<Box<dyn StoreConnection>> {
        let node = self.node(&endpoint.node_id);
        if !node.reachable.load(Ordering::SeqCst) {
            return Err(node.connection_error("connection refused"));
        }
        node.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection { node }))
    }
}

struct MockConnection {
    node: Arc<MockNode>,
}

#[async_trait]
impl StoreConnection for MockConnection {
    async fn call(&mut self, command: &RespValue) -> Result<RespValue> {
        self.node.call(command).await
    }
}
