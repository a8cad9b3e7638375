//! Canned benchmark workloads.

use crate::runner::{Attempt, Classify, Workload};
use rand::Rng;
use rpcbench_client::{Args, BatchCall, Client, ClientError, ConnectionConfig, Reply};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Operands are drawn from `1..=MAX_OPERAND`.
const MAX_OPERAND: i64 = 1000;

/// Entries in one mixed batch block.
pub const BLOCK_ENTRIES: usize = 8;

/// Benchmark suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    /// New connection for every request.
    Fresh,
    /// One connection per worker, one call per iteration.
    Reusing,
    /// One connection per worker, mixed batches.
    Batch,
}

impl Suite {
    pub const ALL: [Suite; 3] = [Suite::Fresh, Suite::Reusing, Suite::Batch];

    /// Builds the workload for one worker.
    pub fn workload(
        &self,
        config: &ConnectionConfig,
        identity: i64,
        batch_blocks: usize,
    ) -> Box<dyn Workload> {
        match self {
            Suite::Fresh => Box::new(SumWorkload::fresh(config.clone(), identity)),
            Suite::Reusing => Box::new(SumWorkload::reusing(config.clone(), identity)),
            Suite::Batch => Box::new(BatchWorkload::new(config.clone(), identity, batch_blocks)),
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suite::Fresh => write!(f, "fresh"),
            Suite::Reusing => write!(f, "reusing"),
            Suite::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for Suite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fresh" => Ok(Suite::Fresh),
            "reusing" => Ok(Suite::Reusing),
            "batch" => Ok(Suite::Batch),
            other => Err(format!("unknown suite: {}", other)),
        }
    }
}

fn operands() -> (i64, i64) {
    let mut rng = rand::thread_rng();
    (rng.gen_range(1..=MAX_OPERAND), rng.gen_range(1..=MAX_OPERAND))
}

fn check_sum(reply: &Reply, expected: i64) -> Result<(), ClientError> {
    match reply.value().as_i64() {
        Some(sum) if sum == expected => Ok(()),
        Some(sum) => Err(ClientError::Validation(format!(
            "wrong sum: got {}, expected {}",
            sum, expected
        ))),
        None => Err(ClientError::Validation(format!(
            "sum is not an integer: {}",
            reply.value()
        ))),
    }
}

/// Calls `sum(a, b)` with random operands and checks the answer.
pub struct SumWorkload {
    client: Client,
    fresh: bool,
}

impl SumWorkload {
    /// Opens a new connection for every call.
    pub fn fresh(config: ConnectionConfig, identity: i64) -> Self {
        Self {
            client: Client::new(config).with_identity(identity),
            fresh: true,
        }
    }

    /// Keeps one connection, reconnecting only after a peer close.
    pub fn reusing(config: ConnectionConfig, identity: i64) -> Self {
        Self {
            client: Client::new(config).with_identity(identity),
            fresh: false,
        }
    }

    fn call(&mut self) -> Result<u64, ClientError> {
        let (a, b) = operands();
        let reply = self
            .client
            .invoke("sum", Args::named([("a", a), ("b", b)]))?;
        check_sum(&reply, a + b)?;
        Ok(1)
    }
}

impl Workload for SumWorkload {
    fn attempt(&mut self) -> Attempt {
        let result = self.call();
        if self.fresh {
            self.client.close();
        }
        result.classify()
    }
}

/// Sends mixed batches of valid calls, notifications and broken envelopes.
///
/// Each block holds, in order: a valid call, a notification, an unknown
/// method, missing params, a wrong version string, a non-string version with
/// wrong param names, an entry without method, and a second valid call.
pub struct BatchWorkload {
    client: Client,
    identity: i64,
    blocks: usize,
}

impl BatchWorkload {
    pub fn new(config: ConnectionConfig, identity: i64, blocks: usize) -> Self {
        Self {
            client: Client::new(config).with_identity(identity),
            identity,
            blocks: blocks.max(1),
        }
    }

    /// Builds one batch whose valid calls all sum `a` and `b`.
    pub fn build(identity: i64, blocks: usize, a: i64, b: i64) -> BatchCall {
        let mut batch = BatchCall::new();
        for _ in 0..blocks.max(1) {
            for entry in mixed_block(identity, a, b) {
                batch.push_raw(entry);
            }
        }
        batch
    }

    fn call(&mut self) -> Result<u64, ClientError> {
        let (a, b) = operands();
        let batch = Self::build(self.identity, self.blocks, a, b);
        let replies = self.client.batch(&batch)?;

        let (Some(first), Some(last)) = (replies.first(), replies.last()) else {
            return Err(ClientError::Validation("batch response is empty".to_string()));
        };
        for reply in [first, last] {
            match reply {
                Ok(reply) => check_sum(reply, a + b)?,
                Err(e) => {
                    return Err(ClientError::Validation(format!(
                        "valid batch entry failed: {}",
                        e
                    )))
                }
            }
        }
        Ok(batch.len() as u64)
    }
}

impl Workload for BatchWorkload {
    fn attempt(&mut self) -> Attempt {
        self.call().classify()
    }
}

fn mixed_block(id: i64, a: i64, b: i64) -> [Value; BLOCK_ENTRIES] {
    [
        json!({"jsonrpc": "2.0", "method": "sum", "params": {"a": a, "b": b}, "id": id}),
        json!({"jsonrpc": "2.0", "method": "sum", "params": {"a": a, "b": b}}),
        json!({"jsonrpc": "2.0", "method": "sumsum", "params": {"a": a, "b": b}, "id": id}),
        json!({"jsonrpc": "2.0", "method": "sum", "params": {}, "id": id}),
        json!({"jsonrpc": "1.0", "method": "sum", "params": {"a": a, "b": b}, "id": id}),
        json!({"jsonrpc": 2.0, "method": "sum", "params": {"aa": a, "bb": b}, "id": id}),
        json!({"id": id}),
        json!({"jsonrpc": "2.0", "method": "sum", "params": {"a": a, "b": b}, "id": id}),
    ]
}
