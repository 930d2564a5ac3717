//! Redis-compatible key/value commands over the same pool and codec.
//!
//! FalkorDB runs as a Redis module, so the query cache can live on the same
//! server (or any Redis) without a second client library.

use std::time::Duration;

use crate::error::{PoolError, Result};
use crate::pool::ConnectionPool;
use crate::resp::Frame;

const SCAN_BATCH: &str = "100";

/// Key/value client with TTL support.
#[derive(Clone)]
pub struct KvClient {
    pool: ConnectionPool,
}

impl KvClient {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.pool.command(&["GET", key]).await? {
            Frame::Null => Ok(None),
            Frame::Error(msg) => Err(PoolError::Query(msg)),
            frame => frame
                .as_text()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| PoolError::Protocol(format!("unexpected GET reply {frame:?}"))),
        }
    }

    /// `SET key value EX ttl`.
    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1).to_string();
        match self
            .pool
            .command(&["SET", key, value, "EX", secs.as_str()])
            .await?
        {
            Frame::Error(msg) => Err(PoolError::Query(msg)),
            _ => Ok(()),
        }
    }

    /// Delete every key starting with `prefix`. Returns the number deleted.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor = "0".to_string();
        let mut deleted = 0u64;

        loop {
            let reply = self
                .pool
                .command(&["SCAN", cursor.as_str(), "MATCH", pattern.as_str(), "COUNT", SCAN_BATCH])
                .await?;
            let (next, keys) = parse_scan_reply(reply)?;

            if !keys.is_empty() {
                let mut args: Vec<&str> = Vec::with_capacity(keys.len() + 1);
                args.push("DEL");
                args.extend(keys.iter().map(String::as_str));
                match self.pool.command(&args).await? {
                    Frame::Integer(n) => deleted += n.max(0) as u64,
                    Frame::Error(msg) => return Err(PoolError::Query(msg)),
                    other => {
                        return Err(PoolError::Protocol(format!(
                            "unexpected DEL reply {other:?}"
                        )))
                    }
                }
            }

            if next == "0" {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }
}

fn parse_scan_reply(reply: Frame) -> Result<(String, Vec<String>)> {
    let Frame::Array(mut parts) = reply else {
        return match reply {
            Frame::Error(msg) => Err(PoolError::Query(msg)),
            other => Err(PoolError::Protocol(format!("unexpected SCAN reply {other:?}"))),
        };
    };
    if parts.len() != 2 {
        return Err(PoolError::Protocol("SCAN reply must have 2 elements".into()));
    }
    let keys_frame = parts.pop().unwrap_or(Frame::Null);
    let cursor_frame = parts.pop().unwrap_or(Frame::Null);

    let cursor = cursor_frame
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| PoolError::Protocol("SCAN cursor is not a string".into()))?;
    let keys = match keys_frame {
        Frame::Array(items) => items
            .iter()
            .map(|f| {
                f.as_text()
                    .map(str::to_string)
                    .ok_or_else(|| PoolError::Protocol("SCAN key is not a string".into()))
            })
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(PoolError::Protocol("SCAN keys are not an array".into())),
    };
    Ok((cursor, keys))
}

/// Escape glob metacharacters so the prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
