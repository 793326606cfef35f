//! Redis/Valkey-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::Client;

use super::{CounterStore, Increment};
use crate::error::StoreError;

/// `INCR`, then `EXPIRE` when the increment created the key, in one
/// server-side script so a crash cannot leave a counter without a TTL.
const INCR_WITH_EXPIRY_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Counter store shared by every server instance.
///
/// Uses `ConnectionManager`, which reconnects on connection loss and
/// multiplexes concurrent commands over one connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
}

impl RedisCounterStore {
    /// Connects to `url` and checks the connection with a `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)
            .map_err(|e| StoreError::Backend(format!("invalid Redis URL: {e}")))?;
        let mut connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect to Redis: {e}")))?;
        execute_ping(&mut connection).await?;
        Ok(Self { connection })
    }
}

fn to_count(raw: i64) -> u64 {
    raw.max(0) as u64
}

async fn execute_incr<C: ConnectionLike>(conn: &mut C, key: &str) -> Result<u64, StoreError> {
    let count: i64 = redis::cmd("INCR").arg(key).query_async(conn).await?;
    Ok(to_count(count))
}

async fn execute_expire<C: ConnectionLike>(
    conn: &mut C,
    key: &str,
    ttl: Duration,
) -> Result<(), StoreError> {
    // Replies 0 when the key is gone; nothing left to expire.
    let _: i64 = redis::cmd("EXPIRE")
        .arg(key)
        .arg(ttl.as_secs().max(1))
        .query_async(conn)
        .await?;
    Ok(())
}

async fn execute_get<C: ConnectionLike>(
    conn: &mut C,
    key: &str,
) -> Result<Option<u64>, StoreError> {
    let value: Option<i64> = redis::cmd("GET").arg(key).query_async(conn).await?;
    Ok(value.map(to_count))
}

async fn execute_incr_with_expiry<C: ConnectionLike>(
    conn: &mut C,
    key: &str,
    ttl: Duration,
) -> Result<Increment, StoreError> {
    let count: i64 = redis::cmd("EVAL")
        .arg(INCR_WITH_EXPIRY_SCRIPT)
        .arg(1) // numkeys
        .arg(key)
        .arg(ttl.as_secs().max(1))
        .query_async(conn)
        .await?;
    Ok(Increment {
        count: to_count(count),
        expiry_error: None,
    })
}

async fn execute_ping<C: ConnectionLike>(conn: &mut C) -> Result<(), StoreError> {
    let _: String = redis::cmd("PING").query_async(conn).await?;
    Ok(())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        execute_incr(&mut conn, key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        execute_expire(&mut conn, key, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection.clone();
        execute_get(&mut conn, key).await
    }

    /// One `EVAL`, so there is no separate expiry call to time out.
    async fn incr_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
        deadline: Duration,
    ) -> Result<Increment, StoreError> {
        let mut conn = self.connection.clone();
        tokio::time::timeout(deadline, execute_incr_with_expiry(&mut conn, key, ttl))
            .await
            .unwrap_or(Err(StoreError::Timeout(deadline)))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        execute_ping(&mut conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_test::{MockCmd, MockRedisConnection};

    const KEY: &str = "rate_limit:auth:ip:203.0.113.7:2026-10-16-14";

    #[tokio::test]
    async fn incr_with_expiry_sends_single_eval() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("EVAL")
                .arg(INCR_WITH_EXPIRY_SCRIPT)
                .arg(1)
                .arg(KEY)
                .arg(3600u64),
            Ok(1i64),
        )])
        .assert_all_commands_consumed();

        let inc = execute_incr_with_expiry(&mut mock, KEY, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(inc.count, 1);
        assert!(inc.expiry_error.is_none());
    }

    #[tokio::test]
    async fn eval_failure_is_backend_error() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("EVAL")
                .arg(INCR_WITH_EXPIRY_SCRIPT)
                .arg(1)
                .arg(KEY)
                .arg(3600u64),
            Err::<i64, _>(redis::RedisError::from(reset)),
        )])
        .assert_all_commands_consumed();

        let err = execute_incr_with_expiry(&mut mock, KEY, Duration::from_secs(3600))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn incr_then_expire_commands() {
        let mut mock = MockRedisConnection::new(vec![
            MockCmd::new(redis::cmd("INCR").arg(KEY), Ok(1i64)),
            MockCmd::new(redis::cmd("EXPIRE").arg(KEY).arg(3600u64), Ok(1i64)),
        ])
        .assert_all_commands_consumed();

        assert_eq!(execute_incr(&mut mock, KEY).await.unwrap(), 1);
        execute_expire(&mut mock, KEY, Duration::from_secs(3600))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sub_second_ttl_rounds_up() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("EXPIRE").arg(KEY).arg(1u64),
            Ok(1i64),
        )])
        .assert_all_commands_consumed();

        execute_expire(&mut mock, KEY, Duration::from_millis(200))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_missing_and_present() {
        let mut mock = MockRedisConnection::new(vec![
            MockCmd::new(redis::cmd("GET").arg("absent"), Ok(redis::Value::Nil)),
            MockCmd::new(redis::cmd("GET").arg(KEY), Ok("7")),
        ])
        .assert_all_commands_consumed();

        assert_eq!(execute_get(&mut mock, "absent").await.unwrap(), None);
        assert_eq!(execute_get(&mut mock, KEY).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn ping_expects_pong() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("PING"),
            Ok("PONG"),
        )])
        .assert_all_commands_consumed();

        execute_ping(&mut mock).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_url_is_backend_error() {
        let err = RedisCounterStore::connect("not a url").await.err().unwrap();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
