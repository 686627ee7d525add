use crate::{Error, IdStore, Result};
use redis::{Connection, Script};
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Largest bitmap Redis accepts: string values are capped at 512 MiB.
pub const REDIS_MAX_BITS: u64 = 1 << 32;

// SETBIT returns the previous bit, so the conditional counter update happens
// in the same server-side step as the write.
const TEST_AND_SET: &str = r"
if redis.call('SETBIT', KEYS[1], ARGV[1], 1) == 0 then
    redis.call('INCR', KEYS[2])
    return 1
end
return 0
";

const TEST_AND_CLEAR: &str = r"
if redis.call('SETBIT', KEYS[1], ARGV[1], 0) == 1 then
    redis.call('DECR', KEYS[2])
    return 1
end
return 0
";

/// An [`IdStore`] kept in Redis so several server processes can share one ID
/// space.
///
/// The bitmap lives under `key` and the allocation counter under
/// `"{key}-count"`. Both survive process restarts for as long as Redis keeps
/// them.
///
/// - Every bit change runs as a Lua script that flips the bit and moves the
///   counter only if the bit actually changed, so the counter always equals
///   the bitmap's population count, even when several processes race on the
///   same slot. [`IdStore::allocate`] and [`IdStore::free`] share the scripts
///   behind [`IdStore::try_allocate`] and [`IdStore::try_free`].
/// - [`IdStore::free_all`] clears both keys inside `MULTI`/`EXEC`.
///
/// Every call is a blocking round trip on one connection. Failures surface as
/// [`Error::Backend`] and are never retried.
pub struct RedisStore {
    conn: Connection,
    bitmap_key: String,
    count_key: String,
    max_size: u64,
    test_and_set: Script,
    test_and_clear: Script,
}

impl RedisStore {
    /// Dials `host` and prepares the keys under `key`.
    ///
    /// `host` is either a bare `host:port` or a full `redis://` URL.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if `max_size` is zero or larger than
    ///   [`REDIS_MAX_BITS`].
    /// - [`Error::Backend`] if the server cannot be reached.
    pub fn connect(host: &str, key: &str, max_size: u64) -> Result<Self> {
        Self::check_size(max_size)?;
        let url = if host.contains("://") {
            host.to_string()
        } else {
            format!("redis://{host}/")
        };
        let client = redis::Client::open(url)?;
        let conn = client.get_connection()?;
        Self::from_connection(conn, key, max_size)
    }

    /// Wraps an already established connection.
    ///
    /// The counter key is created with `SET ... NX`, so it is initialized to
    /// zero exactly once no matter how many processes start against the same
    /// key.
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect`].
    pub fn from_connection(mut conn: Connection, key: &str, max_size: u64) -> Result<Self> {
        Self::check_size(max_size)?;
        let count_key = format!("{key}-count");
        redis::cmd("SET")
            .arg(&count_key)
            .arg(0)
            .arg("NX")
            .query::<()>(&mut conn)?;

        Ok(Self {
            conn,
            bitmap_key: key.to_string(),
            count_key,
            max_size,
            test_and_set: Script::new(TEST_AND_SET),
            test_and_clear: Script::new(TEST_AND_CLEAR),
        })
    }

    /// Key holding the bitmap.
    pub fn bitmap_key(&self) -> &str {
        &self.bitmap_key
    }

    /// Key holding the allocation counter.
    pub fn count_key(&self) -> &str {
        &self.count_key
    }

    fn check_size(max_size: u64) -> Result<()> {
        if max_size == 0 || max_size > REDIS_MAX_BITS {
            return Err(Error::InvalidRange {
                reason: format!(
                    "store size must be in 1..={REDIS_MAX_BITS} for a Redis bitmap, got {max_size}"
                ),
            });
        }
        Ok(())
    }
}

impl IdStore for RedisStore {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn is_allocated(&mut self, offset: u64) -> Result<bool> {
        let bit: i64 = redis::cmd("GETBIT")
            .arg(&self.bitmap_key)
            .arg(offset)
            .query(&mut self.conn)?;
        Ok(bit == 1)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn allocate(&mut self, offset: u64) -> Result<()> {
        self.try_allocate(offset)?;
        Ok(())
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn free(&mut self, offset: u64) -> Result<()> {
        self.try_free(offset)?;
        Ok(())
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn free_all(&mut self) -> Result<()> {
        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&self.bitmap_key)
            .ignore()
            .cmd("SET")
            .arg(&self.count_key)
            .arg(0)
            .ignore()
            .query::<()>(&mut self.conn)?;
        Ok(())
    }

    fn max_size(&self) -> u64 {
        self.max_size
    }

    fn allocated_count(&mut self) -> Result<u64> {
        let count: Option<u64> = redis::cmd("GET")
            .arg(&self.count_key)
            .query(&mut self.conn)?;
        Ok(count.unwrap_or(0))
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn try_allocate(&mut self, offset: u64) -> Result<bool> {
        let claimed: i64 = self
            .test_and_set
            .key(&self.bitmap_key)
            .key(&self.count_key)
            .arg(offset)
            .invoke(&mut self.conn)?;
        Ok(claimed == 1)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn try_free(&mut self, offset: u64) -> Result<bool> {
        let released: i64 = self
            .test_and_clear
            .key(&self.bitmap_key)
            .key(&self.count_key)
            .arg(offset)
            .invoke(&mut self.conn)?;
        Ok(released == 1)
    }
}

// These need a live Redis at 127.0.0.1:6379:
// `cargo test -p slotid --features redis -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "127.0.0.1:6379";

    fn store(key: &str, size: u64) -> RedisStore {
        let mut store = RedisStore::connect(ADDR, key, size).unwrap();
        store.free_all().unwrap();
        store
    }

    #[test]
    fn rejects_oversized_bitmaps() {
        assert!(matches!(
            RedisStore::check_size(REDIS_MAX_BITS + 1),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            RedisStore::check_size(0),
            Err(Error::InvalidRange { .. })
        ));
        assert!(RedisStore::check_size(REDIS_MAX_BITS).is_ok());
    }

    #[test]
    fn unreachable_server_is_a_backend_error() {
        let err = RedisStore::connect("127.0.0.1:1", "slotid-test-down", 8)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[test]
    #[ignore = "requires a running redis server"]
    fn bit_and_counter_move_together() {
        let mut store = store("slotid-test-bits", 64);
        store.allocate(7).unwrap();
        assert!(store.is_allocated(7).unwrap());
        assert_eq!(store.allocated_count().unwrap(), 1);

        store.free(7).unwrap();
        assert!(!store.is_allocated(7).unwrap());
        assert_eq!(store.allocated_count().unwrap(), 0);
    }

    #[test]
    #[ignore = "requires a running redis server"]
    fn repeated_writes_keep_the_counter_exact() {
        let mut store = store("slotid-test-repeat", 64);
        store.allocate(9).unwrap();
        store.allocate(9).unwrap();
        assert_eq!(store.allocated_count().unwrap(), 1);

        store.free(9).unwrap();
        store.free(9).unwrap();
        assert_eq!(store.allocated_count().unwrap(), 0);
    }

    #[test]
    #[ignore = "requires a running redis server"]
    fn scripts_claim_each_slot_once() {
        let mut store = store("slotid-test-scripts", 16);
        assert!(store.try_allocate(3).unwrap());
        assert!(!store.try_allocate(3).unwrap());
        assert_eq!(store.allocated_count().unwrap(), 1);

        assert!(store.try_free(3).unwrap());
        assert!(!store.try_free(3).unwrap());
        assert_eq!(store.allocated_count().unwrap(), 0);
    }

    #[test]
    #[ignore = "requires a running redis server"]
    fn counter_survives_reconnect() {
        let key = "slotid-test-persist";
        let mut first = store(key, 32);
        first.allocate(1).unwrap();
        first.allocate(2).unwrap();

        let mut second = RedisStore::connect(ADDR, key, 32).unwrap();
        assert_eq!(second.allocated_count().unwrap(), 2);
        assert!(second.is_allocated(2).unwrap());

        second.free_all().unwrap();
        assert_eq!(first.allocated_count().unwrap(), 0);
    }
}
