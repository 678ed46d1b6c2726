//! Command handler for the RESP server
//!
//! Every command maps onto insert / lookup / release / erase against the
//! shared cache. Handles never outlive a single command.

use std::sync::Arc;

use bytes::Bytes;
use shardcache::ShardedCache;

use crate::resp::Frame;

pub struct CommandHandler {
    cache: Arc<ShardedCache<Bytes>>,
}

fn wrong_arity(command: &str) -> Frame {
    Frame::error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_ascii_lowercase()
    ))
}

impl CommandHandler {
    pub fn new(cache: Arc<ShardedCache<Bytes>>) -> Self {
        Self { cache }
    }

    pub fn handle(&self, cmd: Frame) -> Frame {
        let items = match cmd {
            Frame::Array(items) if !items.is_empty() => items,
            _ => return Frame::error("ERR invalid command format"),
        };

        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Frame::Bulk(data) => parts.push(data),
                _ => return Frame::error("ERR command arguments must be bulk strings"),
            }
        }

        let command = String::from_utf8_lossy(&parts[0]).to_ascii_uppercase();
        let args = &parts[1..];

        match command.as_str() {
            "PING" => self.handle_ping(args),
            "ECHO" => self.handle_echo(args),
            "GET" => self.handle_get(args),
            "SET" => self.handle_set(args),
            "DEL" => self.handle_del(args),
            "EXISTS" => self.handle_exists(args),
            "DBSIZE" => Frame::Integer(self.cache.len() as i64),
            "FLUSHDB" => self.handle_flushdb(),
            "INFO" => self.handle_info(),
            // redis-cli sends this on connect
            "COMMAND" => Frame::Array(Vec::new()),
            _ => Frame::error(format!("ERR unknown command '{}'", command)),
        }
    }

    fn handle_ping(&self, args: &[Bytes]) -> Frame {
        match args {
            [] => Frame::Simple("PONG".to_string()),
            [msg] => Frame::Bulk(msg.clone()),
            _ => wrong_arity("PING"),
        }
    }

    fn handle_echo(&self, args: &[Bytes]) -> Frame {
        match args {
            [msg] => Frame::Bulk(msg.clone()),
            _ => wrong_arity("ECHO"),
        }
    }

    fn handle_get(&self, args: &[Bytes]) -> Frame {
        let [key] = args else {
            return wrong_arity("GET");
        };

        let Some(handle) = self.cache.lookup(key) else {
            return Frame::Null;
        };
        let value = self.cache.with_value(&handle, Bytes::clone);
        let released = self.cache.release(handle);

        match (value, released) {
            (Ok(value), Ok(())) => Frame::Bulk(value),
            (Err(e), _) | (_, Err(e)) => Frame::error(format!("ERR {}", e)),
        }
    }

    fn handle_set(&self, args: &[Bytes]) -> Frame {
        let [key, value] = args else {
            return wrong_arity("SET");
        };

        let charge = key.len() + value.len();
        let stored = self
            .cache
            .insert(key, value.clone(), charge)
            .and_then(|handle| self.cache.release(handle));
        match stored {
            Ok(()) => Frame::Simple("OK".to_string()),
            Err(e) => Frame::error(format!("ERR {}", e)),
        }
    }

    fn handle_del(&self, args: &[Bytes]) -> Frame {
        if args.is_empty() {
            return wrong_arity("DEL");
        }
        let erased = args.iter().filter(|key| self.cache.erase(key)).count();
        Frame::Integer(erased as i64)
    }

    fn handle_exists(&self, args: &[Bytes]) -> Frame {
        if args.is_empty() {
            return wrong_arity("EXISTS");
        }

        let mut count = 0i64;
        for key in args {
            if let Some(handle) = self.cache.lookup(key) {
                if self.cache.release(handle).is_ok() {
                    count += 1;
                }
            }
        }
        Frame::Integer(count)
    }

    fn handle_flushdb(&self) -> Frame {
        self.cache.prune();
        Frame::Simple("OK".to_string())
    }

    fn handle_info(&self) -> Frame {
        let config = self.cache.config();
        let mut info = format!(
            "# Server\r\n\
             shardcache_version:{}\r\n\
             \r\n\
             # Memory\r\n\
             total_keys:{}\r\n\
             used_charge:{}\r\n\
             capacity:{}\r\n\
             shards:{}\r\n\
             pinned:{}\r\n\
             \r\n\
             # Stats\r\n",
            env!("CARGO_PKG_VERSION"),
            self.cache.len(),
            self.cache.total_charge(),
            config.capacity,
            self.cache.shard_count(),
            self.cache.pinned_len(),
        );
        for line in self.cache.stats().to_string().lines() {
            info.push_str(line);
            info.push_str("\r\n");
        }
        Frame::bulk(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardcache::CacheConfig;

    fn handler(capacity: usize) -> CommandHandler {
        let config = CacheConfig::new(capacity).with_shard_bits(0);
        CommandHandler::new(Arc::new(ShardedCache::new(config).unwrap()))
    }

    fn command(parts: &[&str]) -> Frame {
        Frame::Array(
            parts
                .iter()
                .map(|p| Frame::bulk(Bytes::copy_from_slice(p.as_bytes())))
                .collect(),
        )
    }

    #[test]
    fn test_ping() {
        let handler = handler(100);
        assert_eq!(
            handler.handle(command(&["PING"])),
            Frame::Simple("PONG".to_string())
        );
        assert_eq!(handler.handle(command(&["ping", "hi"])), Frame::bulk("hi"));
    }

    #[test]
    fn test_echo() {
        let handler = handler(100);
        assert_eq!(handler.handle(command(&["ECHO", "hello"])), Frame::bulk("hello"));
        assert!(matches!(handler.handle(command(&["ECHO"])), Frame::Error(_)));
    }

    #[test]
    fn test_set_and_get() {
        let handler = handler(100);

        let resp = handler.handle(command(&["SET", "mykey", "myvalue"]));
        assert_eq!(resp, Frame::Simple("OK".to_string()));

        assert_eq!(handler.handle(command(&["GET", "mykey"])), Frame::bulk("myvalue"));
        assert_eq!(handler.handle(command(&["GET", "other"])), Frame::Null);
        assert_eq!(handler.cache.pinned_len(), 0);
    }

    #[test]
    fn test_set_overwrites() {
        let handler = handler(100);
        handler.handle(command(&["SET", "k", "one"]));
        handler.handle(command(&["SET", "k", "two"]));

        assert_eq!(handler.handle(command(&["GET", "k"])), Frame::bulk("two"));
        assert_eq!(handler.handle(command(&["DBSIZE"])), Frame::Integer(1));
    }

    #[test]
    fn test_eviction_by_charge() {
        // Each pair charges 2 bytes: capacity fits two
        let handler = handler(4);
        handler.handle(command(&["SET", "a", "1"]));
        handler.handle(command(&["SET", "b", "2"]));
        handler.handle(command(&["SET", "c", "3"]));

        assert_eq!(handler.handle(command(&["GET", "a"])), Frame::Null);
        assert_eq!(handler.handle(command(&["EXISTS", "a", "b", "c"])), Frame::Integer(2));
    }

    #[test]
    fn test_del_and_exists() {
        let handler = handler(100);
        handler.handle(command(&["SET", "a", "1"]));
        handler.handle(command(&["SET", "b", "2"]));

        assert_eq!(handler.handle(command(&["DEL", "a", "zzz"])), Frame::Integer(1));
        assert_eq!(handler.handle(command(&["EXISTS", "a", "b"])), Frame::Integer(1));
    }

    #[test]
    fn test_flushdb() {
        let handler = handler(100);
        handler.handle(command(&["SET", "a", "1"]));
        handler.handle(command(&["SET", "b", "2"]));

        assert_eq!(
            handler.handle(command(&["FLUSHDB"])),
            Frame::Simple("OK".to_string())
        );
        assert_eq!(handler.handle(command(&["DBSIZE"])), Frame::Integer(0));
    }

    #[test]
    fn test_info() {
        let handler = handler(100);
        handler.handle(command(&["SET", "a", "1"]));
        handler.handle(command(&["GET", "a"]));

        let Frame::Bulk(info) = handler.handle(command(&["INFO"])) else {
            panic!("INFO should return a bulk string");
        };
        let info = String::from_utf8(info.to_vec()).unwrap();
        assert!(info.contains("total_keys:1\r\n"));
        assert!(info.contains("used_charge:2\r\n"));
        assert!(info.contains("cache_hits:1\r\n"));
    }

    #[test]
    fn test_bad_input() {
        let handler = handler(100);
        assert!(matches!(handler.handle(Frame::Integer(1)), Frame::Error(_)));
        assert!(matches!(handler.handle(Frame::Array(vec![])), Frame::Error(_)));
        assert!(matches!(
            handler.handle(Frame::Array(vec![Frame::Integer(1)])),
            Frame::Error(_)
        ));
        assert!(matches!(handler.handle(command(&["NOPE"])), Frame::Error(_)));
        assert!(matches!(handler.handle(command(&["SET", "k"])), Frame::Error(_)));
    }
}
