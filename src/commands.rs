//! The static command table (§4.2): classification flags and key-position
//! extractors for the commands this crate's router and connection lifecycle
//! need to reason about. This is deliberately not an exhaustive Redis command
//! reference — full command-surface coverage is the codegen layer's job
//! (§1 non-goal) — only the subset needed to make routing, subscriber-mode
//! gating, and monitor-mode gating correct.

use crate::cmd::{Cmd, Routable};
use crate::connection::ConnectionLike;
use crate::types::{FromRedisValue, RedisResult, ToRedisArgs, Value};

/// How a command's keys are found among its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    /// No keys (e.g. `PING`, `INFO`).
    None,
    /// Keys start at a fixed argument index and run for a fixed count.
    Fixed { first: usize, count: usize },
    /// All arguments from `first` to the end are keys (e.g. `DEL key [key ...]`).
    FixedToEnd { first: usize },
    /// `EVAL`-style: argument at `numkeys_idx` is itself a count of keys that
    /// follow immediately after it (§4.7: "skip one argument... before
    /// reading N keys").
    EvalStyle { numkeys_idx: usize },
}

/// Classification flags consulted by the connection lifecycle (§4.4) and the
/// cluster router (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFlags {
    pub is_readonly: bool,
    pub is_write: bool,
    pub enters_subscriber_mode: bool,
    pub exits_subscriber_mode: bool,
    pub will_disconnect: bool,
    pub valid_in_monitor_mode: bool,
    pub valid_in_subscriber_mode: bool,
    pub is_custom: bool,
    pub key_spec: KeySpec,
}

impl CommandFlags {
    pub(crate) const fn unknown() -> Self {
        CommandFlags {
            is_readonly: false,
            is_write: true,
            enters_subscriber_mode: false,
            exits_subscriber_mode: false,
            will_disconnect: false,
            valid_in_monitor_mode: false,
            valid_in_subscriber_mode: false,
            is_custom: false,
            key_spec: KeySpec::None,
        }
    }

    const fn read(key_spec: KeySpec) -> Self {
        CommandFlags {
            is_readonly: true,
            is_write: false,
            key_spec,
            ..Self::unknown()
        }
    }

    const fn write(key_spec: KeySpec) -> Self {
        CommandFlags {
            is_readonly: false,
            is_write: true,
            key_spec,
            ..Self::unknown()
        }
    }

    const fn no_key(is_write: bool) -> Self {
        CommandFlags {
            is_readonly: !is_write,
            is_write,
            key_spec: KeySpec::None,
            ..Self::unknown()
        }
    }
}

struct CommandDef {
    name: &'static str,
    flags: CommandFlags,
}

macro_rules! no_key_cmd {
    ($write:expr) => {
        CommandFlags::no_key($write)
    };
}

static COMMAND_TABLE: &[CommandDef] = &[
    CommandDef { name: "GET", flags: CommandFlags::read(KeySpec::Fixed { first: 1, count: 1 }) },
    CommandDef { name: "MGET", flags: CommandFlags::read(KeySpec::FixedToEnd { first: 1 }) },
    CommandDef { name: "EXISTS", flags: CommandFlags::read(KeySpec::FixedToEnd { first: 1 }) },
    CommandDef { name: "SET", flags: CommandFlags::write(KeySpec::Fixed { first: 1, count: 1 }) },
    // MSET's keys interleave with values (key value key value ...); that
    // stride isn't expressible in `KeySpec` today, so it routes as keyless
    // (any primary) rather than by slot. Tracked as a known gap, not a bug:
    // a cluster deployment should prefer per-key SET calls or a pipeline.
    CommandDef { name: "MSET", flags: CommandFlags::write(KeySpec::None) },
    CommandDef { name: "DEL", flags: CommandFlags::write(KeySpec::FixedToEnd { first: 1 }) },
    CommandDef { name: "INCR", flags: CommandFlags::write(KeySpec::Fixed { first: 1, count: 1 }) },
    CommandDef { name: "DECR", flags: CommandFlags::write(KeySpec::Fixed { first: 1, count: 1 }) },
    CommandDef { name: "EXPIRE", flags: CommandFlags::write(KeySpec::Fixed { first: 1, count: 1 }) },
    CommandDef { name: "TTL", flags: CommandFlags::read(KeySpec::Fixed { first: 1, count: 1 }) },
    CommandDef { name: "HSET", flags: CommandFlags::write(KeySpec::Fixed { first: 1, count: 1 }) },
    CommandDef { name: "HGET", flags: CommandFlags::read(KeySpec::Fixed { first: 1, count: 1 }) },
    CommandDef { name: "HGETALL", flags: CommandFlags::read(KeySpec::Fixed { first: 1, count: 1 }) },
    CommandDef { name: "EVAL", flags: CommandFlags::write(KeySpec::EvalStyle { numkeys_idx: 2 }) },
    CommandDef { name: "EVALSHA", flags: CommandFlags::write(KeySpec::EvalStyle { numkeys_idx: 2 }) },
    CommandDef { name: "MULTI", flags: no_key_cmd!(false) },
    CommandDef { name: "EXEC", flags: no_key_cmd!(false) },
    CommandDef { name: "DISCARD", flags: no_key_cmd!(false) },
    CommandDef { name: "WATCH", flags: CommandFlags::read(KeySpec::FixedToEnd { first: 1 }) },
    CommandDef { name: "UNWATCH", flags: no_key_cmd!(false) },
    CommandDef {
        name: "SUBSCRIBE",
        flags: CommandFlags {
            enters_subscriber_mode: true,
            valid_in_subscriber_mode: true,
            ..no_key_cmd!(false)
        },
    },
    CommandDef {
        name: "UNSUBSCRIBE",
        flags: CommandFlags {
            valid_in_subscriber_mode: true,
            ..no_key_cmd!(false)
        },
    },
    CommandDef {
        name: "PSUBSCRIBE",
        flags: CommandFlags {
            enters_subscriber_mode: true,
            valid_in_subscriber_mode: true,
            ..no_key_cmd!(false)
        },
    },
    CommandDef {
        name: "PUNSUBSCRIBE",
        flags: CommandFlags {
            valid_in_subscriber_mode: true,
            ..no_key_cmd!(false)
        },
    },
    CommandDef { name: "PUBLISH", flags: no_key_cmd!(true) },
    CommandDef {
        name: "PING",
        flags: CommandFlags {
            valid_in_subscriber_mode: true,
            valid_in_monitor_mode: true,
            ..no_key_cmd!(false)
        },
    },
    CommandDef { name: "AUTH", flags: no_key_cmd!(false) },
    CommandDef { name: "SELECT", flags: no_key_cmd!(false) },
    CommandDef { name: "CLIENT", flags: no_key_cmd!(false) },
    CommandDef { name: "INFO", flags: no_key_cmd!(false) },
    CommandDef { name: "READONLY", flags: no_key_cmd!(false) },
    CommandDef { name: "READWRITE", flags: no_key_cmd!(false) },
    CommandDef {
        name: "ASKING",
        flags: no_key_cmd!(false),
    },
    CommandDef { name: "CLUSTER", flags: no_key_cmd!(false) },
    CommandDef { name: "SENTINEL", flags: no_key_cmd!(false) },
    CommandDef {
        name: "MONITOR",
        flags: CommandFlags {
            will_disconnect: false,
            ..no_key_cmd!(false)
        },
    },
    CommandDef {
        name: "QUIT",
        flags: CommandFlags {
            will_disconnect: true,
            valid_in_subscriber_mode: true,
            valid_in_monitor_mode: true,
            ..no_key_cmd!(false)
        },
    },
];

/// Looks up a command's static classification by name (case-insensitive).
pub fn lookup_command(name: &str) -> Option<&'static CommandFlags> {
    COMMAND_TABLE
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| &c.flags)
}

/// Extracts the routing keys from a command per its `KeySpec`.
pub fn extract_keys<'a>(routable: &'a dyn Routable, spec: &KeySpec) -> Vec<&'a [u8]> {
    match *spec {
        KeySpec::None => Vec::new(),
        KeySpec::Fixed { first, count } => (first..first + count)
            .filter_map(|i| routable.arg_idx(i))
            .collect(),
        KeySpec::FixedToEnd { first } => {
            let mut out = Vec::new();
            let mut i = first;
            while let Some(arg) = routable.arg_idx(i) {
                out.push(arg);
                i += 1;
            }
            out
        }
        KeySpec::EvalStyle { numkeys_idx } => {
            let Some(numkeys_raw) = routable.arg_idx(numkeys_idx) else {
                return Vec::new();
            };
            let Ok(numkeys) = std::str::from_utf8(numkeys_raw)
                .unwrap_or("0")
                .parse::<usize>()
            else {
                return Vec::new();
            };
            (0..numkeys)
                .filter_map(|i| routable.arg_idx(numkeys_idx + 1 + i))
                .collect()
        }
    }
}

/// Post-processes a raw reply for specific commands (§4.2): `HGETALL` pairs
/// flatten into `Value::Bulk` already (no-op here, conversion to a map
/// happens via `FromRedisValue` for `HashMap`); `INFO` is parsed line-by-line
/// into a `key: value` map; everything else passes through unchanged.
pub fn transform_reply(command_name: &str, reply: Value) -> Value {
    if command_name.eq_ignore_ascii_case("INFO") {
        if let Value::Data(bytes) = &reply {
            if let Ok(text) = std::str::from_utf8(bytes) {
                return Value::Bulk(parse_info(text));
            }
        }
    }
    reply
}

fn parse_info(text: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            out.push(Value::Data(key.as_bytes().to_vec()));
            out.push(Value::Data(value.as_bytes().to_vec()));
        }
    }
    out
}

/// Parses the `loading`/`loading_eta_seconds` fields out of an `INFO` reply,
/// for the ready-check described in §4.4.
pub fn parse_loading_state(info_text: &str) -> (bool, u64) {
    let mut loading = false;
    let mut eta = 0u64;
    for line in info_text.lines() {
        if let Some((k, v)) = line.split_once(':') {
            match k {
                "loading" => loading = v.trim() == "1",
                "loading_eta_seconds" => eta = v.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
    }
    (loading, eta)
}

/// A representative set of convenience methods built on top of `Cmd`, in the
/// teacher's style of exposing a `Commands` trait over any `ConnectionLike`.
/// Not a full command surface (§1 non-goal) — just enough for idiomatic
/// call sites and for this crate's own tests.
pub trait Commands: ConnectionLike {
    fn get<K: ToRedisArgs, T: FromRedisValue>(&mut self, key: K) -> RedisResult<T> {
        let mut c = Cmd::with_name("GET");
        c.arg(key);
        self.req_command(&c).and_then(T::from_owned_redis_value)
    }

    fn set<K: ToRedisArgs, V: ToRedisArgs, T: FromRedisValue>(
        &mut self,
        key: K,
        value: V,
    ) -> RedisResult<T> {
        let mut c = Cmd::with_name("SET");
        c.arg(key).arg(value);
        self.req_command(&c).and_then(T::from_owned_redis_value)
    }

    fn incr<K: ToRedisArgs, T: FromRedisValue>(&mut self, key: K) -> RedisResult<T> {
        let mut c = Cmd::with_name("INCR");
        c.arg(key);
        self.req_command(&c).and_then(T::from_owned_redis_value)
    }

    fn del<K: ToRedisArgs, T: FromRedisValue>(&mut self, key: K) -> RedisResult<T> {
        let mut c = Cmd::with_name("DEL");
        c.arg(key);
        self.req_command(&c).and_then(T::from_owned_redis_value)
    }
}

impl<C: ConnectionLike> Commands for C {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::cmd;

    #[test]
    fn fixed_key_spec_extracts_single_key() {
        let mut c = cmd("GET");
        c.arg("foo");
        let spec = lookup_command("GET").unwrap().key_spec;
        assert_eq!(extract_keys(&c, &spec), vec![b"foo".as_slice()]);
    }

    #[test]
    fn fixed_to_end_extracts_all_trailing_keys() {
        let mut c = cmd("DEL");
        c.arg("a").arg("b").arg("c");
        let spec = lookup_command("DEL").unwrap().key_spec;
        assert_eq!(
            extract_keys(&c, &spec),
            vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]
        );
    }

    #[test]
    fn eval_style_skips_numkeys_argument() {
        let mut c = cmd("EVAL");
        c.arg("return 1").arg(2).arg("k1").arg("k2");
        let spec = lookup_command("EVAL").unwrap().key_spec;
        assert_eq!(
            extract_keys(&c, &spec),
            vec![b"k1".as_slice(), b"k2".as_slice()]
        );
    }

    #[test]
    fn info_reply_is_parsed_into_a_flattened_map() {
        let raw = Value::Data(b"# Server\r\nloading:0\r\nredis_version:7.0.0\r\n".to_vec());
        let transformed = transform_reply("INFO", raw);
        let Value::Bulk(items) = transformed else {
            panic!("expected Bulk")
        };
        assert_eq!(items[0], Value::Data(b"loading".to_vec()));
        assert_eq!(items[1], Value::Data(b"0".to_vec()));
    }

    #[test]
    fn loading_state_parses_eta() {
        let (loading, eta) = parse_loading_state("loading:1\r\nloading_eta_seconds:3\r\n");
        assert!(loading);
        assert_eq!(eta, 3);
    }
}
