//! The pipeline/transaction engine (§3 "Pipeline", §4.9): a batch of commands
//! sent in one write, with positional result assembly. `atomic()` wraps the
//! batch in `MULTI`/`EXEC` so the server applies it as a single transaction;
//! without it, the batch is just a write-ahead optimization with no
//! atomicity guarantee.

use crate::cmd::{Cmd, Routable};
use crate::connection::ConnectionLike;
use crate::types::{ErrorKind, FromRedisValue, RedisError, RedisResult, ToRedisArgs, Value};

/// An ordered batch of commands. Built by chaining `.cmd(name).arg(..)` calls,
/// the same way a single `Cmd` is built, except the chain stays on the
/// pipeline so one call can queue many commands.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    commands: Vec<Cmd>,
    transaction: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            commands: Vec::new(),
            transaction: false,
        }
    }

    /// Wraps the batch in `MULTI`/`EXEC` (§3: "atomic"). A watched key that
    /// changed between `WATCH` and `EXEC` aborts the transaction, surfaced as
    /// `ErrorKind::ExecAbort`.
    pub fn atomic(&mut self) -> &mut Self {
        self.transaction = true;
        self
    }

    pub fn is_atomic(&self) -> bool {
        self.transaction
    }

    /// Starts a new command in the batch; subsequent `.arg`/`.ignore` calls
    /// apply to it.
    pub fn cmd(&mut self, name: &str) -> &mut Self {
        self.commands.push(Cmd::with_name(name));
        self
    }

    /// Appends an already-built command, e.g. one constructed via `cmd()`
    /// elsewhere and shared between call sites.
    pub fn add_command(&mut self, command: Cmd) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn arg<T: ToRedisArgs>(&mut self, arg: T) -> &mut Self {
        self.last_mut().arg(arg);
        self
    }

    /// Drops the reply for the most recently added command from the result
    /// set (§3, §4.9) — used for synthetic commands like `ASKING` whose
    /// reply the caller never wants to see.
    pub fn ignore(&mut self) -> &mut Self {
        self.last_mut().mark_ignored();
        self
    }

    fn last_mut(&mut self) -> &mut Cmd {
        self.commands
            .last_mut()
            .expect("arg()/ignore() called before cmd()")
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Cmd] {
        &self.commands
    }

    /// Packs the whole batch into a single write buffer, prefixed with
    /// `MULTI` and suffixed with `EXEC` when `atomic`.
    pub fn get_packed_pipeline(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.transaction {
            Cmd::with_name("MULTI").write_packed_command(&mut out);
        }
        for command in &self.commands {
            command.write_packed_command(&mut out);
        }
        if self.transaction {
            Cmd::with_name("EXEC").write_packed_command(&mut out);
        }
        out
    }

    /// Sends the batch and reads back the raw per-command replies, already
    /// unwrapped from the `EXEC` array when atomic. Does not apply ignore
    /// compaction or error extraction; `query` does both. `pub(crate)` so the
    /// cluster connections can inspect raw per-command replies for
    /// redirects (§4.9) before `make_pipeline_results` would turn the first
    /// one into an `Err`.
    pub(crate) fn raw_results(&self, con: &mut dyn ConnectionLike) -> RedisResult<Vec<Value>> {
        let packed = self.get_packed_pipeline();
        if self.transaction {
            // Total wire replies are MULTI's +OK, one +QUEUED per command,
            // then EXEC's single array reply; only the last one is wanted.
            let mut replies = con.req_packed_commands(&packed, self.commands.len() + 1, 1)?;
            match replies.pop() {
                Some(Value::Bulk(items)) => Ok(items),
                Some(Value::Nil) => Err(RedisError::new(
                    ErrorKind::ExecAbort,
                    "transaction aborted: a watched key changed",
                )),
                Some(other) => Err(RedisError::new(
                    ErrorKind::TypeError,
                    format!("EXEC did not return an array reply: {other:?}"),
                )),
                None => Err(RedisError::new(
                    ErrorKind::Protocol,
                    "no reply received for EXEC",
                )),
            }
        } else {
            con.req_packed_commands(&packed, 0, self.commands.len())
        }
    }

    /// Applies ignore compaction and converts any per-command server error
    /// into the pipeline's overall `Err` (the first one found wins). Each
    /// surviving reply is passed through the producing command's
    /// `transform_reply`, the same as a standalone `req_command` call.
    pub(crate) fn make_pipeline_results(&self, raw: Vec<Value>) -> RedisResult<Vec<Value>> {
        let mut out = Vec::with_capacity(raw.len());
        for (command, value) in self.commands.iter().zip(raw) {
            let value = value.extract_error()?;
            if !command.is_ignored() {
                out.push(crate::commands::transform_reply(command.name(), value));
            }
        }
        Ok(out)
    }

    /// Runs the batch and decodes the (ignore-compacted) results into `T`,
    /// typically a tuple matching the number of non-ignored commands.
    pub fn query<T: FromRedisValue>(&self, con: &mut dyn ConnectionLike) -> RedisResult<T> {
        if self.commands.is_empty() {
            return T::from_owned_redis_value(Value::Bulk(Vec::new()));
        }
        if !con.supports_pipelining() {
            return Err(RedisError::new(
                ErrorKind::InvalidClientConfig,
                "this connection does not support pipelining",
            ));
        }
        let raw = self.raw_results(con)?;
        let results = self.make_pipeline_results(raw)?;
        T::from_owned_redis_value(Value::Bulk(results))
    }

    /// Runs the batch, discarding all replies.
    pub fn execute(&self, con: &mut dyn ConnectionLike) -> RedisResult<()> {
        self.query::<()>(con)
    }
}

/// Starts building a new pipeline. Mirrors `cmd()` in `cmd.rs`.
pub fn pipe() -> Pipeline {
    Pipeline::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind as EK;
    use crate::types::ServerError;

    struct ScriptedConnection {
        replies: std::collections::VecDeque<Value>,
    }

    impl ConnectionLike for ScriptedConnection {
        fn req_command(&mut self, _cmd: &Cmd) -> RedisResult<Value> {
            self.replies.pop_front().ok_or_else(|| {
                RedisError::new(EK::Protocol, "scripted connection ran out of replies")
            })
        }

        fn req_packed_commands(
            &mut self,
            _packed: &[u8],
            offset: usize,
            count: usize,
        ) -> RedisResult<Vec<Value>> {
            let mut all = Vec::with_capacity(offset + count);
            for _ in 0..offset + count {
                all.push(self.replies.pop_front().ok_or_else(|| {
                    RedisError::new(EK::Protocol, "scripted connection ran out of replies")
                })?);
            }
            Ok(all.split_off(offset))
        }
    }

    #[test]
    fn non_atomic_pipeline_returns_positional_results() {
        let mut con = ScriptedConnection {
            replies: vec![Value::Okay, Value::Int(42)].into(),
        };
        let mut p = Pipeline::new();
        p.cmd("SET").arg("k").arg("v");
        p.cmd("INCR").arg("n");
        let (set, incr): (Value, i64) = p.query(&mut con).unwrap();
        assert_eq!(set, Value::Okay);
        assert_eq!(incr, 42);
    }

    #[test]
    fn atomic_pipeline_unwraps_the_exec_array() {
        let mut con = ScriptedConnection {
            replies: vec![
                Value::Okay,                                  // MULTI
                Value::Status("QUEUED".into()),                // SET queued
                Value::Status("QUEUED".into()),                // INCR queued
                Value::Bulk(vec![Value::Okay, Value::Int(1)]), // EXEC
            ]
            .into(),
        };
        let mut p = Pipeline::new();
        p.atomic();
        p.cmd("SET").arg("k").arg("v");
        p.cmd("INCR").arg("n");
        let (set, incr): (Value, i64) = p.query(&mut con).unwrap();
        assert_eq!(set, Value::Okay);
        assert_eq!(incr, 1);
    }

    #[test]
    fn aborted_transaction_surfaces_as_exec_abort() {
        let mut con = ScriptedConnection {
            replies: vec![Value::Okay, Value::Status("QUEUED".into()), Value::Nil].into(),
        };
        let mut p = Pipeline::new();
        p.atomic();
        p.cmd("GET").arg("watched");
        let err = p.query::<Value>(&mut con).unwrap_err();
        assert_eq!(err.kind(), EK::ExecAbort);
    }

    #[test]
    fn ignored_command_is_dropped_from_results() {
        let mut con = ScriptedConnection {
            replies: vec![Value::Okay, Value::Int(7)].into(),
        };
        let mut p = Pipeline::new();
        p.cmd("ASKING").ignore();
        p.cmd("GET").arg("k");
        let only: i64 = p.query(&mut con).unwrap();
        assert_eq!(only, 7);
    }

    #[test]
    fn a_server_error_anywhere_in_the_batch_fails_the_whole_query() {
        let mut con = ScriptedConnection {
            replies: vec![
                Value::Okay,
                Value::ServerError(ServerError::parse("WRONGTYPE bad key")),
            ]
            .into(),
        };
        let mut p = Pipeline::new();
        p.cmd("SET").arg("k").arg("v");
        p.cmd("INCR").arg("k");
        let err = p.query::<(Value, i64)>(&mut con).unwrap_err();
        assert_eq!(err.kind(), EK::Reply);
    }

    #[test]
    fn pipelined_info_reply_is_transformed_like_a_standalone_one() {
        let mut con = ScriptedConnection {
            replies: vec![Value::Data(b"# Server\r\nloading:0\r\n".to_vec())].into(),
        };
        let mut p = Pipeline::new();
        p.cmd("INFO");
        let (info,): (Value,) = p.query(&mut con).unwrap();
        let Value::Bulk(items) = info else {
            panic!("expected INFO to come back flattened");
        };
        assert_eq!(items[0], Value::Data(b"loading".to_vec()));
    }

    #[test]
    fn empty_pipeline_returns_empty_without_touching_the_connection() {
        struct PanicsOnUse;
        impl ConnectionLike for PanicsOnUse {
            fn req_command(&mut self, _cmd: &Cmd) -> RedisResult<Value> {
                panic!("should not be called");
            }
            fn req_packed_commands(
                &mut self,
                _packed: &[u8],
                _offset: usize,
                _count: usize,
            ) -> RedisResult<Vec<Value>> {
                panic!("should not be called");
            }
        }
        let mut con = PanicsOnUse;
        let p = Pipeline::new();
        let results: Vec<Value> = p.query(&mut con).unwrap();
        assert!(results.is_empty());
    }
}
