//! The `Commands` convenience trait and `Cmd` building, driven against a
//! scripted `ConnectionLike` rather than a live server.

use resp_client::connection::ConnectionLike;
use resp_client::{cmd::Cmd, cmd, Commands, ErrorKind, RedisError, RedisResult, Value};

struct ScriptedConnection {
    replies: std::collections::VecDeque<Value>,
}

impl ConnectionLike for ScriptedConnection {
    fn req_command(&mut self, _cmd: &Cmd) -> RedisResult<Value> {
        self.replies
            .pop_front()
            .ok_or_else(|| RedisError::new(ErrorKind::Protocol, "out of scripted replies"))
    }

    fn req_packed_commands(&mut self, _packed: &[u8], _offset: usize, _count: usize) -> RedisResult<Vec<Value>> {
        unimplemented!("not exercised by these tests")
    }
}

#[test]
fn get_and_set_round_trip_through_the_commands_trait() {
    let mut con = ScriptedConnection {
        replies: vec![Value::Okay, Value::Data(b"bar".to_vec())].into(),
    };
    let _: Value = con.set("foo", "bar").unwrap();
    let value: String = con.get("foo").unwrap();
    assert_eq!(value, "bar");
}

#[test]
fn incr_decodes_an_integer_reply() {
    let mut con = ScriptedConnection {
        replies: vec![Value::Int(4)].into(),
    };
    let n: i64 = con.incr("counter").unwrap();
    assert_eq!(n, 4);
}

#[test]
fn a_multi_arg_command_flattens_a_vec_into_one_argument_per_element() {
    let mut c = cmd("MGET");
    c.arg(vec!["a", "b", "c"]);
    assert_eq!(c.arg_count(), 4); // "MGET" + 3 keys
}

#[test]
fn cmd_name_is_case_preserved_as_built() {
    let c = cmd("HGETALL");
    assert_eq!(c.name(), "HGETALL");
}
