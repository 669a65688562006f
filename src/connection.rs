//! Synchronous connection: transport, `ConnectionInfo`, and the blocking
//! `ConnectionLike` implementation used outside of the async/cluster paths.
//! The full lifecycle state machine (§4.4: offline queue, retry strategy,
//! ready-check, subscriber/monitor mode) lives in `aio::multiplexed_connection`,
//! since it is inherently about overlapping in-flight work, which a blocking
//! connection does not have.

use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::cmd::Cmd;
use crate::commands::transform_reply;
use crate::parser::{encode_command, parse_redis_value};
use crate::types::{ErrorKind, RedisError, RedisResult, Value};

/// Where to connect: a host/port pair, or (on Unix) a domain socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAddr {
    Tcp { host: String, port: u16 },
    TcpTls { host: String, port: u16, insecure: bool },
    #[cfg(unix)]
    Unix { path: std::path::PathBuf },
}

impl std::fmt::Display for ConnectionAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionAddr::Tcp { host, port } => write!(f, "{host}:{port}"),
            ConnectionAddr::TcpTls { host, port, .. } => write!(f, "{host}:{port}"),
            #[cfg(unix)]
            ConnectionAddr::Unix { path } => write!(f, "{}", path.display()),
        }
    }
}

/// `AUTH`/`SELECT`/`CLIENT SETNAME` parameters applied at ready (§6
/// configuration table's `password`, `db`, `connection_name`).
#[derive(derivative::Derivative, Clone, Default)]
#[derivative(Debug)]
pub struct RedisConnectionInfo {
    pub username: Option<String>,
    #[derivative(Debug = "ignore")]
    pub password: Option<String>,
    pub db: i64,
    pub connection_name: Option<String>,
}

/// Full transport + auth configuration for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub addr: ConnectionAddr,
    pub redis: RedisConnectionInfo,
}

/// A canonical `host:port` key used to identify a node across the pool (§3
/// "Node key"). IPv6 hosts are normalised without brackets so lookups
/// converge regardless of how the host was written.
pub fn node_key(host: &str, port: u16) -> String {
    let normalized = host.trim_start_matches('[').trim_end_matches(']');
    format!("{normalized}:{port}")
}

/// A live connection: transport, plus the minimal bookkeeping the blocking
/// path needs.
pub struct Connection {
    stream: Transport,
    pub(crate) db: i64,
}

enum Transport {
    Tcp(BufReader<TcpStream>, TcpStream),
    #[cfg(unix)]
    Unix(BufReader<UnixStream>, UnixStream),
}

impl Transport {
    fn write(&mut self, bytes: &[u8]) -> RedisResult<()> {
        match self {
            Transport::Tcp(_, w) => w.write_all(bytes)?,
            #[cfg(unix)]
            Transport::Unix(_, w) => w.write_all(bytes)?,
        }
        Ok(())
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> RedisResult<()> {
        match self {
            Transport::Tcp(_, s) => s.set_read_timeout(dur)?,
            #[cfg(unix)]
            Transport::Unix(_, s) => s.set_read_timeout(dur)?,
        }
        Ok(())
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> RedisResult<()> {
        match self {
            Transport::Tcp(_, s) => s.set_write_timeout(dur)?,
            #[cfg(unix)]
            Transport::Unix(_, s) => s.set_write_timeout(dur)?,
        }
        Ok(())
    }

    /// Reads one complete RESP reply, growing the read buffer as needed.
    fn read_value(&mut self) -> RedisResult<Value> {
        let mut buf = Vec::with_capacity(4096);
        loop {
            if let Some((value, consumed)) = crate::parser::try_parse_value(&buf)? {
                debug_assert_eq!(consumed, buf.len(), "single reads are not pipelined here");
                return Ok(value);
            }
            let mut chunk = [0u8; 4096];
            let n = match self {
                Transport::Tcp(r, _) => r.read(&mut chunk)?,
                #[cfg(unix)]
                Transport::Unix(r, _) => r.read(&mut chunk)?,
            };
            if n == 0 {
                return Err(RedisError::new(
                    ErrorKind::ConnectionClosed,
                    "stream ended before a complete reply was received",
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Opens a blocking transport connection, applying `connect_timeout` if set.
pub fn connect(info: &ConnectionInfo, connect_timeout: Option<Duration>) -> RedisResult<Connection> {
    let stream = match &info.addr {
        ConnectionAddr::Tcp { host, port } => {
            let tcp = connect_tcp(host, *port, connect_timeout)?;
            let reader = BufReader::new(tcp.try_clone()?);
            Transport::Tcp(reader, tcp)
        }
        ConnectionAddr::TcpTls { .. } => {
            return Err(RedisError::new(
                ErrorKind::InvalidClientConfig,
                "synchronous TLS connections are not implemented by this crate; use the async client",
            ));
        }
        #[cfg(unix)]
        ConnectionAddr::Unix { path } => {
            let unix = UnixStream::connect(path)?;
            let reader = BufReader::new(unix.try_clone()?);
            Transport::Unix(reader, unix)
        }
    };
    let mut conn = Connection { stream, db: 0 };
    authenticate_and_select(&mut conn, &info.redis)?;
    Ok(conn)
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> RedisResult<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| RedisError::new(ErrorKind::ConnectTimeout, "could not resolve host"))?;
    let stream = match timeout {
        Some(dur) => TcpStream::connect_timeout(&addr, dur)
            .map_err(|_| RedisError::new(ErrorKind::ConnectTimeout, "connect phase timed out"))?,
        None => TcpStream::connect(addr)?,
    };
    stream.set_nodelay(true).ok();
    Ok(stream)
}

fn authenticate_and_select(conn: &mut Connection, info: &RedisConnectionInfo) -> RedisResult<()> {
    if let Some(password) = &info.password {
        let mut c = Cmd::with_name("AUTH");
        if let Some(username) = &info.username {
            c.arg(username);
        }
        c.arg(password);
        conn.req_command_raw(&c)?;
    }
    if info.db != 0 {
        let mut c = Cmd::with_name("SELECT");
        c.arg(info.db);
        conn.req_command_raw(&c)?;
        conn.db = info.db;
    }
    if let Some(name) = &info.connection_name {
        let mut c = Cmd::with_name("CLIENT");
        c.arg("SETNAME").arg(name);
        conn.req_command_raw(&c)?;
    }
    Ok(())
}

impl Connection {
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> RedisResult<()> {
        self.stream.set_read_timeout(dur)
    }

    pub fn set_write_timeout(&self, dur: Option<Duration>) -> RedisResult<()> {
        self.stream.set_write_timeout(dur)
    }

    fn req_command_raw(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        let packed = cmd.get_packed_command();
        self.stream.write(&packed)?;
        self.stream.read_value()?.extract_error()
    }
}

/// The interface the router, pipeline engine and `Commands` trait need from
/// any connection, sync or async (§6 "Commander surface").
pub trait ConnectionLike {
    fn req_command(&mut self, cmd: &Cmd) -> RedisResult<Value>;

    fn req_packed_commands(
        &mut self,
        packed: &[u8],
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<Value>>;

    fn supports_pipelining(&self) -> bool {
        true
    }
}

impl ConnectionLike for Connection {
    fn req_command(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        let reply = self.req_command_raw(cmd)?;
        Ok(transform_reply(cmd.name(), reply))
    }

    fn req_packed_commands(
        &mut self,
        packed: &[u8],
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<Value>> {
        self.stream.write(packed)?;
        let total = offset + count;
        let mut all = Vec::with_capacity(total);
        for _ in 0..total {
            all.push(self.stream.read_value()?);
        }
        Ok(all.split_off(offset))
    }
}
