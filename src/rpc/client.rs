//! Client side of the transport.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4, TcpStream};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::common::messages;
use crate::rpc::{sanitize, CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use crate::Result;

/// Send one request and parse the typed response payload out of the
/// envelope. A `SUCCESS: false` reply surfaces as [crate::Error::Rpc].
pub(crate) fn call<Resp: DeserializeOwned>(
    address: SocketAddrV4,
    request: &impl Serialize,
) -> Result<Resp> {
    let response = call_raw(address, &serde_json::to_value(request)?)?;
    Ok(serde_json::from_value(response)?)
}

/// Send one request, returning the opened envelope as raw JSON.
pub(crate) fn call_raw(address: SocketAddrV4, request: &Value) -> Result<Value> {
    let mut stream = TcpStream::connect_timeout(&SocketAddr::V4(address), CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;

    stream.write_all(serde_json::to_string(request)?.as_bytes())?;
    stream.shutdown(Shutdown::Write)?;

    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer)?;

    let text = String::from_utf8_lossy(&buffer);
    let response: Value = serde_json::from_str(sanitize(&text))?;
    trace!(context = "rpc_client", ?address, ?response, "Received response");

    messages::open(response)
}

/// Is anything listening at the address? Opens and drops a connection.
pub(crate) fn is_alive(address: SocketAddrV4) -> bool {
    TcpStream::connect_timeout(&SocketAddr::V4(address), CONNECT_TIMEOUT).is_ok()
}
