//! Worker node protocol
//!
//! This module defines the messages exchanged between a coordinator (a run)
//! and worker nodes. Bodies are MessagePack (rmp-serde).
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                     Worker Node
//!     |                              |
//!     |-------- DISCOVER ----------->|
//!     |<------- CAPACITY ------------|
//!     |                              |
//!     |-------- INTEGRAND ---------->|
//!     |                              |
//!     |-------- TASK(i) ------------>|   up to `capacity` tasks in flight
//!     |-------- TASK(j) ------------>|
//!     |<------- TASK_RESULT(j) ------|   replies in completion order
//!     |<------- TASK_FAILED(i) ------|
//!     |                              |
//!     |-------- SHUTDOWN ----------->|
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use crate::expr::Expr;
use crate::partition::Partition;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Coordinator and nodes must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Capacity query (Coordinator → Node)
    Discover(DiscoverMessage),

    /// Advertised task slots (Node → Coordinator)
    Capacity(CapacityMessage),

    /// Integrand for the tasks that follow (Coordinator → Node)
    Integrand(IntegrandMessage),

    /// One partition to integrate (Coordinator → Node)
    Task(TaskMessage),

    /// Partial integral (Node → Coordinator)
    TaskResult(TaskResultMessage),

    /// Task could not be computed (Node → Coordinator)
    TaskFailed(TaskFailedMessage),

    /// End of run; node closes the connection (Coordinator → Node)
    Shutdown,

    /// Protocol-level error; sender closes the connection (Node → Coordinator)
    Error(ErrorMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverMessage {
    pub protocol_version: u32,

    /// Coordinator identifier (hostname), for node logs
    pub coordinator_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityMessage {
    pub protocol_version: u32,

    /// Node identifier (hostname)
    pub node_id: String,

    /// Concurrent task slots offered
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrandMessage {
    pub expression: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub partition: Partition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultMessage {
    /// Partition index the value belongs to
    pub index: usize,

    pub value: f64,

    /// Compute time on the node (nanoseconds)
    pub elapsed_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailedMessage {
    pub index: usize,

    /// Failure description
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub node_id: String,
    pub error: String,
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg)
        .context("Failed to serialize message")?;

    if msg_bytes.len() > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_bytes.len(), MAX_MESSAGE_LEN);
    }

    // Prepend length field
    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Read a complete message from a stream
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// messages.
pub async fn read_message<R>(stream: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    // Read length field (4 bytes)
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_len, MAX_MESSAGE_LEN);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf)
        .context("Failed to deserialize message")?;

    Ok(Some(msg))
}

/// Write a message to a stream
pub async fn write_message<W>(stream: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await
        .context("Failed to write message")?;

    // Flush to ensure message is sent immediately
    stream.flush().await
        .context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;

    /// Send one message through an in-memory stream and read it back
    async fn round_trip(msg: &Message) -> Message {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_message(&mut client, msg).await.unwrap();
        read_message(&mut server).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_capacity_round_trip() {
        let msg = Message::Capacity(CapacityMessage {
            protocol_version: PROTOCOL_VERSION,
            node_id: "10.0.1.10".to_string(),
            capacity: 16,
        });

        assert_eq!(round_trip(&msg).await, msg);
    }

    #[tokio::test]
    async fn test_task_round_trip() {
        let msg = Message::Task(TaskMessage {
            partition: Partition { index: 3, lower: 0.75, upper: 1.0, panels: 250 },
        });

        match round_trip(&msg).await {
            Message::Task(task) => {
                assert_eq!(task.partition.index, 3);
                assert_eq!(task.partition.panels, 250);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[tokio::test]
    async fn test_integrand_carries_tree() {
        let expression = parse("math.exp(-x**2) / sqrt(pi)").unwrap();
        let msg = Message::Integrand(IntegrandMessage { expression: expression.clone() });

        match round_trip(&msg).await {
            Message::Integrand(integrand) => assert_eq!(integrand.expression, expression),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_message_framing() {
        let msg = Message::Shutdown;
        let bytes = serialize_message(&msg).unwrap();

        // Check length prefix
        assert!(bytes.len() >= 4);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + msg_len);
    }

    #[tokio::test]
    async fn test_truncated_body_rejected() {
        let msg = Message::TaskFailed(TaskFailedMessage {
            index: 1,
            error: "log domain error".to_string(),
        });
        let bytes = serialize_message(&msg).unwrap();

        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
        drop(client);

        let err = read_message(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read message body"));
    }

    #[tokio::test]
    async fn test_corrupt_body_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&3u32.to_le_bytes()).await.unwrap();
        client.write_all(&[0xc1, 0xc1, 0xc1]).await.unwrap();

        let err = read_message(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("Failed to deserialize message"));
    }

    #[tokio::test]
    async fn test_stream_round_trip_and_eof() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let msg = Message::TaskFailed(TaskFailedMessage {
            index: 7,
            error: "division by zero at x = 0".to_string(),
        });
        write_message(&mut client, &msg).await.unwrap();
        drop(client);

        assert_eq!(read_message(&mut server).await.unwrap(), Some(msg));
        assert_eq!(read_message(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

        let err = read_message(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("Message too large"));
    }
}
