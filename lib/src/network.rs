//! Wire messages and framing.
//!
//! Every message is a JSON envelope terminated by `\r\n`. The envelope
//! carries the message type tag (`m_type`), the broadcast flag used for
//! gossip deduplication, and the payload under `data`. A message id is
//! the SHA-256 of the serialized envelope bytes.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::error::{CoinError, Result};
use crate::sha256::sha256_hex;
use crate::types::{Block, ConsensusData, Transaction};

/// Frame terminator.
pub const FRAME_DELIMITER: &[u8] = b"\r\n";

/// The protocol repertoire, one variant per `m_type`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "m_type", content = "data")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Advertised listen port, sent right after connecting.
    Port(u16),
    GetPeers,
    PeersList(Vec<(String, u16)>),
    GetLatestBlock,
    LatestBlock(Option<Block>),
    GetBlock(u64),
    Block(Block),
    NewBlock(Block),
    NewTransaction(Transaction),
    GetConsensusData,
    ConsensusData(ConsensusData),
}

impl Message {
    /// Gossip messages are relayed peer-to-peer and therefore subject
    /// to the seen-id duplicate drop; requests and replies are not.
    pub fn is_gossip(&self) -> bool {
        matches!(self, Message::NewBlock(_) | Message::NewTransaction(_))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Envelope {
    #[serde(default)]
    pub broadcast: bool,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Envelope {
            broadcast: false,
            message,
        }
    }

    pub fn broadcast(message: Message) -> Self {
        Envelope {
            broadcast: true,
            message,
        }
    }

    /// Serialized frame body, without the terminator.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Message id used for broadcast deduplication.
    pub fn id(&self) -> Result<String> {
        Ok(sha256_hex(&self.to_bytes()?))
    }

    /// Decode one frame body, returning the id alongside the envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<(String, Envelope)> {
        let envelope = serde_json::from_slice(bytes)?;
        Ok((sha256_hex(bytes), envelope))
    }

    /// Write this message as one delimited frame.
    pub async fn send_async<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let mut frame = self.to_bytes()?;
        frame.extend_from_slice(FRAME_DELIMITER);
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Accumulating reader for delimited frames.
///
/// Bytes are appended to an internal buffer until it ends with the
/// delimiter; the buffer is then split and every non-empty chunk is
/// decoded on its own. A chunk that fails to decode is logged and
/// skipped, so a malformed frame never costs the connection. Frames
/// fragmented across reads are reassembled transparently.
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        FrameReader {
            reader,
            buffer: Vec::new(),
        }
    }

    /// True while bytes of an unterminated frame are pending.
    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Next batch of complete frames, each with its message id.
    /// Errors when the peer closes or the socket fails.
    pub async fn next_batch(&mut self) -> Result<Vec<(String, Envelope)>> {
        let mut chunk = [0u8; 4096];
        loop {
            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                return Err(CoinError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                )));
            }
            self.buffer.extend_from_slice(&chunk[..read]);
            if !self.buffer.ends_with(FRAME_DELIMITER) {
                continue;
            }

            let buffer = std::mem::take(&mut self.buffer);
            let mut frames = Vec::new();
            // Serialized JSON never contains raw control bytes, so the
            // newline is an unambiguous split point.
            for piece in buffer.split(|&byte| byte == b'\n') {
                let piece = piece.strip_suffix(b"\r").unwrap_or(piece);
                if piece.is_empty() {
                    continue;
                }
                match Envelope::from_bytes(piece) {
                    Ok(frame) => frames.push(frame),
                    Err(e) => warn!("dropping malformed frame: {e}"),
                }
            }
            return Ok(frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new(Message::GetPeers);
        let bytes = envelope.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"broadcast":false,"m_type":"GET_PEERS"}"#);
    }

    #[test]
    fn test_envelope_payload_round_trip() {
        let envelope = Envelope::broadcast(Message::GetBlock(42));
        let bytes = envelope.to_bytes().unwrap();
        let (_, decoded) = Envelope::from_bytes(&bytes).unwrap();
        assert!(decoded.broadcast);
        assert!(matches!(decoded.message, Message::GetBlock(42)));
    }

    #[test]
    fn test_identical_messages_share_an_id() {
        let first = Envelope::broadcast(Message::GetLatestBlock);
        let second = Envelope::broadcast(Message::GetLatestBlock);
        assert_eq!(first.id().unwrap(), second.id().unwrap());
        assert_ne!(
            first.id().unwrap(),
            Envelope::broadcast(Message::GetPeers).id().unwrap()
        );
    }

    #[test]
    fn test_unknown_message_type_is_an_error() {
        let raw = br#"{"broadcast":false,"m_type":"NO_SUCH_TYPE"}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[tokio::test]
    async fn test_two_frames_in_one_read() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);

        let mut bytes = Envelope::new(Message::GetPeers).to_bytes().unwrap();
        bytes.extend_from_slice(FRAME_DELIMITER);
        bytes.extend_from_slice(&Envelope::new(Message::GetLatestBlock).to_bytes().unwrap());
        bytes.extend_from_slice(FRAME_DELIMITER);
        client.write_all(&bytes).await.unwrap();

        let frames = reader.next_batch().await.unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0].1.message, Message::GetPeers));
        assert!(matches!(frames[1].1.message, Message::GetLatestBlock));
    }

    #[tokio::test]
    async fn test_frame_fragmented_across_reads() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);

        let mut bytes = Envelope::new(Message::GetBlock(7)).to_bytes().unwrap();
        bytes.extend_from_slice(FRAME_DELIMITER);
        let (head, tail) = bytes.split_at(5);

        let head = head.to_vec();
        let tail = tail.to_vec();
        let writer = tokio::spawn(async move {
            client.write_all(&head).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            client.write_all(&tail).await.unwrap();
            client
        });

        let frames = reader.next_batch().await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0].1.message, Message::GetBlock(7)));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_skipped() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);

        let mut bytes = b"this is not json".to_vec();
        bytes.extend_from_slice(FRAME_DELIMITER);
        bytes.extend_from_slice(&Envelope::new(Message::GetPeers).to_bytes().unwrap());
        bytes.extend_from_slice(FRAME_DELIMITER);
        client.write_all(&bytes).await.unwrap();

        let frames = reader.next_batch().await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0].1.message, Message::GetPeers));
    }

    #[tokio::test]
    async fn test_closed_connection_errors() {
        let (client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);
        drop(client);
        assert!(reader.next_batch().await.is_err());
    }
}
