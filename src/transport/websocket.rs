//! [`FrameReader`] and [`FrameWriter`] over a `tokio-tungstenite` stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    SinkExt,
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode as WsCloseCode},
    },
};

use super::{FrameReader, FrameWriter, InboundFrame};
use crate::{close::CloseCode, error::TransportError};

/// Read half of an upgraded WebSocket connection.
pub struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// Write half of an upgraded WebSocket connection.
pub struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

/// Split an upgraded WebSocket into halves usable by a session.
pub fn split<S>(socket: WebSocketStream<S>) -> (WebSocketReader<S>, WebSocketWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = socket.split();
    (WebSocketReader { stream }, WebSocketWriter { sink })
}

#[async_trait]
impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<InboundFrame, TransportError> {
        loop {
            let message = match self.stream.next().await {
                Some(message) => message?,
                None => return Err(TransportError::Disconnected),
            };
            match message {
                Message::Binary(payload) => return Ok(InboundFrame::Binary(payload)),
                Message::Text(text) => return Ok(InboundFrame::Text(text.as_str().to_owned())),
                Message::Close(frame) => {
                    return Err(TransportError::PeerClosed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default(),
                    });
                }
                // tungstenite answers pings on the next flush.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

#[async_trait]
impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_binary(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.sink.send(Message::Binary(payload)).await?;
        Ok(())
    }

    async fn write_close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: WsCloseCode::from(code.as_u16()),
            reason: reason.into(),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{io::duplex, time::timeout};
    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;

    async fn pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (server, client) = duplex(4096);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn binary_and_text_frames_are_told_apart() {
        let (server, mut client) = pair().await;
        let (mut reader, _writer) = split(server);

        client
            .send(Message::Binary(Bytes::from_static(b"\x1e\x00")))
            .await
            .expect("send binary");
        client.send(Message::text("hi")).await.expect("send text");

        let first = timeout(Duration::from_secs(1), reader.read_frame())
            .await
            .expect("read timed out")
            .expect("read binary");
        assert_eq!(first, InboundFrame::Binary(Bytes::from_static(b"\x1e\x00")));
        let second = reader.read_frame().await.expect("read text");
        assert_eq!(second, InboundFrame::Text("hi".into()));
    }

    #[tokio::test]
    async fn close_frames_carry_code_and_reason() {
        let (server, mut client) = pair().await;
        let (_reader, mut writer) = split(server);

        writer
            .write_close(CloseCode::POLICY_VIOLATION, "You are banned")
            .await
            .expect("write close");

        let message = client
            .next()
            .await
            .expect("client stream ended")
            .expect("client read");
        let Message::Close(Some(frame)) = message else {
            panic!("expected close frame, got {message:?}");
        };
        assert_eq!(u16::from(frame.code), 1008);
        assert_eq!(frame.reason.as_str(), "You are banned");
    }

    #[tokio::test]
    async fn peer_close_is_reported_as_transport_error() {
        let (server, mut client) = pair().await;
        let (mut reader, _writer) = split(server);

        client.close(None).await.expect("client close");
        let error = reader.read_frame().await.expect_err("close should end reads");
        assert!(matches!(error, TransportError::PeerClosed { code: None, .. }));
    }
}
