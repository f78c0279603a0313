//! Tests for the session loop, dispatcher and close handshake.

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use rstest::{fixture, rstest};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};

use super::*;
use crate::{
    close::{CloseCode, CloseRecord},
    error::ProtocolError,
    handler::{HandlerError, LoggingHandler, SessionContext},
    message::{MessageType, encode_message},
    transport::{
        InboundFrame,
        memory::{self, MemoryReader, MemoryWriter, Peer, Written},
    },
};

type Call = (MessageType, Bytes);
type TestSession = Session<MemoryReader, MemoryWriter, EchoHandler>;

const SYNC: &[u8] = &[30, 0];

/// Echoes accepted messages back and rejects payloads reading `fail`.
struct EchoHandler {
    calls: mpsc::UnboundedSender<Call>,
}

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(
        &self,
        message: MessageType,
        payload: Bytes,
        ctx: &mut SessionContext<'_>,
    ) -> Result<(), HandlerError> {
        let _ = self.calls.send((message, payload.clone()));
        if payload.as_ref() == b"fail" {
            return Err(HandlerError::new("rejected"));
        }
        ctx.reply(encode_message(message, &payload));
        Ok(())
    }
}

struct Harness {
    session: TestSession,
    peer: Peer,
    calls: mpsc::UnboundedReceiver<Call>,
}

fn peer_ip() -> IpAddr { IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)) }

fn build(identity: Identity, config: SessionConfig) -> Harness {
    let (reader, writer, peer) = memory::pair();
    let (tx, calls) = mpsc::unbounded_channel();
    let session = Session::new(
        reader,
        writer,
        identity,
        Arc::new(EchoHandler { calls: tx }),
        config,
    );
    Harness {
        session,
        peer,
        calls,
    }
}

#[fixture]
fn harness() -> Harness { build(Identity::new(peer_ip()), SessionConfig::default()) }

fn spawn(session: TestSession) -> JoinHandle<Result<(), SessionError>> {
    tokio::spawn(session.run())
}

async fn finish(task: JoinHandle<Result<(), SessionError>>) -> Result<(), SessionError> {
    timeout(Duration::from_secs(5), task)
        .await
        .expect("session should finish")
        .expect("session task should not panic")
}

fn closes(written: &[Written]) -> Vec<(CloseCode, String)> {
    written
        .iter()
        .filter_map(|item| match item {
            Written::Close { code, reason } => Some((*code, reason.clone())),
            _ => None,
        })
        .collect()
}

async fn expect_binary(peer: &mut Peer) -> Bytes {
    match timeout(Duration::from_secs(5), peer.next_written()).await {
        Ok(Some(Written::Binary(frame))) => frame,
        other => panic!("expected a binary frame, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn second_close_keeps_the_first_record(harness: Harness) {
    let Harness {
        session, mut peer, ..
    } = harness;
    let handle = session.handle();
    handle
        .close(CloseCode::PROTOCOL_ERROR, "first")
        .await
        .expect("queue close");
    handle
        .close(CloseCode::NORMAL, "second")
        .await
        .expect("queue close");

    finish(spawn(session)).await.expect("clean close");
    handle
        .close(CloseCode::GOING_AWAY, "third")
        .await
        .expect("closing a closed session succeeds");

    let written = peer.drain_written();
    assert_eq!(
        closes(&written),
        vec![(CloseCode::PROTOCOL_ERROR, "first".to_owned())]
    );
    assert_eq!(written.last(), Some(&Written::Shutdown));
    assert_eq!(
        handle.close_record(),
        Some(CloseRecord::new(CloseCode::PROTOCOL_ERROR, "first"))
    );
    assert_eq!(handle.state(), SessionState::Closed);
}

#[rstest]
#[tokio::test]
async fn text_frame_closes_once_and_drops_later_frames(harness: Harness) {
    let Harness {
        session,
        mut peer,
        mut calls,
    } = harness;
    peer.send_text("{}");
    peer.send_binary(SYNC);

    let outcome = finish(spawn(session)).await;

    assert!(matches!(
        outcome,
        Err(SessionError::Protocol(ProtocolError::NonBinaryFrame))
    ));
    assert_eq!(
        closes(&peer.drain_written()),
        vec![(
            CloseCode::UNSUPPORTED_DATA,
            "Only binary frames allowed".to_owned()
        )]
    );
    assert!(calls.try_recv().is_err());
}

#[rstest]
#[tokio::test]
async fn application_message_before_sync_is_a_protocol_error(harness: Harness) {
    let Harness {
        session,
        mut peer,
        mut calls,
    } = harness;
    let handle = session.handle();
    peer.send_binary(Bytes::from_static(&[2, 1]));

    let outcome = finish(spawn(session)).await;

    assert!(matches!(
        outcome,
        Err(SessionError::Protocol(ProtocolError::NotSynced { .. }))
    ));
    assert_eq!(
        closes(&peer.drain_written()),
        vec![(
            CloseCode::PROTOCOL_ERROR,
            r#"invalid message: b"\x02\x01""#.to_owned()
        )]
    );
    assert!(calls.try_recv().is_err());
    assert_eq!(
        handle.close_record().map(|record| record.code),
        Some(CloseCode::PROTOCOL_ERROR)
    );
}

#[rstest]
#[tokio::test]
async fn synchronised_session_dispatches_post_once(harness: Harness) {
    let Harness {
        session,
        mut peer,
        mut calls,
    } = harness;
    let handle = session.handle();
    assert_eq!(handle.state(), SessionState::Connecting);
    let task = spawn(session);

    peer.send_binary(SYNC);
    assert_eq!(expect_binary(&mut peer).await, Bytes::from_static(SYNC));
    assert_eq!(handle.state(), SessionState::Synced);

    peer.send_binary(Bytes::from_static(&[2, 1]));
    assert_eq!(expect_binary(&mut peer).await, Bytes::from_static(&[2, 1]));

    handle.close(CloseCode::NORMAL, "done").await.expect("close");
    finish(task).await.expect("clean close");

    assert_eq!(
        calls.recv().await,
        Some((MessageType::Synchronise, Bytes::from_static(&[0])))
    );
    assert_eq!(
        calls.recv().await,
        Some((MessageType::InsertPost, Bytes::from_static(&[1])))
    );
    assert!(calls.try_recv().is_err());
}

#[rstest]
#[case(vec![2, 1])]
#[case(vec![30, 0])]
#[case(vec![0])]
#[tokio::test]
async fn banned_clients_are_closed_on_first_message(#[case] frame: Vec<u8>) {
    let Harness {
        session,
        mut peer,
        mut calls,
    } = build(Identity::banned(peer_ip()), SessionConfig::default());
    peer.send_binary(frame);

    let outcome = finish(spawn(session)).await;

    assert!(matches!(outcome, Err(SessionError::Banned)));
    assert_eq!(
        closes(&peer.drain_written()),
        vec![(CloseCode::POLICY_VIOLATION, "You are banned".to_owned())]
    );
    assert!(calls.try_recv().is_err());
}

#[rstest]
#[case::too_short(vec![1])]
#[case::invalid_tag(vec![0, 0])]
#[tokio::test]
async fn malformed_frames_close_with_protocol_error(#[case] frame: Vec<u8>) {
    let Harness {
        session, mut peer, ..
    } = build(Identity::new(peer_ip()), SessionConfig::default());
    peer.send_binary(frame);

    let outcome = finish(spawn(session)).await;

    let Err(SessionError::Protocol(error)) = outcome else {
        panic!("expected a protocol error, got {outcome:?}");
    };
    assert_eq!(
        closes(&peer.drain_written()),
        vec![(CloseCode::PROTOCOL_ERROR, error.to_string())]
    );
}

#[rstest]
#[tokio::test]
async fn unknown_tag_after_sync_is_a_protocol_error(harness: Harness) {
    let Harness {
        session, mut peer, ..
    } = harness;
    let task = spawn(session);
    peer.send_binary(SYNC);
    expect_binary(&mut peer).await;
    peer.send_binary(Bytes::from_static(&[29, 1]));

    let outcome = finish(task).await;

    assert!(matches!(
        outcome,
        Err(SessionError::Protocol(ProtocolError::UnknownType { .. }))
    ));
}

#[rstest]
#[tokio::test]
async fn concurrent_send_and_close_do_not_deadlock(harness: Harness) {
    let Harness {
        session, mut peer, ..
    } = harness;
    let handle = session.handle();
    let task = spawn(session);

    let (sent, closed) = timeout(Duration::from_secs(5), async {
        tokio::join!(
            handle.send(Bytes::from_static(b"\x02\x09")),
            handle.close(CloseCode::NORMAL, "bye")
        )
    })
    .await
    .expect("send and close should not deadlock");
    closed.expect("close request");
    finish(task).await.expect("clean close");

    let written = peer.drain_written();
    let binary_at = written
        .iter()
        .position(|item| matches!(item, Written::Binary(_)));
    let close_at = written
        .iter()
        .position(|item| matches!(item, Written::Close { .. }))
        .expect("close frame written");
    match sent {
        Ok(()) => assert!(binary_at.is_some_and(|at| at < close_at)),
        Err(error) => {
            assert_eq!(error, SendError::Closed);
            assert!(binary_at.is_none());
        }
    }
}

#[rstest]
#[tokio::test]
async fn sends_fail_once_closed(harness: Harness) {
    let Harness { session, .. } = harness;
    let handle = session.handle();
    handle.close(CloseCode::NORMAL, "bye").await.expect("close");
    finish(spawn(session)).await.expect("clean close");

    assert_eq!(
        handle.send(Bytes::from_static(b"\x02\x01")).await,
        Err(SendError::Closed)
    );
    assert_eq!(
        handle.push(Bytes::from_static(b"\x02\x01")),
        Err(SendError::Closed)
    );
    assert!(!handle.request_close(CloseCode::NORMAL, "again"));
}

#[rstest]
#[tokio::test]
async fn pushed_frames_are_written_in_order(harness: Harness) {
    let Harness {
        session, mut peer, ..
    } = harness;
    let handle = session.handle();
    let task = spawn(session);

    handle.push(Bytes::from_static(b"a")).expect("push");
    handle.push(Bytes::from_static(b"b")).expect("push");
    handle.send(Bytes::from_static(b"c")).await.expect("send");

    assert_eq!(expect_binary(&mut peer).await, Bytes::from_static(b"a"));
    assert_eq!(expect_binary(&mut peer).await, Bytes::from_static(b"b"));
    assert_eq!(expect_binary(&mut peer).await, Bytes::from_static(b"c"));

    assert!(handle.request_close(CloseCode::NORMAL, "bye"));
    finish(task).await.expect("clean close");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stalled_close_write_times_out() {
    let Harness { session, peer, .. } = build(
        Identity::new(peer_ip()),
        SessionConfig::default().close_timeout(Duration::from_millis(100)),
    );
    let handle = session.handle();
    peer.stall_writes();
    handle
        .close(CloseCode::PROTOCOL_ERROR, "bad frame")
        .await
        .expect("close");

    let outcome = finish(spawn(session)).await;

    let Err(SessionError::CloseFailed { reason, source }) = outcome else {
        panic!("expected a close failure, got {outcome:?}");
    };
    assert_eq!(reason, "bad frame");
    assert!(matches!(source, TransportError::Timeout(_)));
    assert_eq!(handle.state(), SessionState::Closed);
}

#[rstest]
#[tokio::test]
async fn failed_close_write_still_closes(harness: Harness) {
    let Harness {
        session, mut peer, ..
    } = harness;
    let handle = session.handle();
    peer.fail_writes(true);
    handle.close(CloseCode::GOING_AWAY, "restart").await.expect("close");

    let outcome = finish(spawn(session)).await;

    assert!(matches!(outcome, Err(SessionError::CloseFailed { .. })));
    assert!(handle.is_closed());
    assert_eq!(peer.drain_written(), vec![Written::Shutdown]);
}

#[rstest]
#[tokio::test]
async fn lost_transport_closes_without_a_close_frame(harness: Harness) {
    let Harness {
        session, mut peer, ..
    } = harness;
    let handle = session.handle();
    let task = spawn(session);
    peer.disconnect();

    let outcome = finish(task).await;

    assert!(outcome.is_err_and(|error| error.is_peer_close()));
    assert_eq!(
        handle.close_record().map(|record| record.code),
        Some(CloseCode::ABNORMAL)
    );
    assert_eq!(peer.drain_written(), vec![Written::Shutdown]);
}

#[rstest]
#[tokio::test]
async fn consecutive_rejections_are_bounded() {
    let Harness {
        session, mut peer, ..
    } = build(
        Identity::new(peer_ip()),
        SessionConfig::default().max_consecutive_app_errors(Some(2)),
    );
    let task = spawn(session);
    peer.send_binary(SYNC);
    expect_binary(&mut peer).await;
    peer.send_binary(&b"\x02fail"[..]);
    peer.send_binary(&b"\x02fail"[..]);

    let outcome = finish(task).await;

    assert!(matches!(
        outcome,
        Err(SessionError::TooManyApplicationErrors(2))
    ));
    assert_eq!(
        closes(&peer.drain_written()),
        vec![(
            CloseCode::POLICY_VIOLATION,
            "too many rejected messages".to_owned()
        )]
    );
}

#[rstest]
#[tokio::test]
async fn accepted_message_resets_rejection_count() {
    let Harness {
        session,
        mut peer,
        mut calls,
    } = build(
        Identity::new(peer_ip()),
        SessionConfig::default().max_consecutive_app_errors(Some(2)),
    );
    let handle = session.handle();
    let task = spawn(session);
    peer.send_binary(SYNC);
    expect_binary(&mut peer).await;

    peer.send_binary(&b"\x02fail"[..]);
    peer.send_binary(&b"\x02ok"[..]);
    assert_eq!(expect_binary(&mut peer).await, Bytes::from_static(b"\x02ok"));
    peer.send_binary(&b"\x02fail"[..]);
    peer.send_binary(&b"\x01ok"[..]);
    assert_eq!(expect_binary(&mut peer).await, Bytes::from_static(b"\x01ok"));
    assert!(!handle.is_closed());

    handle.close(CloseCode::NORMAL, "done").await.expect("close");
    finish(task).await.expect("clean close");
    let mut seen = 0;
    while calls.try_recv().is_ok() {
        seen += 1;
    }
    assert_eq!(seen, 5);
}

#[rstest]
#[tokio::test]
async fn failed_sync_keeps_session_unsynchronised(harness: Harness) {
    let Harness {
        session, mut peer, ..
    } = harness;
    let handle = session.handle();
    let task = spawn(session);
    peer.send_binary(&b"\x1efail"[..]);
    peer.send_binary(Bytes::from_static(&[2, 1]));

    let outcome = finish(task).await;

    assert!(matches!(
        outcome,
        Err(SessionError::Protocol(ProtocolError::NotSynced { .. }))
    ));
    assert_eq!(
        handle.close_record().map(|record| record.code),
        Some(CloseCode::PROTOCOL_ERROR)
    );
}

/// Memory reader that flags when it is dropped.
struct TrackedReader {
    inner: MemoryReader,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl FrameReader for TrackedReader {
    async fn read_frame(&mut self) -> Result<InboundFrame, TransportError> {
        self.inner.read_frame().await
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) { self.dropped.store(true, Ordering::SeqCst); }
}

struct PanickingHandler;

#[async_trait]
impl MessageHandler for PanickingHandler {
    async fn handle(
        &self,
        _message: MessageType,
        _payload: Bytes,
        _ctx: &mut SessionContext<'_>,
    ) -> Result<(), HandlerError> {
        panic!("handler exploded");
    }
}

fn tracked<H: MessageHandler>(
    handler: H,
) -> (Session<TrackedReader, MemoryWriter, H>, Peer, Arc<AtomicBool>) {
    let (reader, writer, peer) = memory::pair();
    let dropped = Arc::new(AtomicBool::new(false));
    let reader = TrackedReader {
        inner: reader,
        dropped: Arc::clone(&dropped),
    };
    let session = Session::new(
        reader,
        writer,
        Identity::new(peer_ip()),
        Arc::new(handler),
        SessionConfig::default(),
    );
    (session, peer, dropped)
}

async fn wait_for_drop(flag: &AtomicBool) {
    timeout(Duration::from_secs(5), async {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reader should be dropped");
}

#[tokio::test]
async fn panicking_handler_closes_session_and_stops_reader() {
    let (session, mut peer, reader_dropped) = tracked(PanickingHandler);
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    peer.send_binary(Bytes::from_static(SYNC));
    let joined = timeout(Duration::from_secs(5), task)
        .await
        .expect("session task should finish");
    assert!(joined.expect_err("handler panic unwinds the task").is_panic());

    wait_for_drop(&reader_dropped).await;
    assert_eq!(handle.state(), SessionState::Closed);
    assert_eq!(
        handle.close_record(),
        Some(CloseRecord::new(CloseCode::ABNORMAL, "session aborted"))
    );
    assert_eq!(
        handle.send(Bytes::from_static(b"\x02late")).await,
        Err(SendError::Closed)
    );
    assert_eq!(
        timeout(Duration::from_secs(5), peer.next_written())
            .await
            .expect("writer should be released"),
        None
    );
}

#[tokio::test]
async fn cancelled_run_closes_session_and_stops_reader() {
    let (session, _peer, reader_dropped) = tracked(LoggingHandler);
    let handle = session.handle();
    let task = tokio::spawn(session.run());
    timeout(Duration::from_secs(5), async {
        while handle.state() == SessionState::Connecting {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session should start");

    task.abort();
    assert!(task.await.expect_err("task was aborted").is_cancelled());

    wait_for_drop(&reader_dropped).await;
    assert!(handle.is_closed());
    assert_eq!(
        handle.close_record().map(|record| record.code),
        Some(CloseCode::ABNORMAL)
    );
}

/// Reports what awaiting `send` on its own session returned.
struct SelfSender {
    results: mpsc::UnboundedSender<Result<(), SendError>>,
}

#[async_trait]
impl MessageHandler for SelfSender {
    async fn handle(
        &self,
        message: MessageType,
        payload: Bytes,
        ctx: &mut SessionContext<'_>,
    ) -> Result<(), HandlerError> {
        let result = ctx.handle().send(Bytes::from_static(b"\x02inline")).await;
        let _ = self.results.send(result);

        let handle = ctx.handle();
        let results = self.results.clone();
        tokio::spawn(async move {
            let _ = results.send(handle.send(Bytes::from_static(b"\x02later")).await);
        });
        ctx.reply(encode_message(message, &payload));
        Ok(())
    }
}

#[tokio::test]
async fn send_from_own_handler_fails_instead_of_hanging() {
    let (results_tx, mut results) = mpsc::unbounded_channel();
    let (reader, writer, mut peer) = memory::pair();
    let session = Session::new(
        reader,
        writer,
        Identity::new(peer_ip()),
        Arc::new(SelfSender {
            results: results_tx,
        }),
        SessionConfig::default(),
    );
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    peer.send_binary(Bytes::from_static(SYNC));
    assert_eq!(
        timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("handler should not hang"),
        Some(Err(SendError::Reentrant))
    );
    assert_eq!(expect_binary(&mut peer).await, Bytes::from_static(SYNC));
    assert_eq!(
        expect_binary(&mut peer).await,
        Bytes::from_static(b"\x02later")
    );
    assert_eq!(
        timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("background send completes"),
        Some(Ok(()))
    );

    handle.close(CloseCode::NORMAL, "bye").await.expect("close");
    finish(task).await.expect("clean close");
}
