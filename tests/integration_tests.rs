//! End-to-end tests over real sockets: one server on an ephemeral port,
//! framed commands in, framed replies and bulk output back.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use jobrelay::config::ServerConfig;
use jobrelay::error::RelayError;
use jobrelay::protocol;
use jobrelay::server::Server;

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(200);

async fn start_server(
    buffer_size: i64,
    thread_pool_size: i64,
) -> (SocketAddr, CancellationToken, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = ServerConfig::new(addr.port(), buffer_size, thread_pool_size).unwrap();
    let shutdown = CancellationToken::new();
    let server = Server::new(config, shutdown.clone());

    let handle = tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    (addr, shutdown, handle)
}

async fn send_command(addr: SocketAddr, command: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    protocol::send_message(&mut stream, command).await.unwrap();
    stream
}

async fn recv(stream: &mut TcpStream) -> String {
    timeout(WAIT, protocol::recv_message(stream))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn issue_job_full_exchange() {
    let (addr, shutdown, handle) = start_server(8, 2).await;

    let mut stream = send_command(addr, "issueJob echo hello").await;

    let ack = recv(&mut stream).await;
    assert!(ack.starts_with("JOB job_"), "unexpected ack: {ack}");
    assert!(ack.contains("SUBMITTED"));

    let header = recv(&mut stream).await;
    assert!(header.contains("output start"), "unexpected header: {header}");

    let mut output = Vec::new();
    timeout(WAIT, protocol::recv_bulk(&mut stream, &mut output))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output, b"hello\n");

    let footer = recv(&mut stream).await;
    assert!(footer.contains("output end"), "unexpected footer: {footer}");

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn poll_lists_only_queued_jobs() {
    let (addr, shutdown, handle) = start_server(8, 1).await;

    // First job occupies the single worker; the second stays queued.
    let mut first = send_command(addr, "issueJob sleep 1").await;
    recv(&mut first).await;
    sleep(SETTLE).await;

    let mut second = send_command(addr, "issueJob echo done").await;
    let ack = recv(&mut second).await;
    assert!(ack.contains("echo done"));

    let mut poller = send_command(addr, "poll").await;
    let listing = recv(&mut poller).await;
    assert!(listing.contains("echo done"), "bad listing: {listing}");
    assert!(
        !listing.contains("sleep 1"),
        "active jobs must not be listed: {listing}"
    );
    assert_eq!(listing.lines().count(), 1);

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn poll_on_empty_queue_is_empty() {
    let (addr, shutdown, handle) = start_server(8, 2).await;

    let mut poller = send_command(addr, "poll").await;
    assert_eq!(recv(&mut poller).await, "");

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn set_concurrency_acknowledges() {
    let (addr, shutdown, handle) = start_server(8, 2).await;

    let mut stream = send_command(addr, "setConcurrency 3").await;
    assert_eq!(recv(&mut stream).await, "CONCURRENCY SET AT 3\n");

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_removes_queued_job_and_notifies_origin() {
    let (addr, shutdown, handle) = start_server(8, 1).await;

    let mut first = send_command(addr, "issueJob sleep 1").await;
    recv(&mut first).await;
    sleep(SETTLE).await;

    let mut origin = send_command(addr, "issueJob echo never").await;
    let ack = recv(&mut origin).await;
    let job_id = jobrelay::client::parse_job_id(&ack).unwrap();

    let mut stopper = send_command(addr, &format!("stop {job_id}")).await;
    assert_eq!(recv(&mut stopper).await, format!("JOB {job_id} REMOVED\n"));

    // The origin learns its job was removed, then its connection closes.
    assert_eq!(recv(&mut origin).await, format!("JOB {job_id} REMOVED\n"));
    let err = timeout(WAIT, protocol::recv_message(&mut origin))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RelayError::ConnectionClosed));

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_unknown_job_reports_not_found() {
    let (addr, shutdown, handle) = start_server(8, 2).await;

    let mut stream = send_command(addr, "stop job_42").await;
    assert_eq!(recv(&mut stream).await, "JOB job_42 NOT FOUND\n");

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_command_closes_without_reply() {
    let (addr, shutdown, handle) = start_server(8, 2).await;

    let mut stream = send_command(addr, "frobnicate").await;
    let err = timeout(WAIT, protocol::recv_message(&mut stream))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RelayError::ConnectionClosed));

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn exit_aborts_queued_jobs_and_completes_active_ones() {
    let (addr, _shutdown, handle) = start_server(8, 1).await;

    let mut active = send_command(addr, "issueJob sleep 1").await;
    recv(&mut active).await;
    sleep(SETTLE).await;

    let mut queued = send_command(addr, "issueJob echo queued").await;
    recv(&mut queued).await;

    let mut exiter = send_command(addr, "exit").await;
    assert_eq!(recv(&mut exiter).await, "SERVER TERMINATED\n");

    // The queued job never ran; its origin gets exactly one abort notice.
    assert_eq!(
        recv(&mut queued).await,
        "SERVER TERMINATED BEFORE EXECUTION"
    );

    // The active job still completes and delivers a normal (empty) result.
    let header = recv(&mut active).await;
    assert!(header.contains("output start"));
    let mut output = Vec::new();
    timeout(WAIT, protocol::recv_bulk(&mut active, &mut output))
        .await
        .unwrap()
        .unwrap();
    assert!(output.is_empty());
    let footer = recv(&mut active).await;
    assert!(footer.contains("output end"));

    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn disconnected_origin_job_still_runs_to_completion() {
    let (addr, shutdown, handle) = start_server(8, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");

    let mut origin = send_command(
        addr,
        &format!("issueJob sleep 1 && touch {}", marker.display()),
    )
    .await;
    recv(&mut origin).await;
    drop(origin);

    // The job's side effect happens even with nobody left to receive the
    // output; the result is discarded.
    let deadline = tokio::time::Instant::now() + WAIT;
    while !marker.exists() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "job must run despite the dropped origin"
        );
        sleep(SETTLE).await;
    }

    // The failed delivery is confined to that job; the server keeps
    // serving new requests.
    let mut poller = send_command(addr, "poll").await;
    assert_eq!(recv(&mut poller).await, "");

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn queue_full_submission_blocks_until_space_frees() {
    let (addr, shutdown, handle) = start_server(1, 1).await;

    // Close the gate so the first job stays queued and fills the buffer.
    let mut gate = send_command(addr, "setConcurrency 0").await;
    recv(&mut gate).await;

    let mut first = send_command(addr, "issueJob echo one").await;
    recv(&mut first).await;

    // The second submission blocks at admission: no ack arrives while the
    // queue is full.
    let mut second = send_command(addr, "issueJob echo two").await;
    let blocked = timeout(Duration::from_millis(500), protocol::recv_message(&mut second)).await;
    assert!(blocked.is_err(), "second submission must block while full");

    // Reopening the gate dequeues the first job and frees the slot.
    let mut reopen = send_command(addr, "setConcurrency 1").await;
    recv(&mut reopen).await;

    let ack = recv(&mut second).await;
    assert!(ack.contains("echo two"));
    assert!(ack.contains("SUBMITTED"));

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn results_deliver_out_of_submission_order_when_concurrent() {
    let (addr, shutdown, handle) = start_server(8, 2).await;

    let mut raise = send_command(addr, "setConcurrency 2").await;
    recv(&mut raise).await;

    let mut slow = send_command(addr, "issueJob sleep 1 && echo slow").await;
    recv(&mut slow).await;
    let mut fast = send_command(addr, "issueJob echo fast").await;
    recv(&mut fast).await;

    // The fast job finishes first even though it was submitted second.
    let header = recv(&mut fast).await;
    assert!(header.contains("output start"));
    let mut fast_out = Vec::new();
    timeout(WAIT, protocol::recv_bulk(&mut fast, &mut fast_out))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fast_out, b"fast\n");
    recv(&mut fast).await;

    let header = recv(&mut slow).await;
    assert!(header.contains("output start"));
    let mut slow_out = Vec::new();
    timeout(WAIT, protocol::recv_bulk(&mut slow, &mut slow_out))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(slow_out, b"slow\n");
    recv(&mut slow).await;

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}
