//! End-to-end client/server tests over loopback sockets.

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strobe_rtsp_core::rtp::rtcp_types::{Compound, Packet};
use strobe_rtsp_core::rtp::{RtpPacket, RtpTimestamp, SequenceNumber, Ssrc};
use strobe_rtsp_core::rtsp_auth::Credentials;
use strobe_rtsp_core::rtsp_types::StatusCode;
use strobe_rtsp_core::rtsp_types::header::typed::{Transport, TransportMode};
use strobe_rtsp_core::rtsp_types::msg::Response;
use strobe_rtsp_core::{
    Client, ClientConfig, ClientHandler, ClientTransport, GenericFormat, MediaKind, RequestCtx,
    RtspError, Server, ServerConfig, ServerHandler, ServerStream, Track,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn h264_track() -> Track {
    Track::new(
        MediaKind::Video,
        vec![Arc::new(GenericFormat {
            payload_type: 97,
            encoding: Some("H264".into()),
            clock_rate: 90_000,
            params: None,
            fmtp: Some("packetization-mode=1".into()),
        })],
    )
}

fn pcmu_track() -> Track {
    Track::new(
        MediaKind::Audio,
        vec![Arc::new(GenericFormat::new(0, 8000))],
    )
}

fn test_packet() -> RtpPacket {
    RtpPacket {
        pt: 97,
        marker: true,
        sequence_number: SequenceNumber(4102),
        ssrc: Ssrc(0x38F2_7A2F),
        timestamp: RtpTimestamp(54352),
        payload: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
    }
}

type PacketTx = mpsc::UnboundedSender<(usize, RtpPacket)>;
type RtcpTx = mpsc::UnboundedSender<(usize, Bytes)>;

struct TestServerHandler {
    stream: Mutex<Option<Arc<ServerStream>>>,
    credentials: Option<Credentials>,
    rtp_tx: Mutex<Option<PacketTx>>,
    rtcp_tx: Mutex<Option<RtcpTx>>,
}

impl TestServerHandler {
    fn new(credentials: Option<Credentials>) -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(None),
            credentials,
            rtp_tx: Mutex::new(None),
            rtcp_tx: Mutex::new(None),
        })
    }

    fn set_stream(&self, stream: &Arc<ServerStream>) {
        *self.stream.lock().unwrap() = Some(stream.clone());
    }

    fn stream(&self) -> Arc<ServerStream> {
        self.stream.lock().unwrap().clone().expect("stream installed")
    }
}

#[async_trait::async_trait]
impl ServerHandler for TestServerHandler {
    async fn on_describe(&self, ctx: &RequestCtx) -> Result<Arc<ServerStream>, Response> {
        if let Some(credentials) = &self.credentials {
            ctx.authenticate(credentials)?;
        }

        Ok(self.stream())
    }

    async fn on_announce(&self, _ctx: &RequestCtx, _tracks: &[Track]) -> Result<(), Response> {
        Ok(())
    }

    async fn on_setup(&self, ctx: &RequestCtx) -> Result<Option<Arc<ServerStream>>, Response> {
        let transport: Transport = ctx
            .request
            .headers
            .get()
            .map_err(|_| Response::new(StatusCode::BAD_REQUEST))?;

        if transport.mode == Some(TransportMode::Record) {
            return Ok(None);
        }

        Ok(Some(self.stream()))
    }

    fn on_packet_rtp(&self, _session_id: &str, media_idx: usize, packet: RtpPacket) {
        if let Some(tx) = self.rtp_tx.lock().unwrap().as_ref() {
            let _ = tx.send((media_idx, packet));
        }
    }

    fn on_packet_rtcp(&self, _session_id: &str, media_idx: usize, payload: Bytes) {
        if let Some(tx) = self.rtcp_tx.lock().unwrap().as_ref() {
            let _ = tx.send((media_idx, payload));
        }
    }
}

struct TestClientHandler {
    rtp_tx: PacketTx,
}

impl ClientHandler for TestClientHandler {
    fn on_packet_rtp(&self, media_idx: usize, packet: RtpPacket) {
        let _ = self.rtp_tx.send((media_idx, packet));
    }
}

async fn start_server(
    handler: Arc<TestServerHandler>,
    with_udp: bool,
    tracks: Vec<Track>,
) -> (Server, Arc<ServerStream>) {
    let config = ServerConfig {
        rtsp_address: "127.0.0.1:0".into(),
        udp_rtp_address: with_udp.then(|| "127.0.0.1:0".into()),
        udp_rtcp_address: with_udp.then(|| "127.0.0.1:0".into()),
        ..Default::default()
    };

    let server = Server::new(config, handler.clone()).await.unwrap();

    let stream = ServerStream::new(&server, tracks).unwrap();
    handler.set_stream(&stream);

    (server, stream)
}

/// Publish packets until the subscriber observes one, guarding against the
/// race between PLAY completion and the first write
async fn publish_until_received(
    stream: &ServerStream,
    packet: &RtpPacket,
    rx: &mut mpsc::UnboundedReceiver<(usize, RtpPacket)>,
) -> (usize, RtpPacket) {
    timeout(Duration::from_secs(5), async {
        loop {
            stream.write_packet_rtp(0, packet);

            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(received)) => return received,
                _ => continue,
            }
        }
    })
    .await
    .expect("no packet delivered")
}

#[tokio::test(flavor = "multi_thread")]
async fn play_over_udp() {
    let handler = TestServerHandler::new(None);
    let (server, stream) = start_server(handler, true, vec![h264_track()]).await;

    let url = format!("rtsp://{}/s", server.local_addr());

    let client = Client::connect(
        &url,
        ClientConfig {
            transport: ClientTransport::Udp,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.set_handler(Arc::new(TestClientHandler { rtp_tx: tx }));

    let tracks = client.describe().await.unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].formats[0].payload_type(), 97);

    client.setup_all().await.unwrap();
    client.play(None).await.unwrap();

    let packet = test_packet();
    let (media_idx, received) = publish_until_received(&stream, &packet, &mut rx).await;

    assert_eq!(media_idx, 0);
    assert_eq!(received, packet);

    client.teardown().await.unwrap();
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn automatic_tcp_fallback_on_461() {
    let handler = TestServerHandler::new(None);

    // no UDP listeners configured, the server answers UDP SETUPs with 461
    let (server, stream) = start_server(handler, false, vec![h264_track()]).await;

    let url = format!("rtsp://{}/s", server.local_addr());

    let client = Client::connect(
        &url,
        ClientConfig {
            transport: ClientTransport::Auto,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.set_handler(Arc::new(TestClientHandler { rtp_tx: tx }));

    client.describe().await.unwrap();
    client.setup_all().await.unwrap();
    client.play(None).await.unwrap();

    let packet = test_packet();
    let (media_idx, received) = publish_until_received(&stream, &packet, &mut rx).await;

    assert_eq!(media_idx, 0);
    assert_eq!(received, packet);

    client.teardown().await.unwrap();
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn digest_auth_retry() {
    let handler = TestServerHandler::new(Some(Credentials::new("u", "p")));
    let (server, _stream) = start_server(handler, false, vec![h264_track()]).await;

    // correct credentials in the URL: a 401 followed by a successful retry
    let url = format!("rtsp://u:p@{}/s", server.local_addr());
    let client = Client::connect(&url, ClientConfig::default()).await.unwrap();

    let tracks = client.describe().await.unwrap();
    assert_eq!(tracks.len(), 1);

    client.close().await;

    // wrong credentials fail after a single retry
    let url = format!("rtsp://u:wrong@{}/s", server.local_addr());
    let client = Client::connect(&url, ClientConfig::default()).await.unwrap();

    match client.describe().await {
        Err(RtspError::Auth(_)) => {}
        other => panic!("expected auth failure, got {other:?}"),
    }

    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn publish_with_sender_report() {
    let handler = TestServerHandler::new(None);

    let (rtp_tx, mut rtp_rx) = mpsc::unbounded_channel();
    let (rtcp_tx, mut rtcp_rx) = mpsc::unbounded_channel();
    *handler.rtp_tx.lock().unwrap() = Some(rtp_tx);
    *handler.rtcp_tx.lock().unwrap() = Some(rtcp_tx);

    let (server, _stream) = start_server(handler, false, vec![h264_track()]).await;

    let url = format!("rtsp://{}/publish", server.local_addr());

    let client = Client::connect(
        &url,
        ClientConfig {
            transport: ClientTransport::Tcp,
            sender_report_period: Duration::from_millis(300),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    client.announce(vec![h264_track()]).await.unwrap();
    client.setup_all().await.unwrap();
    client.record().await.unwrap();

    for seq in [1u16, 2] {
        let packet = RtpPacket {
            pt: 97,
            marker: false,
            sequence_number: SequenceNumber(seq),
            ssrc: Ssrc(0x38F2_7A2F),
            timestamp: RtpTimestamp(54352),
            payload: Bytes::from_static(&[0x05]),
        };

        client.send_packet_rtp(0, &packet).await.unwrap();
    }

    // both packets reach the handler in order
    for seq in [1u16, 2] {
        let (media_idx, packet) = timeout(Duration::from_secs(5), rtp_rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(media_idx, 0);
        assert_eq!(packet.sequence_number, SequenceNumber(seq));
        assert_eq!(packet.ssrc, Ssrc(0x38F2_7A2F));
    }

    // a sender report follows within the configured period
    let report = timeout(Duration::from_secs(5), async {
        loop {
            let (_, payload) = rtcp_rx.recv().await.unwrap();

            let Ok(compound) = Compound::parse(&payload) else {
                continue;
            };

            for packet in compound.flatten() {
                if let Packet::Sr(sr) = packet {
                    return (sr.ssrc(), sr.packet_count(), sr.octet_count());
                }
            }
        }
    })
    .await
    .expect("no sender report received");

    assert_eq!(report, (0x38F2_7A2F, 2, 2));

    client.teardown().await.unwrap();
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn udp_timeout_surfaces() {
    let handler = TestServerHandler::new(None);
    let (server, _stream) = start_server(handler, true, vec![h264_track()]).await;

    let url = format!("rtsp://{}/s", server.local_addr());

    let client = Client::connect(
        &url,
        ClientConfig {
            transport: ClientTransport::Udp,
            read_timeout: Duration::from_secs(2),
            initial_udp_timeout: Duration::from_secs(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    client.describe().await.unwrap();
    client.setup_all().await.unwrap();
    client.play(None).await.unwrap();

    // the server never sends a packet
    let error = timeout(Duration::from_secs(10), client.wait())
        .await
        .expect("client did not time out")
        .expect("expected a fatal error");

    assert!(matches!(*error, RtspError::UdpTimeout));

    server.close().await;
}

async fn raw_request(stream: &mut TcpStream, request: String) -> String {
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut byte = [0u8; 1];

    while !response.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed early");
        response.push(byte[0]);
    }

    String::from_utf8(response).unwrap()
}

fn session_id_of(response: &str) -> String {
    let line = response
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("session:"))
        .expect("response without session header");

    let value = line.split_once(':').unwrap().1.trim();

    value.split(';').next().unwrap().trim().to_string()
}

#[tokio::test(flavor = "multi_thread")]
async fn session_reuse_and_track_path_check() {
    let handler = TestServerHandler::new(None);
    let (server, _stream) =
        start_server(handler, false, vec![h264_track(), pcmu_track()]).await;

    let addr = server.local_addr();
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = raw_request(
        &mut stream,
        format!(
            "SETUP rtsp://{addr}/s/trackID=0 RTSP/1.0\r\n\
             CSeq: 1\r\n\
             Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n"
        ),
    )
    .await;

    assert!(response.starts_with("RTSP/1.0 200"), "{response}");

    let session_id = session_id_of(&response);

    // a second SETUP below the same base path joins the session
    let response = raw_request(
        &mut stream,
        format!(
            "SETUP rtsp://{addr}/s/trackID=1 RTSP/1.0\r\n\
             CSeq: 2\r\n\
             Session: {session_id}\r\n\
             Transport: RTP/AVP/TCP;unicast;interleaved=2-3\r\n\r\n"
        ),
    )
    .await;

    assert!(response.starts_with("RTSP/1.0 200"), "{response}");
    assert_eq!(session_id_of(&response), session_id);

    // a SETUP with a different base path is rejected
    let response = raw_request(
        &mut stream,
        format!(
            "SETUP rtsp://{addr}/other/trackID=0 RTSP/1.0\r\n\
             CSeq: 3\r\n\
             Session: {session_id}\r\n\
             Transport: RTP/AVP/TCP;unicast;interleaved=4-5\r\n\r\n"
        ),
    )
    .await;

    assert!(response.starts_with("RTSP/1.0 400"), "{response}");
    assert!(response.contains("invalid track path"), "{response}");

    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn setup_in_wrong_state_is_rejected() {
    let handler = TestServerHandler::new(None);
    let (server, stream) = start_server(handler, false, vec![h264_track()]).await;

    let addr = server.local_addr();
    let mut tcp = TcpStream::connect(addr).await.unwrap();

    let response = raw_request(
        &mut tcp,
        format!(
            "SETUP rtsp://{addr}/s/trackID=0 RTSP/1.0\r\n\
             CSeq: 1\r\n\
             Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n"
        ),
    )
    .await;

    let session_id = session_id_of(&response);

    let response = raw_request(
        &mut tcp,
        format!(
            "PLAY rtsp://{addr}/s RTSP/1.0\r\n\
             CSeq: 2\r\n\
             Session: {session_id}\r\n\r\n"
        ),
    )
    .await;

    assert!(response.starts_with("RTSP/1.0 200"), "{response}");

    // RECORD is not legal on a playing session
    let response = raw_request(
        &mut tcp,
        format!(
            "RECORD rtsp://{addr}/s RTSP/1.0\r\n\
             CSeq: 3\r\n\
             Session: {session_id}\r\n\r\n"
        ),
    )
    .await;

    assert!(response.starts_with("RTSP/1.0 455"), "{response}");

    drop(stream);
    server.close().await;
}
