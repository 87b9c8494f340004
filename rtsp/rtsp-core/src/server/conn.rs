use super::handler::{ConnCtx, RequestCtx};
use super::session::{
    ServerSession, SessionMedia, SessionMediaTransport, SessionMode, SessionState,
};
use super::ServerInner;
use crate::codec::{Item, RtspDecoder};
use crate::conn::Conn;
use crate::description::{Track, tracks_from_sdp, tracks_to_sdp};
use crate::error::{Result, RtspError};
use crate::media::MediaRx;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore;
use rtp::Ssrc;
use rtsp_auth::Validator;
use rtsp_types::header::typed::{
    CSeq, Delivery, Public, RtpInfo, RtpInfoEntry, Session as SessionHeader, Transport,
    TransportMode, TransportProtocol,
};
use rtsp_types::msg::{InterleavedFrame, Request, Response};
use rtsp_types::{Method, Name, RtspUrl, StatusCode};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

pub(crate) struct ServerConn {
    pub(crate) id: u64,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) conn: Arc<Conn>,
    pub(crate) validator: Arc<Validator>,
    pub(crate) sessions: Mutex<Vec<Arc<ServerSession>>>,
    /// Tracks announced on this connection, waiting for record SETUPs
    pub(crate) announced: Mutex<Option<(String, Vec<Track>)>>,
}

pub(crate) async fn conn_task(server: Arc<ServerInner>, stream: TcpStream, peer_addr: SocketAddr) {
    let _ = stream.set_nodelay(true);

    let local_addr = match stream.local_addr() {
        Ok(local_addr) => local_addr,
        Err(e) => {
            log::debug!("dropping connection: {e}");
            return;
        }
    };

    let io = match accept_io(&server, stream).await {
        Ok(io) => io,
        Err(e) => {
            log::debug!("dropping connection from {peer_addr}: {e}");
            return;
        }
    };

    let cancel = server.closed.child_token();

    let (conn, read_half) = Conn::new(
        io,
        peer_addr,
        local_addr,
        server.config.write_timeout,
        cancel,
    );
    let conn = Arc::new(conn);

    let sc = Arc::new(ServerConn {
        id: server.next_conn_id(),
        peer_addr,
        conn: conn.clone(),
        validator: Arc::new(Validator::new(&server.config.auth_realm)),
        sessions: Mutex::new(vec![]),
        announced: Mutex::new(None),
    });

    let conn_ctx = ConnCtx {
        id: sc.id,
        peer_addr,
    };

    server.handler.on_connection_open(&conn_ctx).await;

    let mut framed = FramedRead::new(read_half, RtspDecoder::default());

    loop {
        // idle connections die quickly, connections with sessions live as
        // long as their keep-alives arrive
        let deadline = if sc.sessions.lock().is_empty() {
            server.config.read_timeout
        } else {
            server.config.session_timeout + server.config.read_timeout
        };

        let item = tokio::select! {
            _ = conn.cancel.cancelled() => break,
            item = timeout(deadline, framed.next()) => item,
        };

        let item = match item {
            Err(_) => {
                log::debug!("connection from {peer_addr} timed out");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                log::debug!("connection from {peer_addr}: {e}");
                break;
            }
            Ok(Some(Ok(item))) => item,
        };

        match item {
            Item::Request(request) => {
                if let Err(e) = handle_request(&server, &sc, request).await {
                    log::debug!("connection from {peer_addr}: {e}");
                    break;
                }
            }
            Item::Interleaved(frame) => {
                route_frame(&sc, frame);
            }
            Item::Response(_) => {
                // responses to server initiated requests are not expected
            }
        }
    }

    conn.cancel.cancel();

    let sessions: Vec<Arc<ServerSession>> = sc.sessions.lock().drain(..).collect();

    for session in sessions {
        session.conn_closed().await;
    }

    server.handler.on_connection_close(&conn_ctx).await;
}

#[cfg(feature = "tls-native-tls")]
async fn accept_io(server: &ServerInner, stream: TcpStream) -> Result<crate::conn::BoxedIo> {
    match &server.config.tls_acceptor {
        Some(acceptor) => {
            let acceptor = tokio_native_tls::TlsAcceptor::from(acceptor.clone());

            let tls = acceptor
                .accept(stream)
                .await
                .map_err(|e| RtspError::Io(std::io::Error::other(e)))?;

            Ok(Box::new(tls))
        }
        None => Ok(Box::new(stream)),
    }
}

#[cfg(not(feature = "tls-native-tls"))]
async fn accept_io(_server: &ServerInner, stream: TcpStream) -> Result<crate::conn::BoxedIo> {
    Ok(Box::new(stream))
}

fn route_frame(sc: &Arc<ServerConn>, frame: InterleavedFrame) {
    let media = sc.sessions.lock().iter().find_map(|session| {
        session
            .media_by_channel(frame.channel)
            .map(|(media, is_rtcp)| (session.clone(), media, is_rtcp))
    });

    // channels that were never set up are silently ignored
    let Some((session, media, is_rtcp)) = media else {
        return;
    };

    if is_rtcp {
        session.handle_rtcp(&media, frame.payload);
    } else {
        session.handle_rtp(&media, frame.payload);
    }
}

/// Stamp the engine headers onto a response and send it
async fn respond(
    server: &ServerInner,
    sc: &ServerConn,
    cseq: CSeq,
    session: Option<&Arc<ServerSession>>,
    mut response: Response,
) -> Result<()> {
    response.headers.replace_type(&cseq);

    if let Some(session) = session {
        response.headers.replace_type(&SessionHeader::with_timeout(
            session.id.as_str(),
            server.config.session_timeout.as_secs(),
        ));
    }

    if !response.headers.contains(&Name::SERVER) {
        response
            .headers
            .insert(Name::SERVER, server.config.server_header.as_str());
    }

    if !response.headers.contains(&Name::DATE) {
        if let Ok(date) = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc2822)
        {
            response.headers.insert(Name::DATE, date);
        }
    }

    sc.conn.write(response.to_bytes()).await
}

fn bad_request(reason: &'static str) -> Response {
    let mut response = Response::new(StatusCode::BAD_REQUEST);
    response.reason = Some(reason.into());
    response
}

async fn handle_request(
    server: &Arc<ServerInner>,
    sc: &Arc<ServerConn>,
    request: Request,
) -> Result<()> {
    // a request without CSeq cannot be answered, drop the connection
    let cseq: CSeq = request
        .headers
        .get()
        .map_err(|_| RtspError::Protocol("request without CSeq"))?;

    let session_header = match request.headers.try_get::<SessionHeader>() {
        Some(Ok(session_header)) => Some(session_header),
        Some(Err(_)) => {
            return respond(server, sc, cseq, None, bad_request("invalid session header")).await;
        }
        None => None,
    };

    // resolve and validate the session binding
    let session = match &session_header {
        Some(header) => {
            let session = server.sessions.read().get(header.id.as_str()).cloned();

            let Some(session) = session else {
                return respond(
                    server,
                    sc,
                    cseq,
                    None,
                    Response::new(StatusCode::SESSION_NOT_FOUND),
                )
                .await;
            };

            let owner = *session.conn_id.lock();

            match owner {
                Some(owner) if owner == sc.id => {}
                None => {
                    // a detached UDP session is adopted by this connection
                    *session.conn.lock() = Some(sc.conn.clone());
                    *session.conn_id.lock() = Some(sc.id);
                    sc.sessions.lock().push(session.clone());
                }
                Some(_) => {
                    // sessions are bound to one connection at a time
                    return respond(
                        server,
                        sc,
                        cseq,
                        None,
                        Response::new(StatusCode::SESSION_NOT_FOUND),
                    )
                    .await;
                }
            }

            session.touch();

            Some(session)
        }
        None => None,
    };

    if let Some(session) = &session {
        let state = *session.state.lock();

        if !state.allows(request.method) {
            return respond(
                server,
                sc,
                cseq,
                Some(session),
                Response::new(StatusCode::METHOD_NOT_VALID_IN_THIS_STATE),
            )
            .await;
        }
    }

    let ctx = RequestCtx {
        conn_id: sc.id,
        peer_addr: sc.peer_addr,
        request: request.clone(),
        session_id: session.as_ref().map(|session| session.id.clone()),
        validator: sc.validator.clone(),
    };

    let response = match request.method {
        Method::Options => handle_options(server, &ctx).await,
        Method::Describe => handle_describe(server, sc, &ctx).await,
        Method::Announce => handle_announce(server, sc, &ctx, &request).await,
        Method::Setup => {
            return handle_setup(server, sc, &ctx, &request, cseq, session).await;
        }
        Method::Play => handle_play(server, &ctx, &request, session.as_ref()).await,
        Method::Record => handle_record(server, &ctx, session.as_ref()).await,
        Method::Pause => handle_pause(server, &ctx, session.as_ref()).await,
        Method::Teardown => {
            let Some(session) = session else {
                return respond(
                    server,
                    sc,
                    cseq,
                    None,
                    Response::new(StatusCode::SESSION_NOT_FOUND),
                )
                .await;
            };

            respond(server, sc, cseq, Some(&session), Response::new(StatusCode::OK)).await?;

            session.close("teardown").await;

            return Ok(());
        }
        Method::GetParameter => match server.handler.on_get_parameter(&ctx).await {
            Some(response) => response,
            None => Response::new(StatusCode::OK),
        },
        Method::SetParameter => match server.handler.on_set_parameter(&ctx).await {
            Some(response) => response,
            None => Response::new(StatusCode::OK),
        },
        Method::Redirect => Response::new(StatusCode::NOT_IMPLEMENTED),
    };

    respond(server, sc, cseq, session.as_ref(), response).await
}

async fn handle_options(server: &Arc<ServerInner>, ctx: &RequestCtx) -> Response {
    if let Some(response) = server.handler.on_options(ctx).await {
        return response;
    }

    let mut response = Response::new(StatusCode::OK);

    response.headers.insert_type(&Public(vec![
        Method::Options,
        Method::Describe,
        Method::Announce,
        Method::Setup,
        Method::Play,
        Method::Record,
        Method::Pause,
        Method::GetParameter,
        Method::SetParameter,
        Method::Teardown,
    ]));

    response
}

async fn handle_describe(
    server: &Arc<ServerInner>,
    sc: &Arc<ServerConn>,
    ctx: &RequestCtx,
) -> Response {
    let stream = match server.handler.on_describe(ctx).await {
        Ok(stream) => stream,
        Err(response) => return response,
    };

    let sdp = tracks_to_sdp(stream.tracks(), sc.conn.local_addr.ip()).to_string();

    let mut response = Response::new(StatusCode::OK);

    let base = ctx.request.url.without_credentials().with_trailing_slash();

    response
        .headers
        .insert(Name::CONTENT_BASE, base.to_string());
    response
        .headers
        .insert(Name::CONTENT_TYPE, "application/sdp");
    response.body = Bytes::from(sdp);

    response
}

async fn handle_announce(
    server: &Arc<ServerInner>,
    sc: &Arc<ServerConn>,
    ctx: &RequestCtx,
    request: &Request,
) -> Response {
    let tracks = match tracks_from_sdp(&request.body) {
        Ok(tracks) => tracks,
        Err(e) => {
            log::debug!("rejecting ANNOUNCE: {e}");
            return bad_request("invalid session description");
        }
    };

    if let Err(response) = server.handler.on_announce(ctx, &tracks).await {
        return response;
    }

    // give control-less tracks their positional controls
    let tracks: Vec<Track> = tracks
        .into_iter()
        .enumerate()
        .map(|(i, mut track)| {
            if track.control.is_empty() {
                track.control = format!("trackID={i}");
            }
            track
        })
        .collect();

    *sc.announced.lock() = Some((request.url.path_and_query(), tracks));

    Response::new(StatusCode::OK)
}

async fn handle_setup(
    server: &Arc<ServerInner>,
    sc: &Arc<ServerConn>,
    ctx: &RequestCtx,
    request: &Request,
    cseq: CSeq,
    session: Option<Arc<ServerSession>>,
) -> Result<()> {
    let transport_header: Transport = match request.headers.get() {
        Ok(transport_header) => transport_header,
        Err(_) => {
            return respond(server, sc, cseq, session.as_ref(), bad_request("invalid transport"))
                .await;
        }
    };

    let is_record = transport_header.mode == Some(TransportMode::Record);

    let stream = match server.handler.on_setup(ctx).await {
        Ok(stream) => stream,
        Err(response) => {
            return respond(server, sc, cseq, session.as_ref(), response).await;
        }
    };

    let tracks = if is_record {
        let announced = sc.announced.lock().clone();
        match announced {
            Some((_, tracks)) => tracks,
            None => {
                return respond(
                    server,
                    sc,
                    cseq,
                    session.as_ref(),
                    bad_request("no announced stream"),
                )
                .await;
            }
        }
    } else {
        match &stream {
            Some(stream) => stream.tracks().to_vec(),
            None => {
                return respond(
                    server,
                    sc,
                    cseq,
                    session.as_ref(),
                    Response::new(StatusCode::NOT_FOUND),
                )
                .await;
            }
        }
    };

    let path_query = request.url.path_and_query();

    let Some((track_idx, base_path)) = find_track_by_path(&tracks, &path_query) else {
        return respond(
            server,
            sc,
            cseq,
            session.as_ref(),
            bad_request("invalid track path"),
        )
        .await;
    };

    // find or create the session
    let session = match session {
        Some(session) => session,
        None => {
            let id = random_session_id();

            let session = ServerSession::new(
                id.clone(),
                server,
                sc.conn.clone(),
                sc.id,
                server.config.write_queue_size,
                server.config.session_timeout,
            );

            server.sessions.write().insert(id.clone(), session.clone());
            sc.sessions.lock().push(session.clone());

            server.handler.on_session_open(&id).await;

            session
        }
    };

    // all SETUPs of one session share the same base path
    let base_mismatch = {
        let mut stored = session.base_path.lock();

        match stored.as_ref() {
            Some(existing) => existing != &base_path,
            None => {
                *stored = Some(base_path.clone());
                false
            }
        }
    };

    if base_mismatch {
        return respond(
            server,
            sc,
            cseq,
            Some(&session),
            bad_request("invalid track path"),
        )
        .await;
    }

    if session.media_by_idx(track_idx).is_some() {
        return respond(
            server,
            sc,
            cseq,
            Some(&session),
            bad_request("media already set up"),
        )
        .await;
    }

    let clock_rate = tracks[track_idx]
        .formats
        .first()
        .map(|format| format.clock_rate())
        .unwrap_or(90_000);

    let mut response_transport;
    let media_transport;

    match transport_header.protocol {
        TransportProtocol::Tcp => {
            let channels = transport_header
                .interleaved
                .unwrap_or_else(|| session.allocate_channels());

            response_transport = Transport::new(TransportProtocol::Tcp);
            response_transport.delivery = Some(Delivery::Unicast);
            response_transport.interleaved = Some(channels);

            media_transport = SessionMediaTransport::Tcp { channels };
        }
        TransportProtocol::Udp if transport_header.delivery == Some(Delivery::Multicast) => {
            let group = match (&stream, is_record) {
                (Some(stream), false) => match stream.multicast_group(track_idx) {
                    Ok(group) => group,
                    Err(_) => {
                        return respond(
                            server,
                            sc,
                            cseq,
                            Some(&session),
                            Response::new(StatusCode::UNSUPPORTED_TRANSPORT),
                        )
                        .await;
                    }
                },
                _ => {
                    return respond(
                        server,
                        sc,
                        cseq,
                        Some(&session),
                        Response::new(StatusCode::UNSUPPORTED_TRANSPORT),
                    )
                    .await;
                }
            };

            response_transport = Transport::new(TransportProtocol::Udp);
            response_transport.delivery = Some(Delivery::Multicast);
            response_transport.destination = Some(group.into());
            response_transport.ports = Some((
                server.config.multicast_rtp_port,
                server.config.multicast_rtcp_port,
            ));
            response_transport.ttl = Some(server.config.multicast_ttl as u8);

            media_transport = SessionMediaTransport::Multicast;
        }
        TransportProtocol::Udp => {
            let Some(udp) = &server.udp else {
                return respond(
                    server,
                    sc,
                    cseq,
                    Some(&session),
                    Response::new(StatusCode::UNSUPPORTED_TRANSPORT),
                )
                .await;
            };

            let Some(client_ports) = transport_header.client_ports else {
                return respond(
                    server,
                    sc,
                    cseq,
                    Some(&session),
                    bad_request("client_port missing"),
                )
                .await;
            };

            let rtp_peer = SocketAddr::new(sc.peer_addr.ip(), client_ports.0);
            let rtcp_peer = SocketAddr::new(sc.peer_addr.ip(), client_ports.1);

            udp.register(&session, track_idx, rtp_peer, rtcp_peer);

            response_transport = Transport::new(TransportProtocol::Udp);
            response_transport.delivery = Some(Delivery::Unicast);
            response_transport.client_ports = Some(client_ports);
            response_transport.server_ports = Some((udp.rtp_port, udp.rtcp_port));

            media_transport = SessionMediaTransport::Udp {
                rtp_peer,
                rtcp_peer,
                last_packet_ms: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            };
        }
    }

    if is_record {
        response_transport.mode = Some(TransportMode::Record);
    }

    let rx = if is_record {
        let rr_ssrc = Ssrc(rand::rng().next_u32());

        let rx = match &media_transport {
            SessionMediaTransport::Tcp { .. } => MediaRx::new_tcp(rr_ssrc, clock_rate)?,
            _ => MediaRx::new_udp(rr_ssrc, clock_rate)?,
        };

        Some(Mutex::new(rx))
    } else {
        None
    };

    session.medias.lock().push(Arc::new(SessionMedia {
        media_idx: track_idx,
        transport: media_transport,
        rx,
    }));

    {
        let mut state = session.state.lock();
        *state = if is_record {
            SessionState::PreRecord
        } else {
            SessionState::PrePlay
        };
    }

    *session.mode.lock() = Some(if is_record {
        SessionMode::Record
    } else {
        SessionMode::Play
    });

    if let Some(stream) = &stream {
        *session.stream.lock() = Some(stream.clone());
        stream.add_reader(&session);
    }

    let mut response = Response::new(StatusCode::OK);
    response.headers.insert_type(&response_transport);

    respond(server, sc, cseq, Some(&session), response).await
}

async fn handle_play(
    server: &Arc<ServerInner>,
    ctx: &RequestCtx,
    request: &Request,
    session: Option<&Arc<ServerSession>>,
) -> Response {
    let Some(session) = session else {
        return Response::new(StatusCode::SESSION_NOT_FOUND);
    };

    if let Err(response) = server.handler.on_play(ctx).await {
        return response;
    }

    let mut response = Response::new(StatusCode::OK);

    let stream = session.stream.lock().clone();

    if let Some(stream) = stream {
        stream.set_reader_active(&session.id, true);

        let mut entries = vec![];

        for media in session.medias.lock().iter() {
            let Some(cache) = stream.rtp_info_cache(media.media_idx) else {
                continue;
            };

            let Some(track) = stream.tracks().get(media.media_idx) else {
                continue;
            };

            let Ok(url) = request.url.without_credentials().resolve_control(&track.control)
            else {
                continue;
            };

            entries.push(RtpInfoEntry {
                url: url.to_string().into(),
                seq: Some(cache.seq.wrapping_add(1)),
                rtptime: Some(cache.rtptime),
            });
        }

        if !entries.is_empty() {
            response.headers.insert_type(&RtpInfo(entries));
        }
    }

    *session.state.lock() = SessionState::Play;

    response
}

async fn handle_record(
    server: &Arc<ServerInner>,
    ctx: &RequestCtx,
    session: Option<&Arc<ServerSession>>,
) -> Response {
    let Some(session) = session else {
        return Response::new(StatusCode::SESSION_NOT_FOUND);
    };

    if let Err(response) = server.handler.on_record(ctx).await {
        return response;
    }

    *session.state.lock() = SessionState::Record;

    Response::new(StatusCode::OK)
}

async fn handle_pause(
    server: &Arc<ServerInner>,
    ctx: &RequestCtx,
    session: Option<&Arc<ServerSession>>,
) -> Response {
    let Some(session) = session else {
        return Response::new(StatusCode::SESSION_NOT_FOUND);
    };

    if let Err(response) = server.handler.on_pause(ctx).await {
        return response;
    }

    if let Some(stream) = session.stream.lock().clone() {
        stream.set_reader_active(&session.id, false);
    }

    let mut state = session.state.lock();

    *state = match *state {
        SessionState::Play => SessionState::PrePlay,
        SessionState::Record => SessionState::PreRecord,
        other => other,
    };

    Response::new(StatusCode::OK)
}

/// Match a SETUP URL against the tracks' control attributes, returning the
/// track index and the shared base path
fn find_track_by_path(tracks: &[Track], path_query: &str) -> Option<(usize, String)> {
    for (i, track) in tracks.iter().enumerate() {
        if track.control.is_empty() {
            return Some((i, path_query.trim_end_matches('/').to_string()));
        }

        if let Some(base) = path_query.strip_suffix(track.control.as_str()) {
            return Some((i, base.trim_end_matches('/').to_string()));
        }

        if track.control.starts_with("rtsp://") || track.control.starts_with("rtsps://") {
            if let Ok(control_url) = RtspUrl::parse(&track.control) {
                if control_url.path_and_query() == path_query {
                    return Some((i, String::new()));
                }
            }
        }
    }

    None
}

fn random_session_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);

    let mut id = String::with_capacity(16);

    for byte in bytes {
        let _ = write!(id, "{byte:02x}");
    }

    id
}
