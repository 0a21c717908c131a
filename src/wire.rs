use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::AppointmentStatus;
use crate::observability::{self, request_label};
use crate::protocol::{CheckResult, Request, Response, ServiceView, WatchEvent};

#[derive(Debug)]
pub enum WireError {
    Io(std::io::Error),
    LineTooLong,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "I/O error: {e}"),
            WireError::LineTooLong => write!(f, "request line exceeds {MAX_LINE_LEN} bytes"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<LinesCodecError> for WireError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => WireError::LineTooLong,
            LinesCodecError::Io(e) => WireError::Io(e),
        }
    }
}

/// Serve one client connection until it closes.
///
/// Requests are answered in order, one response line each. After a `watch`
/// the connection only streams that client's changes until it closes.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let err = EngineError::LimitExceeded("request line too long");
                framed.send(Response::error(&err).to_line()).await?;
                return Err(WireError::LineTooLong);
            }
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }

        let req = match Request::parse(&line) {
            Ok(req) => req,
            Err(e) => {
                debug!("unparseable request: {e}");
                metrics::counter!(
                    observability::REQUESTS_TOTAL,
                    "op" => "unknown",
                    "status" => "error"
                )
                .increment(1);
                framed.send(Response::error(&e).to_line()).await?;
                continue;
            }
        };

        if let Request::Watch { client_id } = req {
            let rx = engine.notify.subscribe(&client_id);
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "watch", "status" => "ok")
                .increment(1);
            framed.send(Response::ok(&client_id).to_line()).await?;
            return stream_changes(&mut framed, rx, &client_id).await;
        }

        let label = request_label(&req);
        let start = Instant::now();
        let response = dispatch(&engine, req).await;
        let status = if response.ok { "ok" } else { "error" };
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => label)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(observability::REQUESTS_TOTAL, "op" => label, "status" => status)
            .increment(1);
        framed.send(response.to_line()).await?;
    }
    Ok(())
}

async fn dispatch(engine: &Engine, req: Request) -> Response {
    let result = match req {
        Request::Services => engine.services().await.map(|services| {
            Response::ok(services.iter().map(ServiceView::from).collect::<Vec<_>>())
        }),
        Request::Slots { date, service_id, exclude } => engine
            .open_slots(date, &service_id, exclude)
            .await
            .map(Response::ok),
        Request::Check { request } => engine
            .check(&request)
            .await
            .map(|end_time| Response::ok(CheckResult { end_time })),
        Request::Book { client_id, request } => {
            engine.book(&client_id, &request).await.map(Response::ok)
        }
        Request::SetStatus { id, status } => match status.parse::<AppointmentStatus>() {
            Ok(next) => engine.set_status(id, next).await.map(Response::ok),
            Err(e) => Err(EngineError::InvalidRequest(e.to_string())),
        },
        Request::ClientAppointments { client_id, filter } => engine
            .client_appointments(&client_id, &filter)
            .await
            .map(Response::ok),
        Request::DayAppointments { date } => {
            engine.appointments_for_date(date).await.map(Response::ok)
        }
        Request::Watch { .. } => Err(EngineError::InvalidRequest(
            "watch handled by connection".into(),
        )),
    };
    result.unwrap_or_else(|e| {
        if !e.is_rejection() {
            warn!("request failed: {e}");
        }
        Response::error(&e)
    })
}

/// Forward a client's appointment changes until the peer disconnects.
async fn stream_changes<S>(
    framed: &mut Framed<S, LinesCodec>,
    mut rx: broadcast::Receiver<crate::model::Appointment>,
    client_id: &str,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    metrics::gauge!(observability::WATCHERS_ACTIVE).increment(1.0);
    let result = loop {
        tokio::select! {
            change = rx.recv() => match change {
                Ok(appointment) => {
                    let line = match serde_json::to_string(&WatchEvent { event: appointment }) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("dropping unencodable change for {client_id}: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = framed.send(line).await {
                        break Err(e.into());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("watcher for {client_id} lagged, skipped {n} changes");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            incoming = framed.next() => match incoming {
                // Input after a watch is ignored; only disconnect matters.
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            },
        }
    };
    metrics::gauge!(observability::WATCHERS_ACTIVE).decrement(1.0);
    result
}
