//! WebSocket client transport

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{Connection, Dialer, Outbound, TransportEvent, WireMessage};
use crate::session::{EventSink, SessionEvent};

/// Opens WebSocket connections with tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

impl Dialer for WsDialer {
    fn dial(&self, url: &Url, sink: EventSink) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(url.to_string(), sink, rx));
        Connection::new(tx, Some(task))
    }
}

/// Drive one connection from handshake to close
async fn run_connection(
    url: String,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    tracing::debug!(url = %url, "opening websocket");

    let stream = tokio::select! {
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                emit(&sink, TransportEvent::Failed(e.to_string()));
                return;
            }
        },
        () = wait_for_close(&mut outbound) => {
            tracing::debug!(url = %url, "connection cancelled while opening");
            return;
        }
    };

    emit(&sink, TransportEvent::Opened);

    let (mut writer, mut reader) = stream.split();

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Binary(bytes)) => {
                    if let Err(e) = writer.send(Message::binary(bytes)).await {
                        emit(&sink, TransportEvent::Failed(e.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = writer.close().await {
                        tracing::debug!(error = %e, "websocket close handshake failed");
                    }
                    break;
                }
            },
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    emit(&sink, TransportEvent::Message(WireMessage::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    emit(&sink, TransportEvent::Message(WireMessage::Binary(bytes.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                    });
                    emit(&sink, TransportEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(&sink, TransportEvent::Failed(e.to_string()));
                    break;
                }
                None => {
                    emit(&sink, TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            }
        }
    }

    tracing::debug!(url = %url, "websocket task finished");
}

/// Resolve once the session asks to close; frames queued before open are dropped
async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Binary(_)) => {}
            Some(Outbound::Close) | None => return,
        }
    }
}

fn emit(sink: &EventSink, event: TransportEvent) {
    sink.emit(SessionEvent::Transport(event));
}
