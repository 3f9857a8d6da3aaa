use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use super::live::{LiveEvent, LiveFrame};
use crate::error::{ChatError, ChatResult};
use crate::identity::ParticipantId;
use crate::model;
use crate::server::PRINCIPAL_HEADER;

/// Connect to a server's live message route and feed every frame to
/// `listener`. Returns a JoinHandle for the background task reading the
/// socket; abort it to unsubscribe. A dropped connection is reported once
/// as [`LiveEvent::Error`] before the task ends.
pub async fn watch_remote<L>(
    url: &str,
    principal: Option<&ParticipantId>,
    listener: L,
) -> ChatResult<JoinHandle<()>>
where
    L: Fn(LiveEvent<model::Message>) + Send + 'static,
{
    let url = Url::parse(url).map_err(|e| ChatError::Transport(format!("invalid ws url: {e}")))?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(ChatError::transport)?;
    if let Some(principal) = principal {
        let value = HeaderValue::from_str(principal.as_str()).map_err(ChatError::transport)?;
        request.headers_mut().insert(PRINCIPAL_HEADER, value);
    }

    let (mut ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(ChatError::transport)?;
    debug!(%url, "live connection established");

    let handle = tokio::spawn(async move {
        while let Some(msg) = ws_stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<LiveFrame>(&text) {
                    Ok(frame) => listener(frame.into()),
                    Err(err) => warn!(error = %err, "undecodable live frame"),
                },
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(_))
                | Ok(Message::Ping(_))
                | Ok(Message::Pong(_))
                | Ok(Message::Frame(_)) => {}
                Err(err) => {
                    listener(LiveEvent::Error(ChatError::transport(err)));
                    break;
                }
            }
        }
        debug!("live connection closed");
    });

    Ok(handle)
}
