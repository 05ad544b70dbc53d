use super::models::{ListenRequest, ListenResponse};
use super::FirestoreError;
use crate::core::read_error_response;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use reqwest_middleware::ClientWithMiddleware;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Incremental framer for the `documents:listen` response body.
///
/// The endpoint streams a JSON array of messages; elements arrive split
/// across arbitrary chunk boundaries. The framer scans for balanced
/// top-level objects and treats the surrounding array punctuation
/// (`[`, `,`, `]`) and whitespace as inter-frame filler.
#[derive(Default)]
struct JsonFramer {
    buffer: BytesMut,
}

impl JsonFramer {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts the next complete top-level JSON object, if one is buffered.
    fn next_frame(&mut self) -> Option<Bytes> {
        let start = self
            .buffer
            .iter()
            .position(|&b| b == b'{')?;

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in self.buffer.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let frame = self.buffer.split_to(i + 1).split_off(start);
                        return Some(frame.freeze());
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// True if the buffer holds nothing but filler.
    fn drained(&self) -> bool {
        self.buffer
            .iter()
            .all(|&b| b.is_ascii_whitespace() || b == b'[' || b == b']' || b == b',')
    }
}

/// A stream of decoded [`ListenResponse`] messages from one subscription.
pub struct ListenStream {
    body: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    framer: JsonFramer,
}

impl ListenStream {
    fn new(body: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            body,
            framer: JsonFramer::default(),
        }
    }
}

impl Stream for ListenStream {
    type Item = Result<ListenResponse, FirestoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(frame) = self.framer.next_frame() {
                return Poll::Ready(Some(
                    serde_json::from_slice::<ListenResponse>(&frame)
                        .map_err(FirestoreError::Serialization),
                ));
            }

            match self.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.framer.push(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(FirestoreError::Request(e))))
                }
                Poll::Ready(None) => {
                    if !self.framer.drained() {
                        return Poll::Ready(Some(Err(FirestoreError::Api {
                            status: 0,
                            message: "listen stream ended mid-message".into(),
                        })));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Opens a listen stream. `listen_url` is the full `...documents:listen`
/// endpoint; the target itself travels in `request`.
pub(crate) async fn open_listen_stream(
    client: &ClientWithMiddleware,
    listen_url: &str,
    request: &ListenRequest,
) -> Result<ListenStream, FirestoreError> {
    let response = client.post(listen_url).json(request).send().await?;

    if !response.status().is_success() {
        let (status, message) = read_error_response(response, "listen failed").await;
        return Err(FirestoreError::Api { status, message });
    }

    let body = stream::unfold(response, |mut resp| async move {
        match resp.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), resp)),
            Ok(None) => None,
            Err(e) => Some((Err(e), resp)),
        }
    });

    Ok(ListenStream::new(Box::pin(body)))
}
