use bytes::Bytes;
use editstream_proto::{decode, EditRequest, EditResult, FrameBuffer, ProtoError, CONTENT_TYPE};
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use std::fmt::Display;
use tracing::{debug, info, warn};

use crate::aggregator::{AIProgressState, ProgressAggregator};
use crate::ClientError;

/// Read an event stream to its end, folding every whole frame into
/// `aggregator` and calling `observer` after each fold.
///
/// Reading stops at the first terminal event. Malformed frames are logged and
/// skipped. A transport error ends the stream like a close.
pub async fn consume<S, E, F>(
    stream: S,
    aggregator: &mut ProgressAggregator,
    mut observer: F,
) -> Result<EditResult, ClientError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
    F: FnMut(&AIProgressState),
{
    let mut stream = Box::pin(stream);
    let mut buffer = FrameBuffer::new();

    'read: while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                for frame in buffer.push(&chunk) {
                    if fold_frame(&frame, aggregator, &mut observer) {
                        break 'read;
                    }
                }
            }
            Err(e) => {
                warn!("Event stream interrupted: {}", e);
                break;
            }
        }
    }

    if !aggregator.is_finished() {
        if let Some(rest) = buffer.finish() {
            fold_frame(&rest, aggregator, &mut observer);
        }
    }

    aggregator.finish()
}

/// Returns true once the aggregator has seen its terminal event.
fn fold_frame<F>(frame: &[u8], aggregator: &mut ProgressAggregator, observer: &mut F) -> bool
where
    F: FnMut(&AIProgressState),
{
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("Skipping frame that is not UTF-8: {}", e);
            return aggregator.is_finished();
        }
    };

    match decode(text) {
        Ok(event) => {
            debug!("Folding {} event", event.kind().as_str());
            if aggregator.apply(event) {
                observer(aggregator.state());
            }
        }
        Err(ProtoError::EmptyFrame) => {}
        Err(e) => warn!("Skipping malformed frame: {}", e),
    }

    aggregator.is_finished()
}

/// HTTP client for the edit endpoints.
#[derive(Clone)]
pub struct EditClient {
    client: Client,
    base_url: String,
}

impl EditClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn agentic_edit<F>(&self, request: &EditRequest, observer: F) -> Result<EditResult, ClientError>
    where
        F: FnMut(&AIProgressState),
    {
        self.run("/api/agentic/edit", request, observer).await
    }

    pub async fn inpaint<F>(&self, request: &EditRequest, observer: F) -> Result<EditResult, ClientError>
    where
        F: FnMut(&AIProgressState),
    {
        self.run("/api/images/inpaint", request, observer).await
    }

    async fn run<F>(&self, path: &str, request: &EditRequest, observer: F) -> Result<EditResult, ClientError>
    where
        F: FnMut(&AIProgressState),
    {
        let url = format!("{}{}", self.base_url, path);
        info!("Starting operation at {}", url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, CONTENT_TYPE)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected { status, body });
        }

        let mut aggregator = ProgressAggregator::new();
        consume(response.bytes_stream(), &mut aggregator, observer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use editstream_proto::ProgressStep;
    use std::convert::Infallible;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STREAM: &str = concat!(
        "event: progress\ndata: {\"step\":\"planning\",\"message\":\"Sending planning request to AI...\",\"newLogEntry\":true}\n\n",
        "event: progress\ndata: {\"step\":\"planning\",\"message\":\"AI is thinking...\",\"thinkingTextDelta\":\"Hel\"}\n\n",
        "event: progress\ndata: {\"step\":\"planning\",\"message\":\"AI is thinking...\",\"thinkingTextDelta\":\"lo\"}\n\n",
        "event: progress\ndata: {\"step\":\"calling_api\",\"message\":\"Generating image (attempt 1/1)...\",\"iteration\":{\"current\":1,\"max\":1},\"newLogEntry\":true}\n\n",
        "event: progress\ndata: {\"step\":\"complete\",\"message\":\"Edit completed successfully!\",\"iteration\":{\"current\":1,\"max\":1}}\n\n",
        "event: complete\ndata: {\"imageData\":\"data:image/png;base64,AA\",\"iterations\":1,\"finalPrompt\":\"a hat\"}\n\n",
    );

    fn request() -> EditRequest {
        EditRequest {
            source_image: "data:image/png;base64,SRC".into(),
            prompt: "a hat".into(),
            mask_image: None,
            reference_points: None,
            max_iterations: Some(1),
        }
    }

    fn chunked(body: &str, size: usize) -> impl Stream<Item = Result<Bytes, Infallible>> {
        let chunks: Vec<_> = body
            .as_bytes()
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_consume_any_chunking_same_state() {
        let mut reference = ProgressAggregator::new();
        consume(chunked(STREAM, STREAM.len()), &mut reference, |_| {}).await.unwrap();

        for size in [1, 2, 7, 64] {
            let mut aggregator = ProgressAggregator::new();
            let result = consume(chunked(STREAM, size), &mut aggregator, |_| {}).await.unwrap();
            assert_eq!(result.final_prompt, "a hat");

            let state = aggregator.state();
            assert_eq!(state.log.len(), reference.state().log.len());
            assert_eq!(state.log[0].thinking_text, "Hello");
            assert_eq!(state.log[1].step, ProgressStep::Complete);
        }
    }

    #[tokio::test]
    async fn test_observer_sees_each_fold() {
        let mut steps = Vec::new();
        let mut aggregator = ProgressAggregator::new();
        consume(chunked(STREAM, 5), &mut aggregator, |state| steps.push(state.step))
            .await
            .unwrap();
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[3], ProgressStep::CallingApi);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let body = format!(
            "event: progress\ndata: {{broken\n\n:comment\n\n{}",
            STREAM
        );
        let mut aggregator = ProgressAggregator::new();
        let result = consume(chunked(&body, 11), &mut aggregator, |_| {}).await;
        assert!(result.is_ok());
        assert_eq!(aggregator.state().log.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_without_terminal_event() {
        let cut = STREAM.find("event: progress\ndata: {\"step\":\"complete\"").unwrap();
        let mut aggregator = ProgressAggregator::new();
        let result = consume(chunked(&STREAM[..cut], 9), &mut aggregator, |_| {}).await;

        assert_eq!(result, Err(ClientError::TransportClosed));
        // earlier rows survive, failure row appended
        assert_eq!(aggregator.state().log.len(), 3);
        assert_eq!(aggregator.state().log[2].step, ProgressStep::Error);
    }

    #[tokio::test]
    async fn test_events_after_terminal_are_not_read() {
        let body = format!("{}event: error\ndata: {{\"message\":\"late\"}}\n\n", STREAM);
        let mut aggregator = ProgressAggregator::new();
        let result = consume(chunked(&body, body.len()), &mut aggregator, |_| {}).await;
        assert!(result.is_ok());
        assert!(aggregator.state().error.is_none());
    }

    #[tokio::test]
    async fn test_agentic_edit_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agentic/edit"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM, CONTENT_TYPE))
            .mount(&server)
            .await;

        let client = EditClient::new(server.uri());
        let mut last_message = String::new();
        let result = client
            .agentic_edit(&request(), |state| last_message = state.message.clone())
            .await
            .unwrap();

        assert_eq!(result.image_data, "data:image/png;base64,AA");
        assert_eq!(last_message, "Edit completed successfully!");
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"error\":\"BadRequest\"}"))
            .mount(&server)
            .await;

        let err = EditClient::new(server.uri())
            .agentic_edit(&request(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_upstream_error_event_is_operation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/images/inpaint"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "event: error\ndata: {\"message\":\"Upstream service error (500)\",\"details\":\"boom\"}\n\n",
                CONTENT_TYPE,
            ))
            .mount(&server)
            .await;

        let err = EditClient::new(server.uri())
            .inpaint(&request(), |_| {})
            .await
            .unwrap_err();
        match err {
            ClientError::Operation(error) => assert!(error.message.contains("500")),
            other => panic!("expected operation error, got {:?}", other),
        }
    }
}
