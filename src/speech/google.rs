//! Google Cloud Speech backend.
//!
//! Implements [`RecognitionBackend`] over the bidirectional
//! `StreamingRecognize` gRPC call. The caller provides a connected
//! [`tonic::transport::Channel`]; TLS and credentials are wired outside the
//! crate.

use crate::error::{DiscimError, Result};
use crate::speech::backend::{
    BackendSession, RecognitionAlternative, RecognitionBackend, RecognitionResponse,
    RecognitionResult, ServiceStatus, WordSpan, SESSION_AUDIO_QUEUE_SIZE,
};
use crate::speech::proto::{
    streaming_recognize_request::StreamingRequest, AudioEncoding, RecognitionConfig,
    SpeechContext, StreamingRecognitionConfig, StreamingRecognizeRequest,
    StreamingRecognizeResponse,
};
use crate::speech::stream::StreamConfig;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tracing::debug;

const STREAMING_RECOGNIZE_PATH: &str = "/google.cloud.speech.v1.Speech/StreamingRecognize";

/// Thin client for the `StreamingRecognize` call.
#[derive(Clone)]
pub struct SpeechClient {
    inner: tonic::client::Grpc<Channel>,
}

impl SpeechClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Opens the bidirectional stream. `requests` must yield the streaming
    /// configuration first and raw audio afterwards; ending the stream
    /// half-closes the call.
    pub async fn streaming_recognize<S>(
        &mut self,
        requests: S,
    ) -> std::result::Result<
        tonic::Response<tonic::codec::Streaming<StreamingRecognizeResponse>>,
        tonic::Status,
    >
    where
        S: tokio_stream::Stream<Item = StreamingRecognizeRequest> + Send + 'static,
    {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;
        let codec: tonic::codec::ProstCodec<
            StreamingRecognizeRequest,
            StreamingRecognizeResponse,
        > = tonic::codec::ProstCodec::default();
        let path = tonic::codegen::http::uri::PathAndQuery::from_static(STREAMING_RECOGNIZE_PATH);
        self.inner
            .streaming(tonic::Request::new(requests), path, codec)
            .await
    }
}

/// [`RecognitionBackend`] backed by the Google Cloud Speech service.
pub struct GoogleBackend {
    client: SpeechClient,
}

impl GoogleBackend {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: SpeechClient::new(channel),
        }
    }
}

#[async_trait]
impl RecognitionBackend for GoogleBackend {
    async fn open_session(&self, config: &StreamConfig) -> Result<BackendSession> {
        let (session, mut audio_rx, response_tx) = BackendSession::pair();

        let (request_tx, request_rx) =
            mpsc::channel::<StreamingRecognizeRequest>(SESSION_AUDIO_QUEUE_SIZE);

        // The configuration must be the first message on the stream.
        request_tx
            .send(config_request(config))
            .await
            .map_err(|_| DiscimError::SessionOpen {
                message: "request stream closed before configuration was sent".to_string(),
            })?;

        // Pump audio buffers into the request stream. Dropping the sender
        // when the engine closes its audio queue half-closes the call, which
        // lets the service flush pending recognitions.
        tokio::spawn(async move {
            while let Some(buffer) = audio_rx.recv().await {
                let request = StreamingRecognizeRequest {
                    streaming_request: Some(StreamingRequest::AudioContent(buffer)),
                };
                if request_tx.send(request).await.is_err() {
                    break;
                }
            }
        });

        let mut client = self.client.clone();
        let response = client
            .streaming_recognize(ReceiverStream::new(request_rx))
            .await
            .map_err(|status| DiscimError::SessionOpen {
                message: status.to_string(),
            })?;
        let mut inbound = response.into_inner();

        tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(message)) => {
                        if response_tx.send(Ok(map_response(message))).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("recognition stream ended");
                        break;
                    }
                    Err(status) => {
                        let _ = response_tx
                            .send(Err(DiscimError::Transport {
                                message: status.to_string(),
                            }))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(session)
    }
}

fn config_request(config: &StreamConfig) -> StreamingRecognizeRequest {
    let speech_contexts = if config.speech_context.is_empty() {
        Vec::new()
    } else {
        vec![SpeechContext {
            phrases: config.speech_context.clone(),
        }]
    };

    StreamingRecognizeRequest {
        streaming_request: Some(StreamingRequest::StreamingConfig(
            StreamingRecognitionConfig {
                config: Some(RecognitionConfig {
                    encoding: AudioEncoding::Linear16 as i32,
                    sample_rate_hertz: config.audio.sample_rate as i32,
                    language_code: config.language.clone(),
                    speech_contexts,
                    enable_word_time_offsets: true,
                    enable_automatic_punctuation: true,
                }),
                single_utterance: false,
                interim_results: config.interim_results,
            },
        )),
    }
}

fn map_response(response: StreamingRecognizeResponse) -> RecognitionResponse {
    RecognitionResponse {
        error: response.error.map(|status| ServiceStatus {
            code: status.code,
            message: status.message,
        }),
        results: response
            .results
            .into_iter()
            .map(|result| RecognitionResult {
                is_final: result.is_final,
                alternatives: result
                    .alternatives
                    .into_iter()
                    .map(|alternative| RecognitionAlternative {
                        confidence: f64::from(alternative.confidence),
                        words: alternative
                            .words
                            .into_iter()
                            .map(|word| WordSpan {
                                start: map_duration(word.start_time),
                                end: map_duration(word.end_time),
                                word: word.word,
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn map_duration(duration: Option<prost_types::Duration>) -> Duration {
    match duration {
        Some(d) if d.seconds >= 0 && d.nanos >= 0 => {
            Duration::new(d.seconds as u64, d.nanos as u32)
        }
        _ => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::proto::{RpcStatus, SpeechRecognitionAlternative, WordInfo};

    fn word(start_secs: i64, start_nanos: i32, text: &str) -> WordInfo {
        WordInfo {
            start_time: Some(prost_types::Duration {
                seconds: start_secs,
                nanos: start_nanos,
            }),
            end_time: Some(prost_types::Duration {
                seconds: start_secs + 1,
                nanos: start_nanos,
            }),
            word: text.to_string(),
        }
    }

    #[test]
    fn test_config_request_fields() {
        let config = StreamConfig {
            language: "it-IT".to_string(),
            speech_context: vec!["installazione".to_string()],
            interim_results: true,
            ..Default::default()
        };

        let request = config_request(&config);
        let Some(StreamingRequest::StreamingConfig(streaming)) = request.streaming_request
        else {
            panic!("expected a streaming config message");
        };

        assert!(streaming.interim_results);
        let recognition = streaming.config.unwrap();
        assert_eq!(recognition.encoding, AudioEncoding::Linear16 as i32);
        assert_eq!(recognition.sample_rate_hertz, 16_000);
        assert_eq!(recognition.language_code, "it-IT");
        assert!(recognition.enable_word_time_offsets);
        assert!(recognition.enable_automatic_punctuation);
        assert_eq!(recognition.speech_contexts[0].phrases, ["installazione"]);
    }

    #[test]
    fn test_config_request_without_context_phrases() {
        let request = config_request(&StreamConfig::default());
        let Some(StreamingRequest::StreamingConfig(streaming)) = request.streaming_request
        else {
            panic!("expected a streaming config message");
        };
        assert!(streaming.config.unwrap().speech_contexts.is_empty());
    }

    #[test]
    fn test_map_response_words_and_status() {
        let response = StreamingRecognizeResponse {
            error: Some(RpcStatus {
                code: 8,
                message: "quota pressure".to_string(),
            }),
            results: vec![crate::speech::proto::StreamingRecognitionResult {
                alternatives: vec![SpeechRecognitionAlternative {
                    transcript: "hello world".to_string(),
                    confidence: 0.25,
                    words: vec![word(0, 500_000_000, "hello"), word(1, 500_000_000, "world")],
                }],
                is_final: true,
                stability: 0.0,
            }],
        };

        let mapped = map_response(response);
        assert_eq!(mapped.error.as_ref().unwrap().message, "quota pressure");
        let result = &mapped.results[0];
        assert!(result.is_final);
        let alternative = &result.alternatives[0];
        assert!((alternative.confidence - 0.25).abs() < 1e-6);
        assert_eq!(alternative.words[0].word, "hello");
        assert_eq!(alternative.words[0].start, Duration::from_millis(500));
        assert_eq!(alternative.words[1].start, Duration::from_millis(1_500));
    }

    #[test]
    fn test_map_duration_missing_or_negative() {
        assert_eq!(map_duration(None), Duration::ZERO);
        assert_eq!(
            map_duration(Some(prost_types::Duration {
                seconds: -1,
                nanos: 0
            })),
            Duration::ZERO
        );
    }
}
