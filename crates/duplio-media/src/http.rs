// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP adapters for the TTS and lip-sync services.
//!
//! TTS streams audio chunks as Server-Sent Events (`audio` events with
//! base64 payloads, terminated by `done`); lip-sync is a unary call per
//! audio chunk.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use duplio_core::error::DuplioError;
use duplio_core::traits::{
    AudioFormat, LipSyncAdapter, ServiceAdapter, TtsAdapter, TtsChunk, TtsPreferences,
};
use duplio_core::types::{FaceModelHandle, HealthStatus, SynthesisUnit, VideoPayload, VoiceModelHandle};

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice_model: &'a str,
    provider: &'a str,
    sample_rate: u32,
    speaking_rate: f32,
}

#[derive(Debug, Deserialize)]
struct AudioData {
    data: String,
    #[serde(default = "default_format")]
    format: AudioFormat,
    sample_rate: u32,
}

fn default_format() -> AudioFormat {
    AudioFormat::Pcm16
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    audio: String,
    face_model: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    video: String,
    format: String,
}

/// SSE streaming client for one TTS endpoint.
pub struct HttpTtsAdapter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTtsAdapter {
    pub fn new(endpoint: String) -> Result<Self, DuplioError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DuplioError::Tts {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ServiceAdapter for HttpTtsAdapter {
    fn name(&self) -> &str {
        "tts"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        match self.client.head(&self.endpoint).send().await {
            Ok(response) if response.status().is_success() => Ok(HealthStatus::Healthy),
            Ok(response) => Ok(HealthStatus::Degraded(format!(
                "endpoint returned {}",
                response.status()
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl TtsAdapter for HttpTtsAdapter {
    async fn synthesize(
        &self,
        unit: &SynthesisUnit,
        voice: &VoiceModelHandle,
        prefs: &TtsPreferences,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<TtsChunk, DuplioError>> + Send>>, DuplioError>
    {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SynthesizeRequest {
                text: &unit.text,
                voice_model: &voice.0,
                provider: &prefs.provider,
                sample_rate: prefs.sample_rate,
                speaking_rate: prefs.speaking_rate,
            })
            .send()
            .await
            .map_err(|e| DuplioError::Tts {
                message: format!("synthesis request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DuplioError::Tts {
                message: format!("synthesizer returned {status}: {body}"),
                source: None,
            });
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|result| {
                let done = matches!(result, Ok(event) if event.event == "done");
                futures::future::ready(!done)
            })
            .filter_map(|result| async move {
                match result {
                    Ok(event) if event.event == "audio" => Some(
                        serde_json::from_str::<AudioData>(&event.data)
                            .map_err(|e| DuplioError::Tts {
                                message: format!("failed to parse audio event: {e}"),
                                source: Some(Box::new(e)),
                            })
                            .and_then(|audio| {
                                let data = STANDARD.decode(audio.data.as_bytes()).map_err(
                                    |e| DuplioError::Tts {
                                        message: format!("audio payload not base64: {e}"),
                                        source: Some(Box::new(e)),
                                    },
                                )?;
                                Ok(TtsChunk {
                                    data,
                                    format: audio.format,
                                    sample_rate: audio.sample_rate,
                                })
                            }),
                    ),
                    Ok(_) => None,
                    Err(e) => Some(Err(DuplioError::Tts {
                        message: format!("SSE stream error: {e}"),
                        source: None,
                    })),
                }
            });

        Ok(Box::pin(stream))
    }
}

/// Unary client for the lip-sync render endpoint.
pub struct HttpLipSyncAdapter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLipSyncAdapter {
    pub fn new(endpoint: String) -> Result<Self, DuplioError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DuplioError::LipSync(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ServiceAdapter for HttpLipSyncAdapter {
    fn name(&self) -> &str {
        "lipsync"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        match self.client.head(&self.endpoint).send().await {
            Ok(response) if response.status().is_success() => Ok(HealthStatus::Healthy),
            Ok(response) => Ok(HealthStatus::Degraded(format!(
                "endpoint returned {}",
                response.status()
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl LipSyncAdapter for HttpLipSyncAdapter {
    async fn render(
        &self,
        audio: &[u8],
        face: &FaceModelHandle,
    ) -> Result<VideoPayload, DuplioError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RenderRequest {
                audio: STANDARD.encode(audio),
                face_model: &face.0,
            })
            .send()
            .await
            .map_err(|e| DuplioError::LipSync(format!("render request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DuplioError::LipSync(format!("renderer returned {status}")));
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| DuplioError::LipSync(format!("render response malformed: {e}")))?;

        let data = STANDARD
            .decode(body.video.as_bytes())
            .map_err(|e| DuplioError::LipSync(format!("video payload not base64: {e}")))?;

        Ok(VideoPayload {
            data,
            format: body.format,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn unit() -> SynthesisUnit {
        SynthesisUnit {
            index: 0,
            text: "Hello.".into(),
        }
    }

    #[tokio::test]
    async fn synthesize_decodes_audio_events() {
        let payload = STANDARD.encode([1u8, 2, 3, 4]);
        let sse = format!(
            "event: audio\ndata: {{\"data\":\"{payload}\",\"sample_rate\":16000}}\n\n\
             event: done\ndata: {{}}\n\n"
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"text": "Hello."})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let adapter = HttpTtsAdapter::new(server.uri()).unwrap();
        let mut stream = adapter
            .synthesize(
                &unit(),
                &VoiceModelHandle("voice-1".into()),
                &TtsPreferences::default(),
            )
            .await
            .unwrap();

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.data, vec![1, 2, 3, 4]);
        assert_eq!(chunk.sample_rate, 16_000);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn synthesize_propagates_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = HttpTtsAdapter::new(server.uri()).unwrap();
        let result = adapter
            .synthesize(
                &unit(),
                &VoiceModelHandle("voice-1".into()),
                &TtsPreferences::default(),
            )
            .await;
        assert!(matches!(result, Err(DuplioError::Tts { .. })));
    }

    #[tokio::test]
    async fn render_round_trips_base64() {
        let video = STANDARD.encode([9u8, 9, 9]);
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"face_model": "face-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"video": video, "format": "h264"}),
            ))
            .mount(&server)
            .await;

        let adapter = HttpLipSyncAdapter::new(server.uri()).unwrap();
        let frame = adapter
            .render(&[1, 2], &FaceModelHandle("face-1".into()))
            .await
            .unwrap();
        assert_eq!(frame.data, vec![9, 9, 9]);
        assert_eq!(frame.format, "h264");
    }
}
