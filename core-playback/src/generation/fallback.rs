//! Network-first speech generation with on-device fallback.

use crate::error::{PlaybackError, Result};
use crate::generation::{
    generation_channel, GenerationEvent, GenerationEvents, GenerationRequest, GenerationResult,
    GenerationSink,
};
use crate::models::{CacheKey, VoiceFamily};
use crate::traits::{SpeechEngine, SpeechGenerator};
use async_trait::async_trait;
use core_async::sync::CancellationToken;
use core_async::time::timeout;
use futures::future::join;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Tries the network engine first and switches to the device engine on any
/// failure other than cancellation.
///
/// Device output is keyed with [`VoiceFamily::Device`], so the two renditions
/// of a chapter never share a cache entry.
pub struct FallbackSpeechGenerator {
    network: Arc<dyn SpeechEngine>,
    device: Arc<dyn SpeechEngine>,
    network_timeout: Duration,
}

impl FallbackSpeechGenerator {
    pub fn new(
        network: Arc<dyn SpeechEngine>,
        device: Arc<dyn SpeechEngine>,
        network_timeout: Duration,
    ) -> Self {
        Self {
            network,
            device,
            network_timeout,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_engine(
        &self,
        engine: &Arc<dyn SpeechEngine>,
        request: &GenerationRequest,
        key: &CacheKey,
        events: &GenerationSink,
        cancel: &CancellationToken,
        limit: Option<Duration>,
        quick_started: bool,
    ) -> (Result<GenerationResult>, bool) {
        let (tx, rx) = generation_channel();

        let synthesis = {
            let engine = Arc::clone(engine);
            let request = request.clone();
            let key = key.clone();
            let cancel = cancel.clone();
            async move {
                let work = engine.synthesize(&request, &key, &tx, &cancel);
                let result = match limit {
                    Some(limit) => match timeout(limit, work).await {
                        Ok(result) => result,
                        Err(_) => Err(PlaybackError::GenerationTimeout(limit)),
                    },
                    None => work.await,
                };
                drop(tx);
                result
            }
        };

        let (result, quick_started) =
            join(synthesis, relay(rx, events.clone(), quick_started)).await;

        let result = result.map(|mut result| {
            // Output is always filed under the key this generator chose.
            result.key = key.clone();
            result.manifest.key = key.clone();
            result
        });
        (result, quick_started)
    }
}

/// Forwards engine events, turning any quick-start after the first into a
/// progressive update. Returns whether a quick-start has been forwarded.
async fn relay(mut rx: GenerationEvents, out: GenerationSink, mut quick_started: bool) -> bool {
    while let Some(event) = rx.recv().await {
        let event = match event {
            GenerationEvent::QuickStart(result) if quick_started => {
                GenerationEvent::ProgressiveUpdate(result.into())
            }
            GenerationEvent::QuickStart(result) => {
                quick_started = true;
                GenerationEvent::QuickStart(result)
            }
            other => other,
        };

        if out.send(event).is_err() {
            debug!("Generation listener dropped; discarding event");
        }
    }
    quick_started
}

#[async_trait]
impl SpeechGenerator for FallbackSpeechGenerator {
    #[instrument(skip(self, request, events, cancel), fields(chapter = %request.chapter.id))]
    async fn generate_progressive(
        &self,
        request: GenerationRequest,
        events: GenerationSink,
        cancel: CancellationToken,
    ) -> Result<GenerationResult> {
        let network_key = request.chapter.cache_key(self.network.family(), request.rate);

        let (network_result, quick_started) = self
            .run_engine(
                &self.network,
                &request,
                &network_key,
                &events,
                &cancel,
                Some(self.network_timeout),
                false,
            )
            .await;

        let network_error = match network_result {
            Ok(result) => {
                info!(key = %result.key, "Network generation completed");
                return Ok(result);
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                return Err(PlaybackError::Cancelled);
            }
            Err(e) => e,
        };

        warn!(error = %network_error, "Network voice failed, switching to device voice");
        let device_key = network_key.with_family(VoiceFamily::Device);
        events
            .send(GenerationEvent::SourceChanged {
                from: network_key.family,
                to: device_key.family,
                reason: network_error.to_string(),
            })
            .ok();

        let (device_result, _) = self
            .run_engine(
                &self.device,
                &request,
                &device_key,
                &events,
                &cancel,
                None,
                quick_started,
            )
            .await;

        match device_result {
            Ok(result) => {
                info!(key = %result.key, "Device generation completed");
                Ok(result)
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => Err(PlaybackError::Cancelled),
            Err(device_error) => Err(PlaybackError::GenerationFailed(format!(
                "network voice: {}; device voice: {}",
                network_error, device_error
            ))),
        }
    }
}
