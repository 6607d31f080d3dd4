use super::checkout;
use crate::clients::{ComposeReviewService, ServicePool};
use crate::errors::Result;
use crate::latency::ExtraLatency;
use crate::trace::{Carrier, Tracer};

/// Forwards review text to the compose-review service.
pub struct TextHandler {
    compose_review: ServicePool<dyn ComposeReviewService>,
    tracer: Tracer,
    latency: ExtraLatency,
}

impl TextHandler {
    pub fn new(
        compose_review: ServicePool<dyn ComposeReviewService>,
        tracer: Tracer,
        latency: ExtraLatency,
    ) -> Self {
        Self {
            compose_review,
            tracer,
            latency,
        }
    }

    pub async fn upload_text(&self, req_id: i64, text: &str, carrier: &Carrier) -> Result<()> {
        self.latency.apply(req_id).await;

        let parent = self.tracer.extract(carrier);
        let span = self.tracer.start_span("UploadText", parent.as_ref());

        let client = checkout(&self.compose_review)?;
        client
            .upload_text(req_id, text, self.tracer.inject(&span))
            .await
            .inspect_err(|e| {
                tracing::error!(req_id, error = %e, "Failed to upload text to compose-review-service");
            })?;
        drop(client);

        span.finish();
        Ok(())
    }
}
