use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use services::{Ack, SubmissionClient, SubmissionError, SubmissionRequest};
use tracing::info;

/// Accepts every submission and logs it instead of calling an endpoint.
#[derive(Debug, Default)]
pub struct DryRunClient {
    accepted: AtomicUsize,
}

impl DryRunClient {
    #[cfg(test)]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SubmissionClient for DryRunClient {
    async fn submit(&self, request: &SubmissionRequest) -> Result<Ack, SubmissionError> {
        let count = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        let mut answers: Vec<_> = request.answers.iter().collect();
        answers.sort_unstable();
        info!(
            quiz_id = %request.quiz_id,
            submitted_at = %request.submitted_at,
            ?answers,
            count,
            "dry run: submission accepted"
        );
        Ok(Ack {
            quiz_id: request.quiz_id,
        })
    }
}
