//! Default retry classification.

use switchyard_core::{Fault, FaultKind};

use super::traits::RetryClassifier;

/// Treats transport failures and unavailable services as retryable and
/// everything else as final.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportFaultClassifier;

impl RetryClassifier for TransportFaultClassifier {
    fn is_retryable(&self, fault: &Fault) -> bool {
        matches!(
            fault.kind(),
            FaultKind::Transport | FaultKind::ServiceUnavailable
        )
    }
}
