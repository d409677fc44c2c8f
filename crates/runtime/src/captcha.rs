//! Captcha detection policy.
//!
//! Passive evidence — a recaptcha badge iframe with no challenge — must
//! never gate progress, whatever its confidence. Interactive evidence
//! (text or selector hits) above the confidence floor applies the
//! configured policy. No solver ships here; `Callback` hands the wait to
//! the embedder.

use std::sync::Arc;

use async_trait::async_trait;

use stepgate_core_types::CaptchaDiagnostics;

/// Embedder-supplied handler polled while an interactive challenge is up.
///
/// Return `true` once the handler believes the challenge is dealt with;
/// the runtime re-snapshots to confirm.
#[async_trait]
pub trait CaptchaHandler: Send + Sync {
    async fn attempt(&self, diagnostics: &CaptchaDiagnostics) -> bool;
}

/// What to do when an interactive captcha gates the step.
#[derive(Clone)]
pub enum CaptchaPolicy {
    /// Fail the step with a `CaptchaAbort` error.
    Abort,
    /// Poll the handler until the challenge clears or the wait budget
    /// expires.
    Callback(Arc<dyn CaptchaHandler>),
}

impl std::fmt::Debug for CaptchaPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptchaPolicy::Abort => f.write_str("Abort"),
            CaptchaPolicy::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Tuning for the gate. Thresholds are hand-tuned; keep them
/// configuration until telemetry says otherwise.
#[derive(Clone, Debug)]
pub struct CaptchaOptions {
    pub policy: CaptchaPolicy,
    /// Interactive evidence below this confidence is ignored.
    pub min_confidence: f64,
    pub poll_ms: u64,
    pub timeout_ms: u64,
}

impl Default for CaptchaOptions {
    fn default() -> Self {
        Self {
            policy: CaptchaPolicy::Abort,
            min_confidence: 0.5,
            poll_ms: 2_000,
            timeout_ms: 120_000,
        }
    }
}

impl CaptchaOptions {
    pub fn with_policy(mut self, policy: CaptchaPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// True when these diagnostics should gate the step: detected,
    /// confident enough, and backed by evidence that actually blocks the
    /// user.
    pub fn gates(&self, diagnostics: &CaptchaDiagnostics) -> bool {
        if !diagnostics.detected {
            return false;
        }
        if diagnostics.evidence.is_passive_only() {
            return false;
        }
        diagnostics.evidence.has_interactive_hits() && diagnostics.confidence >= self.min_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgate_core_types::CaptchaEvidence;

    fn diagnostics(confidence: f64, evidence: CaptchaEvidence) -> CaptchaDiagnostics {
        CaptchaDiagnostics {
            detected: true,
            confidence,
            provider_hint: None,
            evidence,
        }
    }

    #[test]
    fn passive_evidence_never_gates() {
        let options = CaptchaOptions::default();
        let passive = diagnostics(
            0.99,
            CaptchaEvidence {
                iframe_src_hits: vec!["recaptcha/api2/anchor".into()],
                ..CaptchaEvidence::default()
            },
        );
        assert!(!options.gates(&passive));
    }

    #[test]
    fn interactive_evidence_gates_above_floor() {
        let options = CaptchaOptions::default();
        let interactive = diagnostics(
            0.95,
            CaptchaEvidence {
                text_hits: vec!["I'm not a robot".into()],
                ..CaptchaEvidence::default()
            },
        );
        assert!(options.gates(&interactive));

        let weak = diagnostics(
            0.2,
            CaptchaEvidence {
                text_hits: vec!["robot?".into()],
                ..CaptchaEvidence::default()
            },
        );
        assert!(!options.gates(&weak));
    }

    #[test]
    fn undetected_diagnostics_never_gate() {
        let options = CaptchaOptions::default();
        let mut diag = diagnostics(
            0.9,
            CaptchaEvidence {
                text_hits: vec!["verify".into()],
                ..CaptchaEvidence::default()
            },
        );
        diag.detected = false;
        assert!(!options.gates(&diag));
    }
}
