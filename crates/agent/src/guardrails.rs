use navigator_core::domain::agent::AgentId;
use navigator_core::domain::safety::{CrisisResources, SafetyVerdict, VerdictOutcome};
use navigator_core::domain::turn::Turn;

use crate::safety::{
    CrisisDetector, PiiRedactor, PiiScope, ResponseSafetyChecker, SafetyContext, SafetyValidator,
    TopicRelevanceClassifier, PRIVACY_NOTICE, SAFE_FALLBACK_REPLY, TOPIC_REDIRECT_MESSAGE,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Text that may continue downstream.
    Proceed { text: String },
    Intercept { reason_code: String, user_message: String },
    Escalate { reason_code: String, user_message: String },
}

impl GateDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed { .. })
    }
}

#[derive(Clone, Debug)]
pub struct PreTurnOutcome {
    pub decision: GateDecision,
    pub verdicts: Vec<SafetyVerdict>,
    /// Redacted form of the user text. The only form ever written to a turn.
    pub recorded_text: String,
    /// Raw text, present only when redaction changed it.
    pub private_original: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PostTurnOutcome {
    pub decision: GateDecision,
    pub verdicts: Vec<SafetyVerdict>,
}

/// Runs the validators in their fixed order around every agent turn.
#[derive(Clone, Debug)]
pub struct SafetyGate {
    crisis: CrisisDetector,
    pii: PiiRedactor,
    relevance: TopicRelevanceClassifier,
    response: ResponseSafetyChecker,
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(CrisisResources::default())
    }
}

impl SafetyGate {
    pub fn new(crisis_resources: CrisisResources) -> Self {
        Self {
            crisis: CrisisDetector::new(crisis_resources),
            pii: PiiRedactor::new(),
            relevance: TopicRelevanceClassifier::new(),
            response: ResponseSafetyChecker::new(),
        }
    }

    pub fn redactor(&self) -> &PiiRedactor {
        &self.pii
    }

    pub fn crisis_resources(&self) -> &CrisisResources {
        self.crisis.resources()
    }

    /// Crisis detection alone, for text that is refused before the full gate runs.
    pub fn signals_crisis(&self, text: &str) -> bool {
        let context = SafetyContext::inbound(AgentId::Triage);
        self.crisis.evaluate(text, &context).outcome == VerdictOutcome::Escalate
    }

    /// Crisis on the raw text, then PII, then topic relevance on the redacted text.
    pub fn pre_turn(&self, text: &str, current_agent: AgentId) -> PreTurnOutcome {
        let context = SafetyContext::inbound(current_agent);
        let redaction = self.pii.redact(text, PiiScope::All, &[]);
        let recorded_text = redaction.text.clone();
        let private_original = redaction.changed().then(|| text.to_string());
        let mut verdicts = Vec::with_capacity(3);

        let crisis = self.crisis.evaluate(text, &context);
        let escalated = crisis.outcome == VerdictOutcome::Escalate;
        let crisis_message = crisis.remediation_text().map(str::to_string);
        let crisis_reason = crisis.reason_code.clone();
        verdicts.push(crisis);
        if escalated {
            return PreTurnOutcome {
                decision: GateDecision::Escalate {
                    reason_code: crisis_reason,
                    user_message: crisis_message
                        .unwrap_or_else(|| self.crisis.resources().payload()),
                },
                verdicts,
                recorded_text,
                private_original,
            };
        }

        let pii = self.pii.evaluate(text, &context);
        let blocked = pii.reason_code == "redaction_insufficient";
        verdicts.push(pii);
        if blocked {
            return PreTurnOutcome {
                decision: GateDecision::Intercept {
                    reason_code: "redaction_insufficient".to_string(),
                    user_message: PRIVACY_NOTICE.to_string(),
                },
                verdicts,
                recorded_text,
                private_original,
            };
        }

        let relevance = self.relevance.evaluate(&recorded_text, &context);
        let off_topic = !relevance.is_pass();
        let relevance_reason = relevance.reason_code.clone();
        verdicts.push(relevance);
        let decision = if off_topic {
            GateDecision::Intercept {
                reason_code: relevance_reason,
                user_message: TOPIC_REDIRECT_MESSAGE.to_string(),
            }
        } else {
            GateDecision::Proceed { text: recorded_text.clone() }
        };

        PreTurnOutcome { decision, verdicts, recorded_text, private_original }
    }

    /// Outbound PII redaction, then response safety on what would be released.
    pub fn post_turn(
        &self,
        draft: &str,
        current_agent: AgentId,
        known_identifiers: &[String],
    ) -> PostTurnOutcome {
        let context = SafetyContext::outbound(current_agent, known_identifiers);
        let mut verdicts = Vec::with_capacity(2);

        let redaction = self.pii.redact(draft, PiiScope::Outbound, known_identifiers);
        verdicts.push(self.pii.evaluate(draft, &context));
        if redaction.is_insufficient() {
            return PostTurnOutcome {
                decision: GateDecision::Intercept {
                    reason_code: "redaction_insufficient".to_string(),
                    user_message: SAFE_FALLBACK_REPLY.to_string(),
                },
                verdicts,
            };
        }

        let response = self.response.evaluate(&redaction.text, &context);
        let decision = if response.is_pass() {
            GateDecision::Proceed { text: redaction.text }
        } else {
            GateDecision::Intercept {
                reason_code: response.reason_code.clone(),
                user_message: SAFE_FALLBACK_REPLY.to_string(),
            }
        };
        verdicts.push(response);

        PostTurnOutcome { decision, verdicts }
    }

    /// Identifiers the user disclosed in earlier turns of the session.
    pub fn disclosed_identifiers(&self, turns: &[Turn]) -> Vec<String> {
        let mut identifiers: Vec<String> = turns
            .iter()
            .filter_map(|turn| turn.private_original.as_ref())
            .flat_map(|original| self.pii.identifiers_in(original.expose()))
            .collect();
        identifiers.sort();
        identifiers.dedup();
        identifiers
    }
}

#[cfg(test)]
mod tests {
    use navigator_core::domain::agent::AgentId;
    use navigator_core::domain::safety::{ValidatorKind, VerdictOutcome};

    use super::{GateDecision, SafetyGate};
    use crate::safety::{PRIVACY_NOTICE, SAFE_FALLBACK_REPLY};

    #[test]
    fn crisis_short_circuits_remaining_validators() {
        let gate = SafetyGate::default();
        let outcome = gate.pre_turn("I want to kill myself", AgentId::FacilitySearch);

        assert_eq!(outcome.verdicts.len(), 1);
        assert_eq!(outcome.verdicts[0].validator, ValidatorKind::Crisis);
        match outcome.decision {
            GateDecision::Escalate { user_message, .. } => {
                assert_eq!(user_message, gate.crisis_resources().payload());
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[test]
    fn crisis_signals_are_found_anywhere_in_long_text() {
        let gate = SafetyGate::default();
        let long = format!("{} I want to kill myself", "detox ".repeat(800));

        assert!(gate.signals_crisis(&long));
        assert!(!gate.signals_crisis(&"detox ".repeat(800)));
    }

    #[test]
    fn crisis_text_is_still_recorded_redacted() {
        let gate = SafetyGate::default();
        let outcome =
            gate.pre_turn("my name is Jane Doe and I want to end my life", AgentId::Triage);

        assert!(matches!(outcome.decision, GateDecision::Escalate { .. }));
        assert!(!outcome.recorded_text.contains("Jane"));
        assert!(outcome.private_original.is_some());
    }

    #[test]
    fn redacted_text_flows_downstream() {
        let gate = SafetyGate::default();
        let outcome = gate.pre_turn(
            "My name is Jane Doe, phone 555-111-2222, I need outpatient care",
            AgentId::Triage,
        );

        assert_eq!(
            outcome.decision,
            GateDecision::Proceed {
                text: "My name is [REDACTED], phone [REDACTED], I need outpatient care"
                    .to_string()
            }
        );
        assert_eq!(
            outcome.private_original.as_deref(),
            Some("My name is Jane Doe, phone 555-111-2222, I need outpatient care")
        );
        assert_eq!(outcome.verdicts[1].outcome, VerdictOutcome::Intercept);
    }

    #[test]
    fn identifier_only_message_is_blocked_with_privacy_notice() {
        let gate = SafetyGate::default();
        let outcome = gate.pre_turn("my email is jane@example.com", AgentId::Triage);

        match outcome.decision {
            GateDecision::Intercept { reason_code, user_message } => {
                assert_eq!(reason_code, "redaction_insufficient");
                assert_eq!(user_message, PRIVACY_NOTICE);
            }
            other => panic!("expected intercept, got {other:?}"),
        }
    }

    #[test]
    fn unsafe_drafts_are_intercepted_after_outbound_redaction() {
        let gate = SafetyGate::default();
        let known = vec!["XQH4481923".to_string()];

        let released = gate.post_turn(
            "Member XQH4481923 is covered at Peachtree Recovery Center, (404) 555-0142.",
            AgentId::InsuranceVerification,
            &known,
        );
        match released.decision {
            GateDecision::Proceed { text } => {
                assert!(!text.contains("XQH4481923"));
                assert!(text.contains("(404) 555-0142"));
            }
            other => panic!("expected release, got {other:?}"),
        }

        let blocked =
            gate.post_turn("You should stop taking your medication.", AgentId::Triage, &[]);
        assert_eq!(
            blocked.decision,
            GateDecision::Intercept {
                reason_code: "medication_instruction".to_string(),
                user_message: SAFE_FALLBACK_REPLY.to_string(),
            }
        );
    }
}
