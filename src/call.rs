use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::NegotiatorConfig;
use crate::error::StoreError;
use crate::peer::state::Role;
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::relay::{CollectionPath, Document, DocumentPath, Fields};

/// The rendezvous document of one call
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

impl CallRecord {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        serde_json::from_value(Value::Object(doc.fields.clone())).map_err(|e| {
            StoreError::Malformed {
                path: doc.path.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Fields for the first write of a call record
pub fn offer_fields(offer: &SessionDescription) -> Fields {
    single_field("offer", offer)
}

/// Fields for the callee's update of a call record
pub fn answer_fields(answer: &SessionDescription) -> Fields {
    single_field("answer", answer)
}

fn single_field(name: &str, desc: &SessionDescription) -> Fields {
    let mut fields = Fields::new();
    fields.insert(
        name.to_string(),
        serde_json::json!({ "type": desc.sdp_type, "sdp": desc.sdp }),
    );
    fields
}

pub fn candidate_fields(candidate: &IceCandidate) -> Fields {
    match serde_json::to_value(candidate) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut fields = Fields::new();
            fields.insert("candidate".into(), Value::String(candidate.candidate.clone()));
            fields
        }
    }
}

pub fn candidate_from_document(doc: &Document) -> Result<IceCandidate, StoreError> {
    serde_json::from_value(Value::Object(doc.fields.clone())).map_err(|e| StoreError::Malformed {
        path: doc.path.to_string(),
        reason: e.to_string(),
    })
}

/// Store locations belonging to one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPaths {
    pub record: DocumentPath,
    pub offer_candidates: CollectionPath,
    pub answer_candidates: CollectionPath,
}

impl CallPaths {
    pub fn new(record: DocumentPath, config: &NegotiatorConfig) -> Self {
        Self {
            offer_candidates: record.collection(&config.offer_candidates),
            answer_candidates: record.collection(&config.answer_candidates),
            record,
        }
    }

    pub fn for_id(call_id: &str, config: &NegotiatorConfig) -> Self {
        Self::new(calls_collection(config).doc(call_id), config)
    }

    pub fn call_id(&self) -> &str {
        self.record.id()
    }

    /// Mailbox this side writes its candidates to
    pub fn outbox(&self, role: Role) -> &CollectionPath {
        match role {
            Role::Caller => &self.offer_candidates,
            Role::Callee => &self.answer_candidates,
        }
    }
}

pub fn calls_collection(config: &NegotiatorConfig) -> CollectionPath {
    CollectionPath::root(config.calls_collection.clone())
}

/// Trims a user-supplied call id; `None` when empty or not a single path
/// segment
pub fn normalize_call_id(raw: &str) -> Option<&str> {
    let id = raw.trim();
    if id.is_empty() || id.contains('/') || id.chars().any(char::is_whitespace) {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> Document {
        Document {
            path: CollectionPath::root("calls").doc("c1"),
            fields: match fields {
                Value::Object(map) => map,
                _ => Fields::new(),
            },
        }
    }

    #[test]
    fn record_with_offer_only() {
        let record = CallRecord::from_document(&doc(json!({
            "offer": {"type": "offer", "sdp": "v=0"}
        })))
        .unwrap();
        assert_eq!(record.offer, Some(SessionDescription::offer("v=0")));
        assert!(record.answer.is_none());
    }

    #[test]
    fn malformed_record_is_reported() {
        let err = CallRecord::from_document(&doc(json!({"offer": 7}))).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { ref path, .. } if path == "calls/c1"));
    }

    #[test]
    fn answer_fields_shape() {
        let fields = answer_fields(&SessionDescription::answer("v=1"));
        assert_eq!(
            Value::Object(fields),
            json!({"answer": {"type": "answer", "sdp": "v=1"}})
        );
    }

    #[test]
    fn candidate_fields_round_trip_through_document() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 9 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let stored = doc(Value::Object(candidate_fields(&candidate)));
        assert_eq!(stored.fields["sdpMLineIndex"], json!(0));
        assert_eq!(candidate_from_document(&stored).unwrap(), candidate);
    }

    #[test]
    fn paths_follow_config() {
        let config = NegotiatorConfig::default();
        let paths = CallPaths::for_id("abc123", &config);
        assert_eq!(paths.record.to_string(), "calls/abc123");
        assert_eq!(paths.offer_candidates.as_str(), "calls/abc123/offerCandidates");
        assert_eq!(paths.answer_candidates.as_str(), "calls/abc123/answerCandidates");
        assert_eq!(paths.call_id(), "abc123");
        assert_eq!(paths.outbox(Role::Caller), &paths.offer_candidates);
        assert_eq!(paths.outbox(Role::Callee), &paths.answer_candidates);
    }

    #[test]
    fn call_id_normalization() {
        assert_eq!(normalize_call_id("  abc123 "), Some("abc123"));
        assert_eq!(normalize_call_id(""), None);
        assert_eq!(normalize_call_id("   "), None);
        assert_eq!(normalize_call_id("a/b"), None);
        assert_eq!(normalize_call_id("a b"), None);
    }
}
