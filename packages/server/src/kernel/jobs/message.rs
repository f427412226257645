use serde::{Deserialize, Serialize};

use crate::common::DiscoveryJobId;

/// Body of a discovery queue message. The queue's own message id is separate
/// from `discovery_id`; the mapping is kept in the record's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryMessage {
    pub discovery_id: DiscoveryJobId,
    pub hashtag: String,
    pub limit: i32,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_camel_case() {
        let msg = DiscoveryMessage {
            discovery_id: DiscoveryJobId::new(),
            hashtag: "cats".into(),
            limit: 5,
            source: "hashtag:cats".into(),
            requested_by: None,
            metadata: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("discoveryId").is_some());
        assert!(json.get("requestedBy").is_none());
        let back: DiscoveryMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
