//! Topic layout for one thing and its named shadow

use crate::config::IotSection;

/// What an inbound topic carries, decided by its suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    DeviceStatus,
    ShadowUpdateDocuments,
    ShadowGetAccepted,
    ShadowGetRejected,
}

/// Every topic the console subscribes or publishes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub status: String,
    pub shadow_update_documents: String,
    pub shadow_get_accepted: String,
    pub shadow_get_rejected: String,
    pub shadow_get: String,
    pub command_call: String,
}

impl TopicSet {
    pub fn new(namespace: &str, shadow_prefix: &str, thing: &str, shadow: &str) -> Self {
        let shadow_root = format!("{shadow_prefix}/{thing}/shadow/name/{shadow}");
        Self {
            status: format!("{namespace}/{thing}/status"),
            shadow_update_documents: format!("{shadow_root}/update/documents"),
            shadow_get_accepted: format!("{shadow_root}/get/accepted"),
            shadow_get_rejected: format!("{shadow_root}/get/rejected"),
            shadow_get: format!("{shadow_root}/get"),
            command_call: format!("{namespace}/{thing}/cmd/call"),
        }
    }

    pub fn from_iot(iot: &IotSection) -> Self {
        Self::new(
            &iot.topic_namespace,
            &iot.shadow_topic_prefix,
            &iot.thing_name,
            &iot.shadow_name,
        )
    }

    /// The fixed subscription set, in subscribe order
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.status.clone(),
            self.shadow_update_documents.clone(),
            self.shadow_get_accepted.clone(),
            self.shadow_get_rejected.clone(),
        ]
    }
}

/// Classify an inbound topic by suffix
pub fn classify_topic(topic: &str) -> Option<TopicKind> {
    if topic.ends_with("/status") {
        Some(TopicKind::DeviceStatus)
    } else if topic.ends_with("/get/accepted") {
        Some(TopicKind::ShadowGetAccepted)
    } else if topic.ends_with("/update/documents") {
        Some(TopicKind::ShadowUpdateDocuments)
    } else if topic.ends_with("/get/rejected") {
        Some(TopicKind::ShadowGetRejected)
    } else {
        None
    }
}
