//! Pure MQTT option construction for a signed WebSocket connection

use crate::signing::SignedConnectionDescriptor;
use crate::transport::{ConnectOptions, TransportError};
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use url::Url;

/// WebSocket port; rumqttc takes host and port from the `wss://` URL
pub const WSS_PORT: u16 = 443;

/// Build rumqttc options for a presigned `wss://` URL
pub fn configure_mqtt_options(
    descriptor: &SignedConnectionDescriptor,
    options: &ConnectOptions,
) -> Result<MqttOptions, TransportError> {
    let url = Url::parse(&descriptor.full_url)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", descriptor.host)))?;
    if url.scheme() != "wss" {
        return Err(TransportError::InvalidUrl(format!(
            "expected wss scheme, got {}",
            url.scheme()
        )));
    }
    if url.host_str() != Some(descriptor.host.as_str()) {
        return Err(TransportError::InvalidUrl(format!(
            "descriptor host {} does not match URL",
            descriptor.host
        )));
    }

    let port = url.port().unwrap_or(WSS_PORT);
    let mut mqtt_options =
        MqttOptions::new(options.client_id.clone(), descriptor.full_url.clone(), port);
    mqtt_options.set_transport(RumqttcTransport::wss_with_default_config());
    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_session(options.clean_session);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_descriptor, sample_options};
    use std::time::Duration;

    #[test]
    fn test_options_from_descriptor() {
        let mut options = sample_options();
        options.keep_alive = Duration::from_secs(30);
        options.clean_session = false;

        let mqtt = configure_mqtt_options(&sample_descriptor(), &options).unwrap();

        assert_eq!(mqtt.client_id(), options.client_id);
        assert_eq!(mqtt.keep_alive(), Duration::from_secs(30));
        assert!(!mqtt.clean_session());
        assert_eq!(mqtt.broker_address().1, WSS_PORT);
    }

    #[test]
    fn test_rejects_non_wss_url() {
        let mut descriptor = sample_descriptor();
        descriptor.full_url = descriptor.full_url.replacen("wss://", "https://", 1);

        let result = configure_mqtt_options(&descriptor, &sample_options());
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[test]
    fn test_rejects_host_mismatch() {
        let mut descriptor = sample_descriptor();
        descriptor.host = "other.example.com".to_string();

        let result = configure_mqtt_options(&descriptor, &sample_options());
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }
}
