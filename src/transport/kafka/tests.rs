use super::*;

fn config() -> KafkaTransportConfig {
    KafkaTransportConfig::new("localhost:9092", "worker-jsonata", "worker-jsonata")
}

#[test]
fn test_producer_config_requires_full_acks() {
    let client = config().build_producer_config();
    assert_eq!(client.get("bootstrap.servers"), Some("localhost:9092"));
    assert_eq!(client.get("client.id"), Some("worker-jsonata"));
    assert_eq!(client.get("acks"), Some("all"));
    assert_eq!(client.get("enable.idempotence"), Some("true"));
}

#[test]
fn test_consumer_config_commits_manually_from_latest() {
    let client = config().build_consumer_config();
    assert_eq!(client.get("group.id"), Some("worker-jsonata"));
    assert_eq!(client.get("enable.auto.commit"), Some("false"));
    assert_eq!(client.get("auto.offset.reset"), Some("latest"));
}

#[test]
fn test_sasl_config() {
    let config = config().with_sasl("user", "pass", "SCRAM-SHA-256");
    assert_eq!(config.sasl_username, Some("user".to_string()));
    assert_eq!(config.sasl_password, Some("pass".to_string()));
    assert_eq!(config.security_protocol, Some("SASL_SSL".to_string()));

    let client = config.build_consumer_config();
    assert_eq!(client.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
    assert_eq!(client.get("security.protocol"), Some("SASL_SSL"));
}

#[test]
fn test_ssl_config() {
    let config = config()
        .with_security_protocol("SSL")
        .with_ssl_ca("/path/to/ca.crt");
    let client = config.build_producer_config();
    assert_eq!(client.get("security.protocol"), Some("SSL"));
    assert_eq!(client.get("ssl.ca.location"), Some("/path/to/ca.crt"));
    assert_eq!(client.get("sasl.username"), None);
}

#[test]
fn test_headers_convert_to_kafka_and_back() {
    let mut headers = Headers::new();
    headers.insert("x-request-id".to_string(), b"req-1".to_vec());
    headers.insert("trace".to_string(), b"abc".to_vec());

    let owned = to_owned_headers(&headers);
    assert_eq!(owned.count(), 2);

    let back = from_kafka_headers(Some(&owned));
    assert_eq!(back, headers);
}

#[test]
fn test_duplicate_kafka_headers_keep_last() {
    let owned = OwnedHeaders::new()
        .insert(Header {
            key: "k",
            value: Some("first"),
        })
        .insert(Header {
            key: "k",
            value: Some("second"),
        });

    let map = from_kafka_headers(Some(&owned));
    assert_eq!(map.get("k"), Some(&b"second".to_vec()));
}

#[test]
fn test_missing_headers_yield_empty_map() {
    assert!(from_kafka_headers::<OwnedHeaders>(None).is_empty());
}
