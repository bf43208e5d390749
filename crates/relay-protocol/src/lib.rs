mod types;
mod wire;

pub use types::{IngestAck, ProtocolError, SchemaVersion, Update, UpdateBatch};
pub use wire::{decode_batch, decode_payload, encode_payload, Payload};

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn bitcoin() -> Update {
        Update::new("btc", "BTC", "Bitcoin", 50_000.0)
    }

    #[test]
    fn payload_is_a_bare_json_array() {
        let batch = UpdateBatch::new(vec![bitcoin()]);
        let payload = encode_payload(&batch).expect("encode");
        let value: Value = serde_json::from_str(payload.as_str()).expect("json");

        let array = value.as_array().expect("array");
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["id"], "btc");
        assert_eq!(array[0]["current_price"], 50_000.0);
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let payload = encode_payload(&UpdateBatch::new(vec![bitcoin()])).expect("encode");
        assert!(!payload.as_str().contains("image"));
        assert!(!payload.as_str().contains("price_change_24h"));
    }

    #[test]
    fn present_optionals_are_emitted() {
        let update = bitcoin()
            .with_image("https://assets.example/btc.png")
            .with_price_change_24h(2.5);
        let payload = encode_payload(&UpdateBatch::new(vec![update])).expect("encode");
        let value: Value = serde_json::from_str(payload.as_str()).expect("json");

        assert_eq!(value[0]["image"], "https://assets.example/btc.png");
        assert_eq!(value[0]["price_change_24h"], 2.5);
    }

    #[test]
    fn batch_accepts_camel_case_producer_fields() {
        let raw = br#"{"updates":[{"id":"eth","symbol":"ETH","name":"Ethereum","currentPrice":3000.5,"priceChange24h":-1.25}]}"#;
        let batch = decode_batch(raw).expect("decode");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.updates[0].current_price, 3000.5);
        assert_eq!(batch.updates[0].price_change_24h, Some(-1.25));
        assert_eq!(batch.schema_version(), Some(SchemaVersion::V2));
    }

    #[test]
    fn legacy_update_reads_zero_values() {
        let raw = br#"{"updates":[{"id":"btc","symbol":"BTC","name":"Bitcoin","current_price":1.0}]}"#;
        let batch = decode_batch(raw).expect("decode");
        let update = &batch.updates[0];
        assert_eq!(update.image_or_empty(), "");
        assert_eq!(update.price_change_24h_or_zero(), 0.0);
        assert_eq!(update.schema_version(), SchemaVersion::V1);
    }

    #[test]
    fn missing_updates_field_is_an_empty_batch() {
        let batch = decode_batch(b"{}").expect("decode");
        assert!(batch.is_empty());
        assert_eq!(batch.schema_version(), None);
    }

    #[test]
    fn payload_preserves_producer_order() {
        let batch = UpdateBatch::new(vec![
            Update::new("sol", "SOL", "Solana", 150.0),
            bitcoin(),
            Update::new("ada", "ADA", "Cardano", 0.4),
        ]);
        let payload = encode_payload(&batch).expect("encode");
        let decoded = decode_payload(payload.as_str()).expect("decode");
        let ids: Vec<&str> = decoded.iter().map(|update| update.id.as_str()).collect();
        assert_eq!(ids, ["sol", "btc", "ada"]);
    }

    #[test]
    fn validate_rejects_non_finite_price() {
        let batch = UpdateBatch::new(vec![Update::new("x", "X", "X", f64::NAN)]);
        assert!(matches!(
            batch.validate(),
            Err(ProtocolError::NonFinite {
                field: "current_price",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_blank_symbol() {
        let batch = UpdateBatch::new(vec![bitcoin(), Update::new("y", " ", "Y", 1.0)]);
        assert!(matches!(
            batch.validate(),
            Err(ProtocolError::MissingField {
                index: 1,
                field: "symbol"
            })
        ));
    }

    #[test]
    fn cloned_payload_shares_storage() {
        let payload = Payload::from_text("[]");
        let clone = payload.clone();
        assert!(payload.ptr_eq(&clone));
        assert_eq!(format!("{payload:?}"), "Payload { len: 2 }");
    }
}
