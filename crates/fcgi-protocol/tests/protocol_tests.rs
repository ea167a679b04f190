//! Protocol layer tests: record framing, name/value streams, typed bodies.

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use fcgi_protocol::params::{decode_pairs, encode_pairs};
    use fcgi_protocol::record::{HEADER_LEN, MAX_CONTENT_LEN};
    use fcgi_protocol::*;
    use proptest::prelude::*;

    fn record_type_strategy() -> impl Strategy<Value = RecordType> {
        prop_oneof![
            Just(RecordType::BeginRequest),
            Just(RecordType::AbortRequest),
            Just(RecordType::EndRequest),
            Just(RecordType::Params),
            Just(RecordType::Stdin),
            Just(RecordType::Stdout),
            Just(RecordType::Stderr),
            Just(RecordType::GetValues),
            (12u8..=255).prop_map(RecordType::Other),
        ]
    }

    // ─────────────────────────────────────────────────────────────────────
    // Record framing
    // ─────────────────────────────────────────────────────────────────────

    proptest! {
        #[test]
        fn record_roundtrip(
            record_type in record_type_strategy(),
            request_id in any::<u16>(),
            payload in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let record = Record::new(record_type, request_id, payload).unwrap();
            let bytes = record.to_bytes();
            prop_assert_eq!(bytes.len() % 8, 0);
            prop_assert_eq!(bytes.len(), record.encoded_len());

            let mut buf = BytesMut::from(&bytes[..]);
            let decoded = Record::decode(&mut buf).unwrap();
            prop_assert_eq!(decoded, Some(record));
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn name_value_stream_survives_any_split(
            pairs in prop::collection::vec(("[A-Z_]{1,40}", ".{0,300}"), 0..12),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let encoded = encode_pairs(pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())));
            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(encoded.len() + 1)).collect();
            points.push(0);
            points.push(encoded.len());
            points.sort_unstable();

            let mut decoder = NameValueDecoder::new();
            let mut decoded = Vec::new();
            for window in points.windows(2) {
                decoded.extend(decoder.feed(&encoded[window[0]..window[1]]));
            }
            prop_assert!(decoder.finish().is_ok());
            prop_assert_eq!(decoded, pairs);
        }
    }

    #[test]
    fn zero_length_record_is_header_only() {
        let record = Record::end_of_stream(RecordType::Params, 1);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert!(record.is_empty());

        let mut buf = BytesMut::from(&bytes[..]);
        assert_eq!(Record::decode(&mut buf).unwrap(), Some(record));
    }

    #[test]
    fn largest_record_roundtrips() {
        let record = Record::new(RecordType::Stdout, 3, vec![0xab; MAX_CONTENT_LEN]).unwrap();
        assert_eq!(record.padding_length, 1);
        let mut buf = BytesMut::from(&record.to_bytes()[..]);
        assert_eq!(Record::decode(&mut buf).unwrap(), Some(record));
    }

    #[test]
    fn back_to_back_records_decode_in_order() {
        let first = Record::new(RecordType::Params, 1, &b"abc"[..]).unwrap();
        let second = Record::end_of_stream(RecordType::Params, 1);
        let mut buf = BytesMut::new();
        first.encode(&mut buf);
        second.encode(&mut buf);

        assert_eq!(Record::decode(&mut buf).unwrap(), Some(first));
        assert_eq!(Record::decode(&mut buf).unwrap(), Some(second));
        assert_eq!(Record::decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn incoming_padding_is_honoured() {
        // A peer may pad more than strictly required.
        let mut buf = BytesMut::from(&[1u8, 5, 0, 1, 0, 2, 14, 0][..]);
        buf.extend_from_slice(b"hi");
        buf.extend_from_slice(&[0; 14]);
        let record = Record::decode(&mut buf).unwrap().unwrap();
        assert_eq!(&record.content[..], b"hi");
        assert_eq!(record.padding_length, 14);
        assert!(buf.is_empty());
    }

    #[test]
    fn bad_version_reported_before_body_arrives() {
        let mut buf = BytesMut::from(&[0u8, 1, 0, 1, 0xff, 0xff, 0, 0][..]);
        let err = Record::decode(&mut buf).unwrap_err();
        assert_eq!(err, ProtocolError::UnsupportedVersion(0));
        assert!(!err.preserves_framing());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Typed bodies
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn begin_request_from_record() {
        let body = BeginRequestBody::new(RoleKind::Authorizer.id(), false);
        let record = Record::new(RecordType::BeginRequest, 9, body.to_bytes().to_vec()).unwrap();
        let parsed = BeginRequestBody::parse(&record.content).unwrap();
        assert_eq!(parsed.role, 2);
        assert!(!parsed.keep_connection());
    }

    #[test]
    fn get_values_body_has_empty_values() {
        let body = encode_pairs([("FCGI_MAX_CONNS", ""), ("FCGI_MPXS_CONNS", "")]);
        let pairs = decode_pairs(&body).unwrap();
        let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["FCGI_MAX_CONNS", "FCGI_MPXS_CONNS"]);
    }

    #[test]
    fn unknown_type_body_layout() {
        let body = UnknownTypeBody { record_type: 42 };
        assert_eq!(body.to_bytes(), [42, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn context_defaults() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.state(), RequestState::AwaitingBegin);
        assert!(ctx.params.is_empty());
        assert!(ctx.body().is_empty());
        assert_eq!(ctx.param("SCRIPT"), None);
    }
}
